//! Room checks: other people, devices, reference material, lighting

use super::{candidate, EvaluationContext};
use crate::sample::{EnvironmentSample, SampleRecord};
use crate::types::{CandidateViolation, ViolationSeverity, ViolationType};

pub fn evaluate(
    record: &SampleRecord,
    sample: &EnvironmentSample,
    ctx: &EvaluationContext<'_>,
) -> Vec<CandidateViolation> {
    let mut out = Vec::new();
    let mut change = |severity: ViolationSeverity, confidence: f64, description: String| {
        out.push(candidate(
            record,
            ViolationType::EnvironmentChange,
            severity,
            confidence,
            description,
        ));
    };

    if sample.background_person_count > 0 {
        change(
            ViolationSeverity::High,
            1.0,
            format!("{} person(s) in background", sample.background_person_count),
        );
    }

    if sample.phone_detected {
        change(ViolationSeverity::High, 1.0, "Phone detected".to_string());
    }

    if sample.book_detected || sample.paper_detected {
        let what = match (sample.book_detected, sample.paper_detected) {
            (true, true) => "Book and paper detected",
            (true, false) => "Book detected",
            _ => "Paper detected",
        };
        change(ViolationSeverity::Medium, 1.0, what.to_string());
    }

    if let Some(lighting) = sample.lighting_quality {
        let floor = ctx.lighting_baseline() * ctx.detection.min_lighting_ratio;
        if lighting < floor {
            change(
                ViolationSeverity::Low,
                1.0 - lighting / floor,
                format!("Lighting dropped to {:.2}", lighting),
            );
        }
    }

    out
}
