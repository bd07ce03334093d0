//! Keyboard and mouse behavior checks

use super::{candidate, EvaluationContext};
use crate::sample::{BehaviorSample, SampleRecord};
use crate::types::{CandidateViolation, ViolationSeverity, ViolationType};

pub fn evaluate(
    record: &SampleRecord,
    sample: &BehaviorSample,
    ctx: &EvaluationContext<'_>,
) -> Vec<CandidateViolation> {
    let mut out = Vec::new();
    if !ctx.settings.enable_behavior_analysis {
        return out;
    }

    if sample.copy_paste_detected {
        out.push(candidate(
            record,
            ViolationType::CopyPaste,
            ViolationSeverity::Medium,
            1.0,
            "Copy/paste used",
        ));
    }

    let low_focus = sample
        .focus_score
        .filter(|f| *f < ctx.detection.min_focus_score);
    if sample.suspicious_pattern || low_focus.is_some() {
        let description = match low_focus {
            Some(focus) => format!("Low focus score {:.2}", focus),
            None => "Unusual input pattern".to_string(),
        };
        out.push(candidate(
            record,
            ViolationType::SuspiciousMovement,
            ViolationSeverity::Low,
            sample.focus_score.map(|f| 1.0 - f).unwrap_or(1.0),
            description,
        ));
    }

    let max_idle = ctx.settings.max_idle_time_secs as f64;
    if sample.idle_time_secs > max_idle {
        out.push(candidate(
            record,
            ViolationType::SuspiciousMovement,
            ViolationSeverity::Medium,
            1.0,
            format!("Idle for {:.0}s", sample.idle_time_secs),
        ));
    }

    out
}
