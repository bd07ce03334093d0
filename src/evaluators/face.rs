//! Face presence, gaze, liveness and identity checks

use chrono::Duration;

use super::{candidate, EvaluationContext};
use crate::sample::{FaceSample, Sample, SampleRecord};
use crate::types::{CandidateViolation, ViolationSeverity, ViolationType};

pub fn evaluate(
    record: &SampleRecord,
    sample: &FaceSample,
    ctx: &EvaluationContext<'_>,
) -> Vec<CandidateViolation> {
    let mut out = Vec::new();
    let detection = ctx.detection;

    if ctx.settings.require_face_detection {
        let misses = consecutive_misses(ctx);
        if let Some(severity) = miss_severity(misses, ctx) {
            out.push(candidate(
                record,
                ViolationType::FaceNotDetected,
                severity,
                1.0 - sample.confidence,
                format!("No face detected for {} consecutive samples", misses),
            ));
        }

        if sample.face_count > 1 {
            out.push(candidate(
                record,
                ViolationType::MultipleFaces,
                ViolationSeverity::High,
                sample.confidence,
                format!("{} faces in frame", sample.face_count),
            ));
        }

        if let Some(away) = look_away_duration(ctx) {
            let threshold = Duration::milliseconds((detection.look_away_secs * 1000.0) as i64);
            if away >= threshold {
                let expression = sample
                    .emotions
                    .map(|e| format!(" (dominant expression: {})", e.dominant().as_str()))
                    .unwrap_or_default();
                out.push(candidate(
                    record,
                    ViolationType::LookingAway,
                    ViolationSeverity::Medium,
                    1.0 - sample.eye_gaze_confidence,
                    format!(
                        "Gaze off-screen for {:.1}s{}",
                        away.num_milliseconds() as f64 / 1000.0,
                        expression
                    ),
                ));
            }
        }
    }

    if ctx.settings.enable_liveness_detection && sample.face_detected && !sample.liveness_detected
    {
        out.push(candidate(
            record,
            ViolationType::LivenessCheckFailed,
            ViolationSeverity::Critical,
            sample.confidence,
            "Liveness check failed",
        ));
    }

    if let (Some(registered), Some(observed)) =
        (ctx.registered_identity, sample.face_encoding_hash.as_deref())
    {
        if sample.face_detected && registered != observed {
            out.push(candidate(
                record,
                ViolationType::IdentityMismatch,
                ViolationSeverity::Critical,
                sample.confidence,
                "Face does not match registered identity",
            ));
        }
    }

    out
}

fn face_samples<'a>(
    ctx: &'a EvaluationContext<'_>,
) -> impl Iterator<Item = (&'a SampleRecord, &'a FaceSample)> + 'a {
    ctx.buffer.iter().rev().filter_map(|r| match &r.payload {
        Sample::Face(f) => Some((r, f)),
        _ => None,
    })
}

/// Trailing run of samples without a face, newest first
fn consecutive_misses(ctx: &EvaluationContext<'_>) -> usize {
    face_samples(ctx)
        .take_while(|(_, f)| !f.face_detected)
        .count()
}

fn miss_severity(misses: usize, ctx: &EvaluationContext<'_>) -> Option<ViolationSeverity> {
    let d = ctx.detection;
    if misses >= d.face_miss_critical {
        Some(ViolationSeverity::Critical)
    } else if misses >= d.face_miss_high {
        Some(ViolationSeverity::High)
    } else if misses >= d.face_miss_medium {
        Some(ViolationSeverity::Medium)
    } else {
        None
    }
}

/// How long the gaze has been continuously off-screen, if it is now
fn look_away_duration(ctx: &EvaluationContext<'_>) -> Option<Duration> {
    let mut run = face_samples(ctx).take_while(|(_, f)| f.face_detected && !f.is_looking_at_screen);
    let (newest, _) = run.next()?;
    let oldest = run.last().map(|(r, _)| r).unwrap_or(newest);
    Some(newest.timestamp - oldest.timestamp)
}
