//! Voice and background noise checks

use super::{candidate, EvaluationContext};
use crate::sample::{AudioSample, SampleRecord};
use crate::types::{CandidateViolation, ViolationSeverity, ViolationType};

pub fn evaluate(
    record: &SampleRecord,
    sample: &AudioSample,
    ctx: &EvaluationContext<'_>,
) -> Vec<CandidateViolation> {
    let mut out = Vec::new();
    if !ctx.settings.require_audio_monitoring {
        return out;
    }

    // Multiple voices are flagged even when reading aloud is allowed
    if sample.has_multiple_voices() {
        out.push(candidate(
            record,
            ViolationType::VoiceDetected,
            ViolationSeverity::High,
            sample.confidence,
            format!("Multiple voices detected ({} speakers)", sample.speaker_count.max(2)),
        ));
    } else if sample.voice_detected && !ctx.settings.allow_reading_aloud {
        let description = if sample.detected_words.is_empty() {
            "Voice detected".to_string()
        } else {
            format!("Voice detected: {}", sample.detected_words.join(" "))
        };
        out.push(candidate(
            record,
            ViolationType::VoiceDetected,
            ViolationSeverity::Medium,
            sample.confidence,
            description,
        ));
    }

    let baseline = ctx.noise_baseline().max(f64::EPSILON);
    let detection = ctx.detection;
    if sample.background_noise > baseline * detection.noise_multiplier {
        let ratio = sample.background_noise / baseline;
        let severity = if ratio >= detection.noise_medium_ratio {
            ViolationSeverity::Medium
        } else {
            ViolationSeverity::Low
        };
        out.push(candidate(
            record,
            ViolationType::BackgroundNoise,
            severity,
            sample.confidence,
            format!("Background noise {:.1}x calibrated level", ratio),
        ));
    }

    out
}
