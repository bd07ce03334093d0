//! Per-modality violation evaluators
//!
//! Each evaluator is a pure function of the current sample, the rolling
//! buffer for its stream, the calibration baseline and the exam policy. The
//! buffer already contains the current sample as its newest entry.
//!
//! Dispatch is a closed `match` over [`Sample`], so adding a modality is a
//! compile error until every evaluator path handles it.

pub mod audio;
pub mod behavior;
pub mod environment;
pub mod face;
pub mod screen;

use crate::config::{CalibrationConfig, DetectionConfig, ExamSettings};
use crate::error::EvaluationError;
use crate::ingestor::RollingBuffer;
use crate::sample::{Sample, SampleRecord};
use crate::types::{CalibrationProfile, CandidateViolation, ViolationSeverity, ViolationType};

/// Read-only inputs shared by all evaluators
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub buffer: &'a RollingBuffer,
    pub calibration: Option<&'a CalibrationProfile>,
    pub settings: &'a ExamSettings,
    pub detection: &'a DetectionConfig,
    /// Fallback baselines when no calibration profile exists
    pub calibration_defaults: &'a CalibrationConfig,
    /// Face encoding hash registered for the student
    pub registered_identity: Option<&'a str>,
}

impl<'a> EvaluationContext<'a> {
    pub fn noise_baseline(&self) -> f64 {
        self.calibration
            .map(|c| c.background_noise_level)
            .unwrap_or(self.calibration_defaults.default_noise_level)
    }

    pub fn lighting_baseline(&self) -> f64 {
        self.calibration
            .map(|c| c.optimal_lighting)
            .unwrap_or(self.calibration_defaults.default_lighting)
    }
}

/// Evaluate one sample into zero or more candidate violations.
///
/// Malformed samples are rejected here so a bad payload never reaches the
/// aggregator.
pub fn evaluate(
    record: &SampleRecord,
    ctx: &EvaluationContext<'_>,
) -> Result<Vec<CandidateViolation>, EvaluationError> {
    record.check()?;

    let candidates = match &record.payload {
        Sample::Face(sample) => face::evaluate(record, sample, ctx),
        Sample::Audio(sample) => audio::evaluate(record, sample, ctx),
        Sample::Screen(sample) => screen::evaluate(record, sample, ctx),
        Sample::Behavior(sample) => behavior::evaluate(record, sample, ctx),
        Sample::Environment(sample) => environment::evaluate(record, sample, ctx),
    };
    Ok(candidates)
}

/// Build a candidate stamped with the sample's session, time and evidence
pub(crate) fn candidate(
    record: &SampleRecord,
    violation_type: ViolationType,
    severity: ViolationSeverity,
    confidence: f64,
    description: impl Into<String>,
) -> CandidateViolation {
    CandidateViolation {
        session_id: record.session_id,
        violation_type,
        confidence: confidence.clamp(0.0, 1.0),
        severity,
        timestamp: record.timestamp,
        description: description.into(),
        evidence: record.evidence_ref(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::sample::AudioSample;

    #[test]
    fn test_malformed_sample_is_rejected() {
        let h = Harness::new();
        let record = SampleRecord::new(
            h.session_id,
            t0(),
            Sample::Audio(AudioSample {
                voice_level: -1.0,
                background_noise: 0.0,
                speaker_count: 0,
                voice_detected: false,
                multiple_voices_detected: false,
                confidence: 0.5,
                detected_words: vec![],
            }),
        );
        let ctx = EvaluationContext {
            buffer: &h.buffer,
            calibration: None,
            settings: &h.settings,
            detection: &h.detection,
            calibration_defaults: &h.calibration_defaults,
            registered_identity: None,
        };
        let err = evaluate(&record, &ctx).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::MalformedSample {
                modality: crate::types::Modality::Audio,
                ..
            }
        ));
    }

    #[test]
    fn test_candidate_clamps_confidence() {
        let h = Harness::new();
        let record = SampleRecord::new(
            h.session_id,
            t0(),
            Sample::Audio(AudioSample {
                voice_level: 0.0,
                background_noise: 0.0,
                speaker_count: 0,
                voice_detected: false,
                multiple_voices_detected: false,
                confidence: 0.5,
                detected_words: vec![],
            }),
        );
        let c = candidate(
            &record,
            ViolationType::BackgroundNoise,
            ViolationSeverity::Low,
            1.8,
            "noise",
        );
        assert!((c.confidence - 1.0).abs() < 1e-12);
        assert_eq!(c.timestamp, t0());
    }
}
