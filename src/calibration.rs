//! Pre-exam calibration
//!
//! Samples collected over a short window establish the per-session baseline:
//! where the face sits, how steady the gaze is, ambient noise and lighting.
//! Medians are used throughout so a single bad frame cannot skew the
//! baseline.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use crate::sample::{Sample, SampleRecord};
use crate::types::{CalibrationProfile, FacePosition};

/// Tolerance for comparing the face-presence ratio to its threshold
const RATIO_EPSILON: f64 = 1e-9;

/// Median of a slice; `None` when empty
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Computes calibration profiles from collected samples
#[derive(Debug, Clone, Default)]
pub struct CalibrationEngine {
    config: CalibrationConfig,
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Build a profile from calibration-window samples.
    ///
    /// # Errors
    /// * `InsufficientSamples` when fewer face samples than `min_samples`
    ///   were received
    /// * `NoFaceDetected` when the face was present in less than
    ///   `min_face_ratio` of them
    pub fn calibrate(
        &self,
        samples: &[SampleRecord],
        at: DateTime<Utc>,
    ) -> Result<CalibrationProfile, CalibrationError> {
        let faces: Vec<_> = samples
            .iter()
            .filter_map(|r| match &r.payload {
                Sample::Face(f) => Some(f),
                _ => None,
            })
            .collect();

        if faces.len() < self.config.min_samples {
            return Err(CalibrationError::InsufficientSamples {
                received: faces.len(),
                required: self.config.min_samples,
            });
        }

        let present: Vec<_> = faces.iter().filter(|f| f.face_detected).collect();
        let ratio = present.len() as f64 / faces.len() as f64;
        if ratio + RATIO_EPSILON < self.config.min_face_ratio {
            return Err(CalibrationError::NoFaceDetected {
                ratio,
                required: self.config.min_face_ratio,
            });
        }

        let mut notes = Vec::new();

        let positions: Vec<FacePosition> = present.iter().filter_map(|f| f.position).collect();
        let optimal_face_position = if positions.is_empty() {
            notes.push("no face positions reported");
            FacePosition::default()
        } else {
            let component = |get: fn(&FacePosition) -> f64| {
                let mut values: Vec<f64> = positions.iter().map(get).collect();
                median(&mut values).unwrap_or_default()
            };
            FacePosition {
                x: component(|p| p.x),
                y: component(|p| p.y),
                width: component(|p| p.width),
                height: component(|p| p.height),
            }
        };

        let mut gaze: Vec<f64> = present.iter().map(|f| f.eye_gaze_confidence).collect();
        let baseline_eye_gaze = median(&mut gaze).unwrap_or_default();

        let mut noise: Vec<f64> = samples
            .iter()
            .filter_map(|r| match &r.payload {
                Sample::Audio(a) => Some(a.background_noise),
                _ => None,
            })
            .collect();
        let background_noise_level = median(&mut noise).unwrap_or_else(|| {
            notes.push("no audio samples; default noise level used");
            self.config.default_noise_level
        });

        let mut lighting: Vec<f64> = samples
            .iter()
            .filter_map(|r| match &r.payload {
                Sample::Environment(e) => e.lighting_quality,
                _ => None,
            })
            .collect();
        let optimal_lighting = median(&mut lighting).unwrap_or_else(|| {
            notes.push("no lighting samples; default lighting used");
            self.config.default_lighting
        });

        info!(
            face_samples = faces.len(),
            face_ratio = ratio,
            background_noise_level,
            optimal_lighting,
            "Calibration completed"
        );

        Ok(CalibrationProfile {
            optimal_face_position,
            baseline_eye_gaze,
            background_noise_level,
            optimal_lighting,
            calibration_completed: true,
            calibration_time: at,
            sample_count: faces.len(),
            calibration_notes: notes.join("; "),
        })
    }
}

/// Accumulates samples for one calibration attempt
#[derive(Debug, Clone)]
pub struct CalibrationCollector {
    started_at: DateTime<Utc>,
    samples: Vec<SampleRecord>,
}

impl CalibrationCollector {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            samples: Vec::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Record a sample; samples from before the attempt started are ignored
    pub fn observe(&mut self, record: SampleRecord) {
        if record.timestamp < self.started_at {
            debug!(modality = ?record.modality(), "Ignoring sample from before calibration start");
            return;
        }
        self.samples.push(record);
    }

    /// Whether the sampling window has run its course as of `now`
    pub fn window_elapsed(&self, config: &CalibrationConfig, now: DateTime<Utc>) -> bool {
        now - self.started_at >= config.window()
    }

    /// Compute the profile from samples inside the window
    pub fn finish(
        &self,
        engine: &CalibrationEngine,
        at: DateTime<Utc>,
    ) -> Result<CalibrationProfile, CalibrationError> {
        let end = self.started_at + engine.config().window();
        let in_window: Vec<SampleRecord> = self
            .samples
            .iter()
            .filter(|r| r.timestamp <= end)
            .cloned()
            .collect();
        engine.calibrate(&in_window, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{AudioSample, EnvironmentSample, FaceSample};
    use crate::types::SessionId;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 9, 55, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn face(sid: SessionId, ms: i64, detected: bool, x: f64) -> SampleRecord {
        SampleRecord::new(
            sid,
            t(ms),
            Sample::Face(FaceSample {
                face_detected: detected,
                face_count: u32::from(detected),
                confidence: if detected { 0.9 } else { 0.0 },
                position: detected.then_some(FacePosition {
                    x,
                    y: 100.0,
                    width: 200.0,
                    height: 240.0,
                }),
                is_looking_at_screen: true,
                eye_gaze_confidence: 0.8,
                liveness_detected: true,
                emotions: None,
                face_encoding_hash: None,
            }),
        )
    }

    fn audio(sid: SessionId, ms: i64, noise: f64) -> SampleRecord {
        SampleRecord::new(
            sid,
            t(ms),
            Sample::Audio(AudioSample {
                voice_level: 0.0,
                background_noise: noise,
                speaker_count: 0,
                voice_detected: false,
                multiple_voices_detected: false,
                confidence: 0.9,
                detected_words: vec![],
            }),
        )
    }

    fn lighting(sid: SessionId, ms: i64, quality: f64) -> SampleRecord {
        SampleRecord::new(
            sid,
            t(ms),
            Sample::Environment(EnvironmentSample {
                background_person_count: 0,
                objects_on_desk: false,
                lighting_quality: Some(quality),
                phone_detected: false,
                book_detected: false,
                paper_detected: false,
                room_description: String::new(),
            }),
        )
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_eighty_percent_presence_succeeds() {
        let sid = SessionId::new();
        let samples: Vec<_> = (0..5).map(|i| face(sid, i * 1000, i != 2, 300.0)).collect();
        let profile = CalibrationEngine::default().calibrate(&samples, t(5000)).unwrap();
        assert!(profile.calibration_completed);
        assert_eq!(profile.sample_count, 5);
    }

    #[test]
    fn test_sixty_percent_presence_fails() {
        let sid = SessionId::new();
        let samples: Vec<_> = (0..5).map(|i| face(sid, i * 1000, i >= 2, 300.0)).collect();
        let err = CalibrationEngine::default()
            .calibrate(&samples, t(5000))
            .unwrap_err();
        assert!(matches!(err, CalibrationError::NoFaceDetected { .. }));
    }

    #[test]
    fn test_insufficient_samples() {
        let sid = SessionId::new();
        let samples: Vec<_> = (0..4).map(|i| face(sid, i * 1000, true, 300.0)).collect();
        let err = CalibrationEngine::default()
            .calibrate(&samples, t(5000))
            .unwrap_err();
        assert_eq!(
            err,
            CalibrationError::InsufficientSamples {
                received: 4,
                required: 5
            }
        );
    }

    #[test]
    fn test_medians_resist_outliers() {
        let sid = SessionId::new();
        let mut samples: Vec<_> = [300.0, 305.0, 310.0, 900.0, 302.0]
            .iter()
            .enumerate()
            .map(|(i, x)| face(sid, i as i64 * 1000, true, *x))
            .collect();
        samples.extend([0.1, 0.12, 0.9].iter().map(|n| audio(sid, 500, *n)));
        samples.extend([0.6, 0.65, 0.05].iter().map(|l| lighting(sid, 700, *l)));

        let profile = CalibrationEngine::default().calibrate(&samples, t(5000)).unwrap();
        assert_eq!(profile.optimal_face_position.x, 305.0);
        assert!((profile.background_noise_level - 0.12).abs() < 1e-9);
        assert!((profile.optimal_lighting - 0.6).abs() < 1e-9);
        assert!(profile.calibration_notes.is_empty());
    }

    #[test]
    fn test_defaults_used_without_audio_or_lighting() {
        let sid = SessionId::new();
        let samples: Vec<_> = (0..5).map(|i| face(sid, i * 1000, true, 300.0)).collect();
        let profile = CalibrationEngine::default().calibrate(&samples, t(5000)).unwrap();
        assert!((profile.background_noise_level - 0.1).abs() < 1e-9);
        assert!((profile.optimal_lighting - 0.7).abs() < 1e-9);
        assert!(profile.calibration_notes.contains("default noise"));
    }

    #[test]
    fn test_collector_respects_window() {
        let sid = SessionId::new();
        let engine = CalibrationEngine::default();
        let mut collector = CalibrationCollector::new(t(0));
        for i in 0..4 {
            collector.observe(face(sid, i * 1000, true, 300.0));
        }
        // outside the 5s window
        collector.observe(face(sid, 7000, true, 300.0));
        assert!(!collector.window_elapsed(engine.config(), t(4000)));
        assert!(collector.window_elapsed(engine.config(), t(5000)));

        let err = collector.finish(&engine, t(7000)).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientSamples { received: 4, .. }
        ));
    }
}
