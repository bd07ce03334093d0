//! vigil.sample.v1 schema definition
//!
//! A sample is one observation from one sensor channel, already reduced by an
//! external classifier to confidences, counters and flags. The core never
//! sees pixels or audio frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::types::{FacePosition, Modality, SessionId};

/// Current schema version
pub const SCHEMA_VERSION: &str = "vigil.sample.v1";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

/// Facial expression labels, in canonical tie-break order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Anger,
    Disgust,
    Fear,
    Happiness,
    Sadness,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const CANONICAL_ORDER: [Emotion; 7] = [
        Emotion::Anger,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happiness,
        Emotion::Sadness,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Anger => "anger",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happiness => "happiness",
            Emotion::Sadness => "sadness",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }
}

/// Emotion classifier scores (0-1 each)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionScores {
    pub anger: f64,
    pub disgust: f64,
    pub fear: f64,
    pub happiness: f64,
    pub sadness: f64,
    pub surprise: f64,
    pub neutral: f64,
}

impl EmotionScores {
    pub fn score(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Anger => self.anger,
            Emotion::Disgust => self.disgust,
            Emotion::Fear => self.fear,
            Emotion::Happiness => self.happiness,
            Emotion::Sadness => self.sadness,
            Emotion::Surprise => self.surprise,
            Emotion::Neutral => self.neutral,
        }
    }

    /// Label with the strictly greatest score; ties go to the earliest label
    /// in [`Emotion::CANONICAL_ORDER`].
    pub fn dominant(&self) -> Emotion {
        let mut best = Emotion::CANONICAL_ORDER[0];
        for emotion in Emotion::CANONICAL_ORDER.iter().skip(1) {
            if self.score(*emotion) > self.score(best) {
                best = *emotion;
            }
        }
        best
    }

    fn values(&self) -> [f64; 7] {
        [
            self.anger,
            self.disgust,
            self.fear,
            self.happiness,
            self.sadness,
            self.surprise,
            self.neutral,
        ]
    }
}

/// Face detector output for one camera frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    pub face_detected: bool,
    #[serde(default)]
    pub face_count: u32,
    /// Detector confidence (0-1)
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<FacePosition>,
    #[serde(default = "default_true")]
    pub is_looking_at_screen: bool,
    /// Gaze tracker confidence (0-1)
    #[serde(default)]
    pub eye_gaze_confidence: f64,
    #[serde(default = "default_true")]
    pub liveness_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotions: Option<EmotionScores>,
    /// Face encoding hash for identity verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_encoding_hash: Option<String>,
}

/// Audio detector output for one capture interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSample {
    #[serde(default)]
    pub voice_level: f64,
    #[serde(default)]
    pub background_noise: f64,
    #[serde(default)]
    pub speaker_count: u32,
    #[serde(default)]
    pub voice_detected: bool,
    #[serde(default)]
    pub multiple_voices_detected: bool,
    /// Classifier confidence (0-1)
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_words: Vec<String>,
}

impl AudioSample {
    pub fn has_multiple_voices(&self) -> bool {
        self.multiple_voices_detected || self.speaker_count > 1
    }
}

/// Screen and window state flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenSample {
    #[serde(default = "default_true")]
    pub is_full_screen: bool,
    #[serde(default)]
    pub tab_switch_detected: bool,
    #[serde(default)]
    pub window_change_detected: bool,
    #[serde(default)]
    pub screenshot_attempted: bool,
    #[serde(default)]
    pub print_screen_detected: bool,
    #[serde(default)]
    pub virtual_machine_detected: bool,
    #[serde(default)]
    pub remote_desktop_detected: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub running_processes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suspicious_applications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_count: Option<u32>,
}

/// Keystroke and mouse counters for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSample {
    #[serde(default)]
    pub keystroke_count: u32,
    #[serde(default)]
    pub mouse_click_count: u32,
    #[serde(default)]
    pub mouse_move_distance: u32,
    /// Time since last input (seconds)
    #[serde(default)]
    pub idle_time_secs: f64,
    /// Characters per minute
    #[serde(default)]
    pub typing_speed: f64,
    #[serde(default)]
    pub copy_paste_detected: bool,
    #[serde(default)]
    pub suspicious_pattern: bool,
    /// How focused the student appears (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_score: Option<f64>,
}

/// Room-level object and person detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSample {
    #[serde(default)]
    pub background_person_count: u32,
    #[serde(default)]
    pub objects_on_desk: bool,
    /// Lighting quality (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting_quality: Option<f64>,
    #[serde(default)]
    pub phone_detected: bool,
    #[serde(default)]
    pub book_detected: bool,
    #[serde(default)]
    pub paper_detected: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room_description: String,
}

/// Modality-tagged sample payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "snake_case")]
pub enum Sample {
    Face(FaceSample),
    Audio(AudioSample),
    Screen(ScreenSample),
    Behavior(BehaviorSample),
    Environment(EnvironmentSample),
}

impl Sample {
    pub fn modality(&self) -> Modality {
        match self {
            Sample::Face(_) => Modality::Face,
            Sample::Audio(_) => Modality::Audio,
            Sample::Screen(_) => Modality::Screen,
            Sample::Behavior(_) => Modality::Behavior,
            Sample::Environment(_) => Modality::Environment,
        }
    }
}

/// The vigil.sample.v1 envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub session_id: SessionId,
    /// Server-observed timestamp (UTC)
    pub timestamp: DateTime<Utc>,
    /// Opaque evidence reference (frame id, clip URI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    pub payload: Sample,
}

impl SampleRecord {
    pub fn new(session_id: SessionId, timestamp: DateTime<Utc>, payload: Sample) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            session_id,
            timestamp,
            evidence: None,
            payload,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn modality(&self) -> Modality {
        self.payload.modality()
    }

    /// Evidence reference, or a synthetic one naming the sample
    pub fn evidence_ref(&self) -> String {
        self.evidence.clone().unwrap_or_else(|| {
            format!(
                "sample:{}:{}:{}",
                self.session_id,
                self.modality().as_str(),
                self.timestamp.timestamp_millis()
            )
        })
    }

    /// Validate, reporting a failure as a malformed sample of this modality
    pub fn check(&self) -> Result<(), EvaluationError> {
        self.validate().map_err(|e| EvaluationError::MalformedSample {
            modality: self.modality(),
            reason: e.to_string(),
        })
    }

    /// Validate the sample schema and value ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        match &self.payload {
            Sample::Face(face) => {
                unit_interval("face.confidence", face.confidence)?;
                unit_interval("face.eye_gaze_confidence", face.eye_gaze_confidence)?;
                if let Some(pos) = &face.position {
                    for (field, v) in [
                        ("face.position.x", pos.x),
                        ("face.position.y", pos.y),
                        ("face.position.width", pos.width),
                        ("face.position.height", pos.height),
                    ] {
                        finite(field, v)?;
                    }
                }
                if let Some(emotions) = &face.emotions {
                    for v in emotions.values() {
                        unit_interval("face.emotions", v)?;
                    }
                }
                if face.face_detected && face.face_count == 0 {
                    return Err(ValidationError::Inconsistent(
                        "face_detected is set but face_count is 0".to_string(),
                    ));
                }
            }
            Sample::Audio(audio) => {
                non_negative("audio.voice_level", audio.voice_level)?;
                non_negative("audio.background_noise", audio.background_noise)?;
                unit_interval("audio.confidence", audio.confidence)?;
            }
            Sample::Screen(_) => {}
            Sample::Behavior(behavior) => {
                non_negative("behavior.idle_time_secs", behavior.idle_time_secs)?;
                non_negative("behavior.typing_speed", behavior.typing_speed)?;
                if let Some(focus) = behavior.focus_score {
                    unit_interval("behavior.focus_score", focus)?;
                }
            }
            Sample::Environment(env) => {
                if let Some(lighting) = env.lighting_quality {
                    unit_interval("environment.lighting_quality", lighting)?;
                }
            }
        }

        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

/// Validation errors for sample records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Inconsistent sample: {0}")]
    Inconsistent(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap()
    }

    fn face(detected: bool) -> FaceSample {
        FaceSample {
            face_detected: detected,
            face_count: u32::from(detected),
            confidence: 0.9,
            position: None,
            is_looking_at_screen: true,
            eye_gaze_confidence: 0.8,
            liveness_detected: true,
            emotions: None,
            face_encoding_hash: None,
        }
    }

    #[test]
    fn test_deserialize_face_sample() {
        let json = r#"{
            "session_id": "6f1c2a4e-1b5d-4c3e-9f00-0a1b2c3d4e5f",
            "timestamp": "2024-05-20T10:00:00Z",
            "payload": {
                "modality": "face",
                "face_detected": true,
                "face_count": 1,
                "confidence": 0.85,
                "eye_gaze_confidence": 0.8
            }
        }"#;

        let record: SampleRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.modality(), Modality::Face);
        match record.payload {
            Sample::Face(f) => {
                assert!(f.face_detected);
                assert!(f.is_looking_at_screen);
                assert!(f.liveness_detected);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_serialize_screen_sample() {
        let record = SampleRecord::new(
            SessionId::new(),
            ts(),
            Sample::Screen(ScreenSample {
                is_full_screen: false,
                tab_switch_detected: true,
                window_change_detected: false,
                screenshot_attempted: false,
                print_screen_detected: false,
                virtual_machine_detected: false,
                remote_desktop_detected: false,
                running_processes: vec![],
                suspicious_applications: vec!["obs".to_string()],
                monitor_count: None,
            }),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"modality\":\"screen\""));
        assert!(json.contains("vigil.sample.v1"));
        assert!(json.contains("obs"));
    }

    #[test]
    fn test_validation_rejects_out_of_range_confidence() {
        let mut sample = face(true);
        sample.confidence = 1.4;
        let record = SampleRecord::new(SessionId::new(), ts(), Sample::Face(sample));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::OutOfRange {
                field: "face.confidence",
                ..
            })
        ));
    }

    #[test]
    fn test_validation_rejects_nan() {
        let record = SampleRecord::new(
            SessionId::new(),
            ts(),
            Sample::Behavior(BehaviorSample {
                keystroke_count: 0,
                mouse_click_count: 0,
                mouse_move_distance: 0,
                idle_time_secs: f64::NAN,
                typing_speed: 0.0,
                copy_paste_detected: false,
                suspicious_pattern: false,
                focus_score: None,
            }),
        );
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inconsistent_face_count() {
        let mut sample = face(true);
        sample.face_count = 0;
        let record = SampleRecord::new(SessionId::new(), ts(), Sample::Face(sample));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_validation_rejects_wrong_schema_version() {
        let mut record = SampleRecord::new(SessionId::new(), ts(), Sample::Face(face(false)));
        record.schema_version = "vigil.sample.v0".to_string();
        assert!(matches!(
            record.validate(),
            Err(ValidationError::InvalidSchemaVersion { .. })
        ));
    }

    #[test]
    fn test_dominant_emotion_strict_max() {
        let scores = EmotionScores {
            neutral: 0.7,
            happiness: 0.15,
            sadness: 0.05,
            anger: 0.03,
            fear: 0.02,
            surprise: 0.03,
            disgust: 0.02,
        };
        assert_eq!(scores.dominant(), Emotion::Neutral);
    }

    #[test]
    fn test_dominant_emotion_tie_prefers_canonical_order() {
        let scores = EmotionScores {
            fear: 0.4,
            sadness: 0.4,
            neutral: 0.4,
            ..EmotionScores::default()
        };
        assert_eq!(scores.dominant(), Emotion::Fear);

        let all_zero = EmotionScores::default();
        assert_eq!(all_zero.dominant(), Emotion::Anger);
    }

    #[test]
    fn test_evidence_ref_fallback() {
        let sid = SessionId::new();
        let record = SampleRecord::new(sid, ts(), Sample::Face(face(true)));
        assert!(record.evidence_ref().starts_with(&format!("sample:{}:face:", sid)));

        let record = record.with_evidence("frame://17");
        assert_eq!(record.evidence_ref(), "frame://17");
    }

    #[test]
    fn test_speaker_count_implies_multiple_voices() {
        let audio = AudioSample {
            voice_level: 0.4,
            background_noise: 0.1,
            speaker_count: 2,
            voice_detected: true,
            multiple_voices_detected: false,
            confidence: 0.9,
            detected_words: vec![],
        };
        assert!(audio.has_multiple_voices());
    }
}
