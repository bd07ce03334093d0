//! Core types for the Vigil monitoring pipeline
//!
//! This module defines the records that flow between stages: identities,
//! the closed violation taxonomy, candidate and finalized violations, the
//! calibration baseline, and the derived risk snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique session token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identity of a finalized violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationId(pub Uuid);

impl ViolationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViolationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViolationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sensor channel a sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Face,
    Audio,
    Screen,
    Behavior,
    Environment,
}

impl Modality {
    pub const ALL: [Modality; 5] = [
        Modality::Face,
        Modality::Audio,
        Modality::Screen,
        Modality::Behavior,
        Modality::Environment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Face => "face",
            Modality::Audio => "audio",
            Modality::Screen => "screen",
            Modality::Behavior => "behavior",
            Modality::Environment => "environment",
        }
    }

    /// Stable slot index, used for per-modality arrays
    pub fn index(&self) -> usize {
        match self {
            Modality::Face => 0,
            Modality::Audio => 1,
            Modality::Screen => 2,
            Modality::Behavior => 3,
            Modality::Environment => 4,
        }
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Calibrating,
    InProgress,
    Paused,
    Completed,
    Terminated,
    UnderReview,
}

impl SessionStatus {
    /// Completed and Terminated sessions are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Terminated)
    }

    /// Whether new samples may still enter the pipeline
    pub fn accepts_samples(&self) -> bool {
        !matches!(
            self,
            SessionStatus::Completed | SessionStatus::Terminated | SessionStatus::UnderReview
        )
    }
}

/// Closed violation taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    FaceNotDetected,
    MultipleFaces,
    LookingAway,
    SuspiciousMovement,
    VoiceDetected,
    BackgroundNoise,
    TabSwitching,
    WindowChange,
    FullScreenExit,
    ScreenshotAttempt,
    CopyPaste,
    SuspiciousApplication,
    NetworkAnomaly,
    UnauthorizedDevice,
    IdentityMismatch,
    LivenessCheckFailed,
    EnvironmentChange,
    SystemTampering,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::FaceNotDetected => "face_not_detected",
            ViolationType::MultipleFaces => "multiple_faces",
            ViolationType::LookingAway => "looking_away",
            ViolationType::SuspiciousMovement => "suspicious_movement",
            ViolationType::VoiceDetected => "voice_detected",
            ViolationType::BackgroundNoise => "background_noise",
            ViolationType::TabSwitching => "tab_switching",
            ViolationType::WindowChange => "window_change",
            ViolationType::FullScreenExit => "full_screen_exit",
            ViolationType::ScreenshotAttempt => "screenshot_attempt",
            ViolationType::CopyPaste => "copy_paste",
            ViolationType::SuspiciousApplication => "suspicious_application",
            ViolationType::NetworkAnomaly => "network_anomaly",
            ViolationType::UnauthorizedDevice => "unauthorized_device",
            ViolationType::IdentityMismatch => "identity_mismatch",
            ViolationType::LivenessCheckFailed => "liveness_check_failed",
            ViolationType::EnvironmentChange => "environment_change",
            ViolationType::SystemTampering => "system_tampering",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Violation severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ViolationSeverity {
    /// One level up, capped at Critical
    pub fn escalate(self) -> Self {
        match self {
            ViolationSeverity::Low => ViolationSeverity::Medium,
            ViolationSeverity::Medium => ViolationSeverity::High,
            ViolationSeverity::High | ViolationSeverity::Critical => ViolationSeverity::Critical,
        }
    }

    pub fn is_serious(&self) -> bool {
        matches!(self, ViolationSeverity::High | ViolationSeverity::Critical)
    }
}

/// A violation proposed by an evaluator, before debouncing.
///
/// Never leaves the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateViolation {
    pub session_id: SessionId,
    pub violation_type: ViolationType,
    /// Detector confidence (0-1)
    pub confidence: f64,
    pub severity: ViolationSeverity,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    /// Opaque evidence reference
    pub evidence: String,
}

/// Finalized, deduplicated violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub id: ViolationId,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    /// First occurrence within the debounce window
    pub timestamp: DateTime<Utc>,
    /// Highest confidence observed within the window
    pub confidence: f64,
    pub severity: ViolationSeverity,
    pub description: String,
    pub evidence: String,
    pub is_resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
}

/// Face bounding box in camera coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FacePosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FacePosition {
    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }
}

/// Per-session reference baseline established before monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub optimal_face_position: FacePosition,
    pub baseline_eye_gaze: f64,
    pub background_noise_level: f64,
    pub optimal_lighting: f64,
    pub calibration_completed: bool,
    pub calibration_time: DateTime<Utc>,
    /// Samples the medians were computed from
    pub sample_count: usize,
    #[serde(default)]
    pub calibration_notes: String,
}

/// Coarse risk posture exposed to proctor dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskPosture {
    Calibrating,
    Monitoring,
    Flagged,
    Terminated,
}

/// Derived, point-in-time risk view of a session. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRiskState {
    pub session_id: SessionId,
    pub current_score: f64,
    pub status: SessionStatus,
    pub posture: RiskPosture,
    pub recent_violations: Vec<ViolationEvent>,
    pub total_violations: usize,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_severity_escalation_caps_at_critical() {
        assert_eq!(ViolationSeverity::Low.escalate(), ViolationSeverity::Medium);
        assert_eq!(ViolationSeverity::Medium.escalate(), ViolationSeverity::High);
        assert_eq!(ViolationSeverity::High.escalate(), ViolationSeverity::Critical);
        assert_eq!(
            ViolationSeverity::Critical.escalate(),
            ViolationSeverity::Critical
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ViolationSeverity::Low < ViolationSeverity::Medium);
        assert!(ViolationSeverity::High < ViolationSeverity::Critical);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Terminated.is_terminal());
        assert!(!SessionStatus::UnderReview.is_terminal());
        assert!(!SessionStatus::UnderReview.accepts_samples());
        assert!(SessionStatus::Paused.accepts_samples());
    }

    #[test]
    fn test_violation_event_roundtrip() {
        let event = ViolationEvent {
            id: ViolationId::new(),
            session_id: SessionId::new(),
            violation_type: ViolationType::FullScreenExit,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 30).unwrap()
                + chrono::Duration::milliseconds(250),
            confidence: 0.123_456_789_012_345,
            severity: ViolationSeverity::High,
            description: "Exited full screen".to_string(),
            evidence: "frame://42".to_string(),
            is_resolved: true,
            resolution: Some("Accidental".to_string()),
            reviewed_by: Some("proctor-7".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        let decoded: ViolationEvent = serde_json::from_str(&json).unwrap();

        pretty_assertions::assert_eq!(decoded.id, event.id);
        pretty_assertions::assert_eq!(decoded.timestamp, event.timestamp);
        assert!((decoded.confidence - event.confidence).abs() < 1e-9);
        pretty_assertions::assert_eq!(decoded, event);
    }

    #[test]
    fn test_violation_type_serializes_snake_case() {
        let json = serde_json::to_string(&ViolationType::LivenessCheckFailed).unwrap();
        assert_eq!(json, "\"liveness_check_failed\"");
        assert_eq!(ViolationType::TabSwitching.to_string(), "tab_switching");
    }

    #[test]
    fn test_face_position_center() {
        let pos = FacePosition {
            x: 100.0,
            y: 50.0,
            width: 200.0,
            height: 100.0,
        };
        assert!((pos.center_x() - 200.0).abs() < 1e-9);
        assert!((pos.center_y() - 100.0).abs() < 1e-9);
    }
}
