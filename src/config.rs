//! Engine configuration and per-exam policy
//!
//! `ExamSettings` arrives with each session and carries the proctoring policy
//! chosen by the exam author. `EngineConfig` holds every detection, debounce,
//! scoring and calibration threshold; nothing downstream hard-codes them.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::types::ViolationSeverity;

/// Per-exam proctoring policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamSettings {
    pub allow_multiple_monitors: bool,
    pub require_face_detection: bool,
    pub require_audio_monitoring: bool,
    pub allow_tab_switching: bool,
    pub require_full_screen: bool,
    /// Termination threshold for the risk score (0-1 of the risk budget)
    pub violation_threshold: f64,
    pub enable_liveness_detection: bool,
    pub enable_behavior_analysis: bool,
    /// Maximum tolerated idle time in seconds
    pub max_idle_time_secs: u64,
    /// Terminate on the first Critical violation
    pub zero_tolerance: bool,
    /// Speaking is expected (oral exams, reading aloud)
    pub allow_reading_aloud: bool,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            allow_multiple_monitors: false,
            require_face_detection: true,
            require_audio_monitoring: true,
            allow_tab_switching: false,
            require_full_screen: true,
            violation_threshold: 0.8,
            enable_liveness_detection: true,
            enable_behavior_analysis: true,
            max_idle_time_secs: 300,
            zero_tolerance: false,
            allow_reading_aloud: false,
        }
    }
}

impl ExamSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.violation_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "violation_threshold",
                reason: format!("{} is outside [0, 1]", self.violation_threshold),
            });
        }
        Ok(())
    }
}

/// Sample admission and buffering limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum tolerated future skew (milliseconds)
    pub max_clock_skew_ms: i64,
    /// Rolling buffer capacity per session and modality
    pub buffer_capacity: usize,
    /// Rolling buffer age limit (seconds)
    pub buffer_max_age_secs: i64,
    /// Bounded queue depth per (session, modality) in the async runtime
    pub queue_capacity: usize,
    /// Per-operation time budget (milliseconds)
    pub time_budget_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_ms: 5_000,
            buffer_capacity: 10,
            buffer_max_age_secs: 30,
            queue_capacity: 64,
            time_budget_ms: 200,
        }
    }
}

impl IngestConfig {
    pub fn max_clock_skew(&self) -> Duration {
        Duration::milliseconds(self.max_clock_skew_ms)
    }

    pub fn buffer_max_age(&self) -> Duration {
        Duration::seconds(self.buffer_max_age_secs)
    }

    pub fn time_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.time_budget_ms)
    }
}

/// Evaluator thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Consecutive no-face samples before FaceNotDetected (Medium)
    pub face_miss_medium: usize,
    /// Consecutive no-face samples for High
    pub face_miss_high: usize,
    /// Consecutive no-face samples for Critical
    pub face_miss_critical: usize,
    /// Sustained off-screen gaze before LookingAway (seconds)
    pub look_away_secs: f64,
    /// Noise above `baseline * multiplier` is flagged
    pub noise_multiplier: f64,
    /// Noise above `baseline * ratio` is Medium rather than Low
    pub noise_medium_ratio: f64,
    /// Focus score below this is flagged as suspicious
    pub min_focus_score: f64,
    /// Lighting below `baseline * ratio` is flagged
    pub min_lighting_ratio: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            face_miss_medium: 3,
            face_miss_high: 6,
            face_miss_critical: 10,
            look_away_secs: 5.0,
            noise_multiplier: 1.5,
            noise_medium_ratio: 3.0,
            min_focus_score: 0.3,
            min_lighting_ratio: 0.5,
        }
    }
}

/// Debounce and escalation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Debounce window (milliseconds)
    pub debounce_window_ms: i64,
    /// Prior windows of the same type needed before escalating one level
    pub escalation_recurrences: u32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 10_000,
            escalation_recurrences: 3,
        }
    }
}

impl AggregationConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::milliseconds(self.debounce_window_ms)
    }
}

/// Score weight per severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            low: 0.05,
            medium: 0.15,
            high: 0.35,
            critical: 0.6,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: ViolationSeverity) -> f64 {
        match severity {
            ViolationSeverity::Low => self.low,
            ViolationSeverity::Medium => self.medium,
            ViolationSeverity::High => self.high,
            ViolationSeverity::Critical => self.critical,
        }
    }
}

/// Risk score policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Multiplicative decay applied once per tick
    pub decay: f64,
    /// Tick length (milliseconds)
    pub tick_ms: i64,
    pub severity_weights: SeverityWeights,
    /// Number of violations kept in the snapshot
    pub recent_window: usize,
    /// Score at `flag_ratio * violation_threshold` marks the session Flagged
    pub flag_ratio: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            decay: 0.98,
            tick_ms: 1_000,
            severity_weights: SeverityWeights::default(),
            recent_window: 20,
            flag_ratio: 0.5,
        }
    }
}

/// Calibration procedure parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Sampling window (milliseconds)
    pub window_ms: i64,
    pub min_samples: usize,
    /// Fraction of samples that must contain a face
    pub min_face_ratio: f64,
    /// Noise baseline when no audio was sampled
    pub default_noise_level: f64,
    /// Lighting baseline when no environment data was sampled
    pub default_lighting: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            min_samples: 5,
            min_face_ratio: 0.8,
            default_noise_level: 0.1,
            default_lighting: 0.7,
        }
    }
}

impl CalibrationConfig {
    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms)
    }
}

/// Ordered merge parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Longest a batch is held waiting for a slower modality (milliseconds)
    pub max_hold_ms: i64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { max_hold_ms: 2_000 }
    }
}

impl MergeConfig {
    pub fn max_hold(&self) -> Duration {
        Duration::milliseconds(self.max_hold_ms)
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub detection: DetectionConfig,
    pub aggregation: AggregationConfig,
    pub risk: RiskConfig,
    pub calibration: CalibrationConfig,
    pub merge: MergeConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file; a missing file yields defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config = Self::from_json(&contents)?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidValue {
                field,
                reason: reason.into(),
            }
        }

        if self.ingest.max_clock_skew_ms < 0 {
            return Err(invalid("ingest.max_clock_skew_ms", "must be non-negative"));
        }
        if self.ingest.buffer_capacity == 0 {
            return Err(invalid("ingest.buffer_capacity", "must be at least 1"));
        }
        if self.ingest.buffer_max_age_secs <= 0 {
            return Err(invalid("ingest.buffer_max_age_secs", "must be positive"));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(invalid("ingest.queue_capacity", "must be at least 1"));
        }

        let d = &self.detection;
        if !(d.face_miss_medium <= d.face_miss_high && d.face_miss_high <= d.face_miss_critical)
        {
            return Err(invalid(
                "detection.face_miss_*",
                "thresholds must be non-decreasing (medium <= high <= critical)",
            ));
        }
        if d.face_miss_medium == 0 {
            return Err(invalid("detection.face_miss_medium", "must be at least 1"));
        }
        // Miss streaks and look-away spans are read from the rolling buffer
        if d.face_miss_critical > self.ingest.buffer_capacity {
            return Err(invalid(
                "detection.face_miss_critical",
                format!(
                    "{} exceeds ingest.buffer_capacity ({})",
                    d.face_miss_critical, self.ingest.buffer_capacity
                ),
            ));
        }
        if !(d.look_away_secs.is_finite() && d.look_away_secs > 0.0) {
            return Err(invalid("detection.look_away_secs", "must be positive"));
        }
        if d.look_away_secs > self.ingest.buffer_max_age_secs as f64 {
            return Err(invalid(
                "detection.look_away_secs",
                format!(
                    "{}s exceeds ingest.buffer_max_age_secs ({}s)",
                    d.look_away_secs, self.ingest.buffer_max_age_secs
                ),
            ));
        }
        if d.noise_multiplier <= 0.0 || d.noise_medium_ratio < d.noise_multiplier {
            return Err(invalid(
                "detection.noise_*",
                "multiplier must be positive and not exceed the medium ratio",
            ));
        }

        if self.aggregation.debounce_window_ms <= 0 {
            return Err(invalid("aggregation.debounce_window_ms", "must be positive"));
        }

        if !(self.risk.decay > 0.0 && self.risk.decay <= 1.0) {
            return Err(invalid("risk.decay", "must be in (0, 1]"));
        }
        if self.risk.tick_ms <= 0 {
            return Err(invalid("risk.tick_ms", "must be positive"));
        }
        let w = &self.risk.severity_weights;
        if [w.low, w.medium, w.high, w.critical].iter().any(|v| *v <= 0.0) {
            return Err(invalid("risk.severity_weights", "all weights must be positive"));
        }

        if !(0.0..=1.0).contains(&self.calibration.min_face_ratio) {
            return Err(invalid("calibration.min_face_ratio", "must be in [0, 1]"));
        }
        if self.calibration.min_samples == 0 {
            return Err(invalid("calibration.min_samples", "must be at least 1"));
        }
        if self.merge.max_hold_ms < 0 {
            return Err(invalid("merge.max_hold_ms", "must be non-negative"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.buffer_capacity, 10);
        assert_eq!(config.aggregation.debounce_window_ms, 10_000);
        assert!((config.risk.decay - 0.98).abs() < 1e-12);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config =
            EngineConfig::from_json(r#"{ "aggregation": { "debounce_window_ms": 4000 } }"#)
                .unwrap();
        assert_eq!(config.aggregation.debounce_window_ms, 4_000);
        assert_eq!(config.aggregation.escalation_recurrences, 3);
        assert_eq!(config.detection.face_miss_high, 6);
    }

    #[test]
    fn test_rejects_bad_decay() {
        let err = EngineConfig::from_json(r#"{ "risk": { "decay": 1.5 } }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "risk.decay",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_unordered_face_thresholds() {
        let mut config = EngineConfig::default();
        config.detection.face_miss_high = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_miss_tier_beyond_buffer() {
        let mut config = EngineConfig::default();
        config.ingest.buffer_capacity = 8;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue {
                field: "detection.face_miss_critical",
                ..
            }
        ));

        config.detection.face_miss_critical = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_look_away_longer_than_buffer_age() {
        let mut config = EngineConfig::default();
        config.ingest.buffer_max_age_secs = 4;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue {
                field: "detection.look_away_secs",
                ..
            }
        ));

        config.detection.look_away_secs = 4.0;
        assert!(config.validate().is_ok());
        config.detection.look_away_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = EngineConfig::load(Some(Path::new("/nonexistent/vigil.json"))).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_exam_settings_threshold_range() {
        let mut settings = ExamSettings::default();
        assert!(settings.validate().is_ok());
        settings.violation_threshold = 1.2;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_severity_weights() {
        let weights = SeverityWeights::default();
        assert!((weights.weight(ViolationSeverity::High) - 0.35).abs() < 1e-12);
        assert!((weights.weight(ViolationSeverity::Critical) - 0.6).abs() < 1e-12);
    }
}
