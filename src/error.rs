//! Error types for Vigil
//!
//! Each stage of the monitoring pipeline has its own error enum so callers can
//! tell a dropped sample apart from a failed calibration or a fault that takes
//! a session out of automated monitoring.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Modality, SessionId, SessionStatus, ViolationId};

/// Errors raised when a sample is offered to the ingestor.
///
/// All variants are recoverable: the sample is dropped, the caller is told why
/// and the session keeps running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session {0} is closed to new samples")]
    SessionClosed(SessionId),

    #[error("Sample timestamp {timestamp} is {skew_ms}ms ahead of server time")]
    ClockSkew {
        timestamp: DateTime<Utc>,
        skew_ms: i64,
    },

    #[error("Buffer for {modality:?} samples is full")]
    BufferOverflow { modality: Modality },

    #[error("Dropped malformed sample: {0}")]
    Malformed(EvaluationError),
}

/// Errors raised by the calibration procedure.
///
/// The session stays in `Calibrating` and calibration may be retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("Insufficient calibration samples: got {received}, need at least {required}")]
    InsufficientSamples { received: usize, required: usize },

    #[error("No face detected in enough calibration samples ({ratio:.2} < {required:.2})")]
    NoFaceDetected { ratio: f64, required: f64 },

    #[error("Calibration is not running for session {0}")]
    NotCalibrating(SessionId),

    #[error("Session {0} is already calibrated")]
    AlreadyCompleted(SessionId),
}

/// Internal invariant violations inside the aggregator.
///
/// These are fatal to the session: it is moved to `UnderReview` rather than
/// silently losing violation data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("Out-of-order flush: window at {window_start} precedes last emitted {last_emitted}")]
    OutOfOrderFlush {
        window_start: DateTime<Utc>,
        last_emitted: DateTime<Utc>,
    },

    #[error("Candidate belongs to session {found}, aggregator serves {expected}")]
    SessionMismatch {
        expected: SessionId,
        found: SessionId,
    },
}

/// A sample an evaluator could not interpret.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Malformed {modality:?} sample: {reason}")]
    MalformedSample { modality: Modality, reason: String },
}

/// Session lifecycle errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session {0} is closed")]
    Closed(SessionId),

    #[error("Unknown violation: {0}")]
    UnknownViolation(ViolationId),
}

/// Engine configuration problems.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to read configuration: {0}")]
    Io(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Umbrella error for engine-level operations
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse sample payload: {0}")]
    ParseError(String),

    #[error("Monitoring runtime stopped for session {0}")]
    RuntimeStopped(SessionId),
}
