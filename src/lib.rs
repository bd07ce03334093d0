//! Vigil - Monitoring aggregation and violation detection for remote exam proctoring
//!
//! Vigil turns multi-modal sample streams from external detectors into
//! debounced violation events, a recency-weighted session risk score and a
//! session status, through a deterministic pipeline: ingestion → per-modality
//! evaluation → ordered merge → aggregation → risk tracking.
//!
//! ## Entry points
//!
//! - **MonitorEngine**: synchronous, caller-driven, many sessions
//! - **MonitorRuntime**: Tokio tasks, one actor per session and one worker per modality
//! - **replay**: run a recorded sample stream through a fresh engine

pub mod aggregator;
pub mod alerts;
pub mod calibration;
pub mod config;
pub mod error;
pub mod evaluators;
pub mod ingestor;
pub mod merge;
pub mod pipeline;
pub mod risk;
pub mod runtime;
pub mod sample;
pub mod session;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use alerts::{AlertPriority, AlertType, ProctorAlert};
pub use config::{EngineConfig, ExamSettings};
pub use error::MonitorError;
pub use pipeline::{replay, MonitorEngine, MonitorEvent, ReplayReport, SessionManifest};
pub use runtime::{MonitorRuntime, SessionHandle};
pub use session::Session;

// Schema exports
pub use sample::{SampleAdapter, SampleRecord, SCHEMA_VERSION};

pub use types::{
    CalibrationProfile, SessionId, SessionRiskState, SessionStatus, ViolationEvent,
    ViolationSeverity, ViolationType,
};

/// Vigil version reported by the CLI and FFI
pub const VIGIL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped on exported reports
pub const PRODUCER_NAME: &str = "vigil-proctor";
