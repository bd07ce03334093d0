//! Unified vigil.sample.v1 schema
//!
//! This module defines the per-modality sample records produced by the
//! external detectors (face, audio, screen, behavior, environment) and the
//! adapter that parses them from JSON or NDJSON streams.

mod adapter;
mod record;

pub use adapter::*;
pub use record::*;
