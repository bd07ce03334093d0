//! Exam session record and lifecycle
//!
//! ```text
//! Created -> Calibrating -> InProgress <-> Paused
//!                               |
//!                               +-> Completed | UnderReview | Terminated
//! UnderReview -> Completed | Terminated
//! ```
//!
//! Any non-terminal session may be terminated. Completed and Terminated are
//! final; the only mutation they still accept is a review outcome on an
//! individual violation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ExamSettings;
use crate::error::SessionError;
use crate::types::{
    CalibrationProfile, SessionId, SessionStatus, ViolationEvent, ViolationId,
};

/// One student's sitting of one exam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub student_id: String,
    pub exam_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    status: SessionStatus,
    pub settings: ExamSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    calibration: Option<CalibrationProfile>,
    /// Face encoding hash registered for the student
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_hash: Option<String>,
    #[serde(default)]
    violations: Vec<ViolationEvent>,
}

impl Session {
    pub fn new(
        student_id: impl Into<String>,
        exam_id: impl Into<String>,
        settings: ExamSettings,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            student_id: student_id.into(),
            exam_id: exam_id.into(),
            start_time,
            end_time: None,
            status: SessionStatus::Created,
            settings,
            calibration: None,
            identity_hash: None,
            violations: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_identity_hash(mut self, hash: impl Into<String>) -> Self {
        self.identity_hash = Some(hash.into());
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn calibration(&self) -> Option<&CalibrationProfile> {
        self.calibration.as_ref()
    }

    /// Finalized violations in emission order
    pub fn violations(&self) -> &[ViolationEvent] {
        &self.violations
    }

    /// Whether any High or Critical violation still awaits a reviewer
    pub fn has_unresolved_serious(&self) -> bool {
        self.violations
            .iter()
            .any(|v| !v.is_resolved && v.severity.is_serious())
    }

    /// Move to `to`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, to: SessionStatus, at: DateTime<Utc>) -> Result<(), SessionError> {
        use SessionStatus::*;

        let from = self.status;
        let allowed = match (from, to) {
            (Created, Calibrating) => true,
            (Calibrating, InProgress) => true,
            (InProgress, Paused) | (Paused, InProgress) => true,
            (InProgress | Paused, Completed | UnderReview) => true,
            (UnderReview, Completed | Terminated) => true,
            (f, Terminated) => !f.is_terminal() && f != UnderReview,
            _ => false,
        };
        if !allowed {
            return Err(SessionError::InvalidTransition { from, to });
        }

        if matches!(to, Completed | Terminated | UnderReview) && self.end_time.is_none() {
            self.end_time = Some(at);
        }
        self.status = to;
        info!(session_id = %self.id, ?from, ?to, "Session status changed");
        Ok(())
    }

    /// Attach the calibration baseline. Only possible while calibrating.
    pub fn set_calibration(&mut self, profile: CalibrationProfile) -> Result<(), SessionError> {
        if self.status != SessionStatus::Calibrating {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: SessionStatus::InProgress,
            });
        }
        self.calibration = Some(profile);
        Ok(())
    }

    /// Append a finalized violation. Terminal sessions accept none.
    pub fn record_violation(&mut self, event: ViolationEvent) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::Closed(self.id));
        }
        self.violations.push(event);
        Ok(())
    }

    /// Record a reviewer's decision on one violation
    pub fn resolve_violation(
        &mut self,
        id: ViolationId,
        resolution: impl Into<String>,
        reviewed_by: impl Into<String>,
    ) -> Result<&ViolationEvent, SessionError> {
        let event = self
            .violations
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(SessionError::UnknownViolation(id))?;
        event.is_resolved = true;
        event.resolution = Some(resolution.into());
        event.reviewed_by = Some(reviewed_by.into());
        Ok(event)
    }
}
