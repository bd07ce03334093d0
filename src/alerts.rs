//! Proctor-facing alerts
//!
//! Alerts are the subset of monitoring outcomes a human should look at now:
//! serious violations, identity problems, failed calibration, termination
//! and internal faults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{SessionId, ViolationEvent, ViolationSeverity, ViolationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ViolationDetected,
    SystemIssue,
    TechnicalProblem,
    SessionTimeout,
    IdentityVerificationRequired,
    CalibrationNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProctorAlert {
    pub id: Uuid,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub priority: AlertPriority,
    pub is_acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl ProctorAlert {
    pub fn new(
        session_id: SessionId,
        alert_type: AlertType,
        priority: AlertPriority,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            alert_type,
            message: message.into(),
            timestamp,
            priority,
            is_acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    /// Alert for a finalized violation, if it is serious enough to page a
    /// proctor. Identity mismatches always ask for re-verification.
    pub fn for_violation(event: &ViolationEvent) -> Option<Self> {
        let alert_type = match event.violation_type {
            ViolationType::IdentityMismatch | ViolationType::LivenessCheckFailed => {
                AlertType::IdentityVerificationRequired
            }
            _ if event.severity.is_serious() => AlertType::ViolationDetected,
            _ => return None,
        };
        let priority = match event.severity {
            ViolationSeverity::Critical => AlertPriority::Urgent,
            ViolationSeverity::High => AlertPriority::High,
            _ => AlertPriority::Normal,
        };
        Some(Self::new(
            event.session_id,
            alert_type,
            priority,
            format!("{}: {}", event.violation_type, event.description),
            event.timestamp,
        ))
    }

    pub fn calibration_needed(
        session_id: SessionId,
        reason: impl std::fmt::Display,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            session_id,
            AlertType::CalibrationNeeded,
            AlertPriority::Normal,
            format!("Calibration failed: {}", reason),
            at,
        )
    }

    pub fn terminated(session_id: SessionId, reason: impl std::fmt::Display, at: DateTime<Utc>) -> Self {
        Self::new(
            session_id,
            AlertType::ViolationDetected,
            AlertPriority::Urgent,
            format!("Session terminated: {}", reason),
            at,
        )
    }

    pub fn system_issue(session_id: SessionId, reason: impl std::fmt::Display, at: DateTime<Utc>) -> Self {
        Self::new(
            session_id,
            AlertType::SystemIssue,
            AlertPriority::Urgent,
            format!("Session moved to review after internal fault: {}", reason),
            at,
        )
    }

    pub fn session_timeout(session_id: SessionId, at: DateTime<Utc>) -> Self {
        Self::new(
            session_id,
            AlertType::SessionTimeout,
            AlertPriority::Normal,
            "Exam time limit reached; session closed",
            at,
        )
    }

    /// Mark as handled. Returns false if it was already acknowledged.
    pub fn acknowledge(&mut self, by: impl Into<String>, at: DateTime<Utc>) -> bool {
        if self.is_acknowledged {
            return false;
        }
        self.is_acknowledged = true;
        self.acknowledged_by = Some(by.into());
        self.acknowledged_at = Some(at);
        true
    }
}
