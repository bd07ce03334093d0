//! Session risk scoring and status tracking
//!
//! The score is a recency-weighted sum of violation severities:
//!
//! ```text
//! score = score_prev * decay^(elapsed / tick) + weight(severity)
//! ```
//!
//! An isolated old violation fades; a burst of recent ones accumulates past
//! the exam's `violation_threshold` and terminates the session.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::error::SessionError;
use crate::session::Session;
use crate::types::{
    CalibrationProfile, RiskPosture, SessionId, SessionRiskState, SessionStatus,
    ViolationEvent, ViolationId, ViolationSeverity,
};

/// Why a session crossed into termination
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TerminationCause {
    ScoreExceeded { score: f64, threshold: f64 },
    ZeroTolerance,
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationCause::ScoreExceeded { score, threshold } => {
                write!(f, "risk score {:.3} exceeded threshold {:.3}", score, threshold)
            }
            TerminationCause::ZeroTolerance => {
                f.write_str("critical violation under zero-tolerance policy")
            }
        }
    }
}

/// Outcome of applying one violation to the score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskUpdate {
    pub score: f64,
    /// Set when the session should now be terminated
    pub breach: Option<TerminationCause>,
}

/// Single owner of one session's status, violation log and risk score
#[derive(Debug)]
pub struct SessionRiskTracker {
    session: Session,
    config: RiskConfig,
    score: f64,
    scored_at: Option<DateTime<Utc>>,
}

impl SessionRiskTracker {
    pub fn new(session: Session, config: RiskConfig) -> Self {
        Self {
            session,
            config,
            score: 0.0,
            scored_at: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Score decayed forward to `now`; never increases without a violation
    pub fn score_at(&self, now: DateTime<Utc>) -> f64 {
        match self.scored_at {
            Some(at) => self.score * self.decay_factor(at, now),
            None => self.score,
        }
    }

    fn decay_factor(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        let elapsed_ms = (to - from).num_milliseconds().max(0) as f64;
        let tick_ms = self.config.tick_ms.max(1) as f64;
        self.config.decay.powf(elapsed_ms / tick_ms)
    }

    pub fn start_calibration(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.session.transition(SessionStatus::Calibrating, at)
    }

    /// Store the baseline and begin monitoring
    pub fn begin_monitoring(
        &mut self,
        profile: CalibrationProfile,
        at: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.session.set_calibration(profile)?;
        self.session.transition(SessionStatus::InProgress, at)
    }

    pub fn pause(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.session.transition(SessionStatus::Paused, at)
    }

    pub fn resume(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.session.transition(SessionStatus::InProgress, at)
    }

    /// Fold a finalized violation into the score and the session log.
    ///
    /// Termination is reported, not performed, so the caller can finish
    /// recording violations already in flight before closing the session.
    pub fn apply(&mut self, event: ViolationEvent) -> Result<RiskUpdate, SessionError> {
        if self.session.status().is_terminal() {
            return Err(SessionError::Closed(self.session.id));
        }

        let at = event.timestamp;
        let decayed = self.score_at(at);
        let weight = self.config.severity_weights.weight(event.severity);
        let severity = event.severity;
        self.session.record_violation(event)?;

        self.score = decayed + weight;
        self.scored_at = Some(match self.scored_at {
            Some(prev) => prev.max(at),
            None => at,
        });

        let settings = &self.session.settings;
        let breach = if self.score > settings.violation_threshold {
            Some(TerminationCause::ScoreExceeded {
                score: self.score,
                threshold: settings.violation_threshold,
            })
        } else if settings.zero_tolerance && severity == ViolationSeverity::Critical {
            Some(TerminationCause::ZeroTolerance)
        } else {
            None
        };

        if let Some(cause) = breach {
            warn!(session_id = %self.session.id, %cause, "Termination threshold reached");
        }

        Ok(RiskUpdate {
            score: self.score,
            breach,
        })
    }

    pub fn terminate(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.session.transition(SessionStatus::Terminated, at)
    }

    /// End the exam. Sessions with unresolved High or Critical violations go
    /// to review instead of completing.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<SessionStatus, SessionError> {
        let to = if self.session.has_unresolved_serious() {
            SessionStatus::UnderReview
        } else {
            SessionStatus::Completed
        };
        self.session.transition(to, at)?;
        Ok(to)
    }

    /// Take the session out of automated monitoring after an internal fault
    pub fn escalate_to_review(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        if self.session.status() == SessionStatus::UnderReview {
            return Ok(());
        }
        if matches!(
            self.session.status(),
            SessionStatus::Created | SessionStatus::Calibrating
        ) {
            // No monitoring has happened yet; end it outright
            return self.session.transition(SessionStatus::Terminated, at);
        }
        if self.session.status() == SessionStatus::Paused {
            self.session.transition(SessionStatus::InProgress, at)?;
        }
        self.session.transition(SessionStatus::UnderReview, at)
    }

    /// Close a review with its final outcome
    pub fn finalize_review(
        &mut self,
        outcome: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let from = self.session.status();
        if from != SessionStatus::UnderReview || !outcome.is_terminal() {
            return Err(SessionError::InvalidTransition { from, to: outcome });
        }
        self.session.transition(outcome, at)?;
        info!(session_id = %self.session.id, ?outcome, "Review finalized");
        Ok(())
    }

    pub fn resolve_violation(
        &mut self,
        id: ViolationId,
        resolution: impl Into<String>,
        reviewed_by: impl Into<String>,
    ) -> Result<ViolationEvent, SessionError> {
        self.session
            .resolve_violation(id, resolution, reviewed_by)
            .cloned()
    }

    fn posture(&self, score: f64) -> RiskPosture {
        match self.session.status() {
            SessionStatus::Created | SessionStatus::Calibrating => RiskPosture::Calibrating,
            SessionStatus::Terminated => RiskPosture::Terminated,
            _ => {
                let flag_at = self.config.flag_ratio * self.session.settings.violation_threshold;
                if score >= flag_at || self.session.has_unresolved_serious() {
                    RiskPosture::Flagged
                } else {
                    RiskPosture::Monitoring
                }
            }
        }
    }

    /// Point-in-time risk view
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionRiskState {
        let score = self.score_at(now);
        let violations = self.session.violations();
        let keep = self.config.recent_window.min(violations.len());
        SessionRiskState {
            session_id: self.session.id,
            current_score: score,
            status: self.session.status(),
            posture: self.posture(score),
            recent_violations: violations[violations.len() - keep..].to_vec(),
            total_violations: violations.len(),
            computed_at: now,
        }
    }
}
