//! Pipeline orchestration
//!
//! This module provides the public API for Vigil. It wires the stages for
//! one session:
//!
//! 1. SampleIngestor - admit and buffer samples per modality
//! 2. evaluators - turn a sample plus its buffer into candidates
//! 3. OrderedMerge - interleave modality output by timestamp
//! 4. ViolationAggregator - debounce, escalate, finalize
//! 5. SessionRiskTracker - score, status, violation log
//!
//! `MonitorEngine` drives every stage on the caller's thread. The async
//! runtime in [`crate::runtime`] reuses `SessionMonitor` and `SamplePolicy`
//! across tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregator::ViolationAggregator;
use crate::alerts::ProctorAlert;
use crate::calibration::{CalibrationCollector, CalibrationEngine};
use crate::config::{CalibrationConfig, DetectionConfig, EngineConfig, ExamSettings};
use crate::error::{AggregationError, CalibrationError, IngestError, MonitorError, SessionError};
use crate::evaluators::{self, EvaluationContext};
use crate::ingestor::{RollingBuffer, SampleIngestor};
use crate::merge::OrderedMerge;
use crate::risk::{SessionRiskTracker, TerminationCause};
use crate::sample::SampleRecord;
use crate::session::Session;
use crate::types::{
    CalibrationProfile, CandidateViolation, Modality, SessionId, SessionRiskState,
    SessionStatus, ViolationEvent, ViolationId,
};

/// Everything a session publishes to downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Violation(ViolationEvent),
    Alert(ProctorAlert),
    StatusChanged {
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    },
}

/// Per-session evaluation inputs that do not change while monitoring
#[derive(Debug, Clone)]
pub struct SamplePolicy {
    session_id: SessionId,
    settings: ExamSettings,
    detection: DetectionConfig,
    calibration_defaults: CalibrationConfig,
    identity_hash: Option<String>,
}

impl SamplePolicy {
    pub fn for_session(session: &Session, config: &EngineConfig) -> Self {
        Self {
            session_id: session.id,
            settings: session.settings.clone(),
            detection: config.detection.clone(),
            calibration_defaults: config.calibration.clone(),
            identity_hash: session.identity_hash.clone(),
        }
    }

    /// Run the evaluator for the record's modality.
    ///
    /// A malformed sample is logged and yields no candidates; it never stops
    /// the session.
    pub fn evaluate(
        &self,
        record: &SampleRecord,
        buffer: &RollingBuffer,
        calibration: Option<&CalibrationProfile>,
    ) -> Vec<CandidateViolation> {
        let ctx = EvaluationContext {
            buffer,
            calibration,
            settings: &self.settings,
            detection: &self.detection,
            calibration_defaults: &self.calibration_defaults,
            registered_identity: self.identity_hash.as_deref(),
        };
        match evaluators::evaluate(record, &ctx) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Dropping malformed sample");
                Vec::new()
            }
        }
    }
}

/// Serialized owner of one session's aggregation and scoring state
#[derive(Debug)]
pub struct SessionMonitor {
    tracker: SessionRiskTracker,
    aggregator: ViolationAggregator,
    merge: OrderedMerge,
    calibration: CalibrationEngine,
    collector: Option<CalibrationCollector>,
    policy: SamplePolicy,
    outbox: Vec<MonitorEvent>,
    alerts: Vec<ProctorAlert>,
}

impl SessionMonitor {
    pub fn new(session: Session, config: &EngineConfig) -> Self {
        let policy = SamplePolicy::for_session(&session, config);
        Self {
            aggregator: ViolationAggregator::new(session.id, config.aggregation.clone()),
            merge: OrderedMerge::new(&config.merge),
            calibration: CalibrationEngine::new(config.calibration.clone()),
            collector: None,
            policy,
            tracker: SessionRiskTracker::new(session, config.risk.clone()),
            outbox: Vec::new(),
            alerts: Vec::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.tracker.session_id()
    }

    pub fn status(&self) -> SessionStatus {
        self.tracker.status()
    }

    pub fn session(&self) -> &Session {
        self.tracker.session()
    }

    pub fn policy(&self) -> &SamplePolicy {
        &self.policy
    }

    pub fn calibration_profile(&self) -> Option<&CalibrationProfile> {
        self.tracker.session().calibration()
    }

    pub fn alerts(&self) -> &[ProctorAlert] {
        &self.alerts
    }

    /// Take every event published since the last drain
    pub fn drain_events(&mut self) -> Vec<MonitorEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn raise(&mut self, alert: ProctorAlert) {
        self.alerts.push(alert.clone());
        self.outbox.push(MonitorEvent::Alert(alert));
    }

    fn note_transition(&mut self, from: SessionStatus, at: DateTime<Utc>) {
        let to = self.status();
        if from != to {
            self.outbox.push(MonitorEvent::StatusChanged {
                session_id: self.session_id(),
                from,
                to,
                at,
            });
        }
    }

    pub fn start_calibration(&mut self, at: DateTime<Utc>) -> Result<(), MonitorError> {
        if self.calibration_profile().is_some() {
            return Err(CalibrationError::AlreadyCompleted(self.session_id()).into());
        }
        let from = self.status();
        self.tracker.start_calibration(at)?;
        self.collector = Some(CalibrationCollector::new(at));
        self.note_transition(from, at);
        Ok(())
    }

    /// Use a profile computed elsewhere (a resumed session, a stored
    /// baseline) and begin monitoring.
    pub fn use_calibration(
        &mut self,
        profile: CalibrationProfile,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let from = self.status();
        if from == SessionStatus::Created {
            self.tracker.start_calibration(at)?;
        }
        self.tracker.begin_monitoring(profile, at)?;
        self.collector = None;
        self.note_transition(from, at);
        Ok(())
    }

    /// Feed a calibration-phase sample. Completes calibration once the
    /// window has elapsed.
    pub fn observe_calibration(
        &mut self,
        record: SampleRecord,
    ) -> Result<Option<CalibrationProfile>, MonitorError> {
        let at = record.timestamp;
        let collector = match (&mut self.collector, self.tracker.status()) {
            (Some(collector), SessionStatus::Calibrating) => collector,
            _ => return Err(CalibrationError::NotCalibrating(self.tracker.session_id()).into()),
        };
        collector.observe(record);
        if !collector.window_elapsed(self.calibration.config(), at) {
            return Ok(None);
        }
        self.finish_calibration(at).map(Some)
    }

    /// Compute the profile from what has been collected so far.
    ///
    /// On failure the session stays in Calibrating, a proctor alert is
    /// raised and a fresh attempt starts at `at`.
    pub fn finish_calibration(
        &mut self,
        at: DateTime<Utc>,
    ) -> Result<CalibrationProfile, MonitorError> {
        let session_id = self.session_id();
        let collector = self
            .collector
            .as_ref()
            .ok_or(CalibrationError::NotCalibrating(session_id))?;

        match collector.finish(&self.calibration, at) {
            Ok(profile) => {
                let from = self.status();
                self.tracker.begin_monitoring(profile.clone(), at)?;
                self.collector = None;
                self.note_transition(from, at);
                Ok(profile)
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Calibration attempt failed");
                self.raise(ProctorAlert::calibration_needed(session_id, &e, at));
                self.collector = Some(CalibrationCollector::new(at));
                Err(e.into())
            }
        }
    }

    /// Accept one modality's evaluated output up to `timestamp`.
    ///
    /// Returns the violations finalized as a result. Output arriving after
    /// the session stopped accepting samples is discarded.
    pub fn accept(
        &mut self,
        modality: Modality,
        timestamp: DateTime<Utc>,
        candidates: Vec<CandidateViolation>,
    ) -> Vec<ViolationEvent> {
        if !self.status().accepts_samples() {
            return Vec::new();
        }
        let released = self.merge.push(modality, timestamp, candidates);
        let horizon = self.merge.horizon();
        let result = self.aggregator.aggregate(released).and_then(|mut events| {
            if let Some(horizon) = horizon {
                events.extend(self.aggregator.advance(horizon)?);
            }
            Ok(events)
        });
        self.commit(result, timestamp)
    }

    fn flush_pipeline(&mut self) -> Result<Vec<ViolationEvent>, AggregationError> {
        let held = self.merge.drain();
        let mut events = self.aggregator.aggregate(held)?;
        events.extend(self.aggregator.flush()?);
        Ok(events)
    }

    fn commit(
        &mut self,
        result: Result<Vec<ViolationEvent>, AggregationError>,
        at: DateTime<Utc>,
    ) -> Vec<ViolationEvent> {
        let events = match result {
            Ok(events) => events,
            Err(e) => {
                self.fault(e, at);
                return Vec::new();
            }
        };

        let (mut recorded, breach) = self.record(events);
        if let Some(cause) = breach {
            // Violations already observed belong to the session; record
            // them before it closes.
            match self.flush_pipeline() {
                Ok(rest) => recorded.extend(self.record(rest).0),
                Err(e) => {
                    self.fault(e, at);
                    return recorded;
                }
            }
            self.close(at, &cause);
        }
        recorded
    }

    fn record(&mut self, events: Vec<ViolationEvent>) -> (Vec<ViolationEvent>, Option<TerminationCause>) {
        let mut recorded = Vec::with_capacity(events.len());
        let mut breach = None;
        for event in events {
            match self.tracker.apply(event.clone()) {
                Ok(update) => {
                    if breach.is_none() {
                        breach = update.breach;
                    }
                    if let Some(alert) = ProctorAlert::for_violation(&event) {
                        self.raise(alert);
                    }
                    self.outbox.push(MonitorEvent::Violation(event.clone()));
                    recorded.push(event);
                }
                Err(e) => {
                    warn!(session_id = %self.session_id(), error = %e, "Violation not recorded");
                }
            }
        }
        (recorded, breach)
    }

    fn close(&mut self, at: DateTime<Utc>, reason: &dyn std::fmt::Display) {
        let from = self.status();
        if let Err(e) = self.tracker.terminate(at) {
            warn!(session_id = %self.session_id(), error = %e, "Termination rejected");
            return;
        }
        info!(session_id = %self.session_id(), %reason, "Session terminated");
        self.raise(ProctorAlert::terminated(self.session_id(), reason, at));
        self.note_transition(from, at);
    }

    fn fault(&mut self, err: AggregationError, at: DateTime<Utc>) {
        let session_id = self.session_id();
        error!(session_id = %session_id, error = %err, "Aggregation fault; moving session to review");
        let from = self.status();
        if let Err(e) = self.tracker.escalate_to_review(at) {
            error!(session_id = %session_id, error = %e, "Could not move faulted session to review");
        }
        self.raise(ProctorAlert::system_issue(session_id, &err, at));
        self.note_transition(from, at);
    }

    pub fn pause(&mut self, at: DateTime<Utc>) -> Result<(), MonitorError> {
        let from = self.status();
        self.tracker.pause(at)?;
        self.note_transition(from, at);
        Ok(())
    }

    pub fn resume(&mut self, at: DateTime<Utc>) -> Result<(), MonitorError> {
        let from = self.status();
        self.tracker.resume(at)?;
        self.note_transition(from, at);
        Ok(())
    }

    /// End the exam, flushing held violations first. Returns the resulting
    /// status: Completed, UnderReview, or Terminated if the flushed
    /// violations crossed the threshold.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<SessionStatus, MonitorError> {
        let status = self.status();
        if status.is_terminal() || status == SessionStatus::UnderReview {
            return Err(SessionError::InvalidTransition {
                from: status,
                to: SessionStatus::Completed,
            }
            .into());
        }
        let flushed = self.flush_pipeline();
        self.commit(flushed, at);

        let from = self.status();
        if !from.accepts_samples() {
            return Ok(from);
        }
        let to = self.tracker.complete(at)?;
        self.note_transition(from, at);
        Ok(to)
    }

    /// End an exam whose time limit has passed. Resolves like
    /// [`SessionMonitor::complete`] and raises a session-timeout alert.
    pub fn expire(&mut self, at: DateTime<Utc>) -> Result<SessionStatus, MonitorError> {
        let status = self.complete(at)?;
        info!(session_id = %self.session_id(), ?status, "Session time limit reached");
        self.raise(ProctorAlert::session_timeout(self.session_id(), at));
        Ok(status)
    }

    /// Terminate on an external decision (proctor action, integrity check)
    pub fn terminate(&mut self, at: DateTime<Utc>, reason: &str) -> Result<(), MonitorError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(SessionError::Closed(self.session_id()).into());
        }
        if status.accepts_samples() {
            let flushed = self.flush_pipeline();
            self.commit(flushed, at);
        }
        if self.status() != SessionStatus::Terminated {
            self.close(at, &reason);
        }
        Ok(())
    }

    pub fn finalize_review(
        &mut self,
        outcome: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let from = self.status();
        self.tracker.finalize_review(outcome, at)?;
        self.note_transition(from, at);
        Ok(())
    }

    pub fn resolve_violation(
        &mut self,
        id: ViolationId,
        resolution: &str,
        reviewed_by: &str,
    ) -> Result<ViolationEvent, MonitorError> {
        Ok(self.tracker.resolve_violation(id, resolution, reviewed_by)?)
    }

    pub fn acknowledge_alert(&mut self, id: Uuid, by: &str, at: DateTime<Utc>) -> bool {
        self.alerts
            .iter_mut()
            .find(|a| a.id == id)
            .is_some_and(|a| a.acknowledge(by, at))
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionRiskState {
        self.tracker.snapshot(now)
    }
}

/// Single-threaded monitoring engine for many sessions.
///
/// Sessions share nothing; each has its own monitor and buffers.
#[derive(Debug, Default)]
pub struct MonitorEngine {
    config: EngineConfig,
    ingestor: SampleIngestor,
    sessions: HashMap<SessionId, SessionMonitor>,
}

impl MonitorEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            ingestor: SampleIngestor::new(config.ingest.clone()),
            sessions: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a session and start accepting its samples
    pub fn open_session(&mut self, session: Session) -> Result<SessionId, MonitorError> {
        session.settings.validate()?;
        let id = session.id;
        self.ingestor.register(id);
        self.sessions
            .insert(id, SessionMonitor::new(session, &self.config));
        info!(session_id = %id, "Session opened");
        Ok(id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn monitor(&self, session_id: SessionId) -> Result<&SessionMonitor, MonitorError> {
        self.sessions
            .get(&session_id)
            .ok_or_else(|| IngestError::UnknownSession(session_id).into())
    }

    fn monitor_mut(&mut self, session_id: SessionId) -> Result<&mut SessionMonitor, MonitorError> {
        self.sessions
            .get_mut(&session_id)
            .ok_or_else(|| IngestError::UnknownSession(session_id).into())
    }

    /// Close the ingestor for sessions that no longer take samples
    fn sync_ingestor(&mut self, session_id: SessionId) {
        let open = self
            .sessions
            .get(&session_id)
            .is_some_and(|m| m.status().accepts_samples());
        if !open && self.ingestor.is_open(session_id) {
            self.ingestor.close(session_id);
        }
    }

    pub fn start_calibration(
        &mut self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        self.monitor_mut(session_id)?.start_calibration(at)
    }

    pub fn use_calibration(
        &mut self,
        session_id: SessionId,
        profile: CalibrationProfile,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        self.monitor_mut(session_id)?.use_calibration(profile, at)
    }

    pub fn finish_calibration(
        &mut self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<CalibrationProfile, MonitorError> {
        self.monitor_mut(session_id)?.finish_calibration(at)
    }

    /// Process a sample against the current server time
    pub fn process(
        &mut self,
        session_id: SessionId,
        record: SampleRecord,
    ) -> Result<Vec<ViolationEvent>, MonitorError> {
        self.process_at(session_id, record, Utc::now())
    }

    /// Process a sample against an explicit server time.
    ///
    /// # Returns
    /// Violations finalized by this sample. Alerts and status changes are
    /// published through [`MonitorEngine::drain_events`].
    pub fn process_at(
        &mut self,
        session_id: SessionId,
        record: SampleRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<ViolationEvent>, MonitorError> {
        let monitor = self
            .sessions
            .get_mut(&session_id)
            .ok_or(IngestError::UnknownSession(session_id))?;
        if !monitor.status().accepts_samples() {
            self.ingestor.close(session_id);
            return Err(IngestError::SessionClosed(session_id).into());
        }

        let stored = self.ingestor.ingest_at(session_id, record, now)?.clone();
        let modality = stored.modality();

        let events = match monitor.status() {
            SessionStatus::Calibrating => {
                if let Err(e) = monitor.observe_calibration(stored) {
                    warn!(session_id = %session_id, error = %e, "Calibration sample not used");
                }
                Vec::new()
            }
            SessionStatus::InProgress => {
                let candidates = match self.ingestor.buffer(session_id, modality) {
                    Some(buffer) => {
                        monitor
                            .policy()
                            .evaluate(&stored, buffer, monitor.calibration_profile())
                    }
                    None => Vec::new(),
                };
                monitor.accept(modality, stored.timestamp, candidates)
            }
            // Buffered for context only
            _ => Vec::new(),
        };

        self.sync_ingestor(session_id);
        Ok(events)
    }

    pub fn pause(&mut self, session_id: SessionId, at: DateTime<Utc>) -> Result<(), MonitorError> {
        self.monitor_mut(session_id)?.pause(at)
    }

    pub fn resume(&mut self, session_id: SessionId, at: DateTime<Utc>) -> Result<(), MonitorError> {
        self.monitor_mut(session_id)?.resume(at)
    }

    pub fn complete(
        &mut self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<SessionStatus, MonitorError> {
        let status = self.monitor_mut(session_id)?.complete(at)?;
        self.sync_ingestor(session_id);
        Ok(status)
    }

    pub fn expire(
        &mut self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<SessionStatus, MonitorError> {
        let status = self.monitor_mut(session_id)?.expire(at)?;
        self.sync_ingestor(session_id);
        Ok(status)
    }

    pub fn terminate(
        &mut self,
        session_id: SessionId,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), MonitorError> {
        self.monitor_mut(session_id)?.terminate(at, reason)?;
        self.sync_ingestor(session_id);
        Ok(())
    }

    pub fn finalize_review(
        &mut self,
        session_id: SessionId,
        outcome: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        self.monitor_mut(session_id)?.finalize_review(outcome, at)
    }

    pub fn resolve_violation(
        &mut self,
        session_id: SessionId,
        id: ViolationId,
        resolution: &str,
        reviewed_by: &str,
    ) -> Result<ViolationEvent, MonitorError> {
        self.monitor_mut(session_id)?
            .resolve_violation(id, resolution, reviewed_by)
    }

    /// Mark a proctor alert as seen. Returns false if it was already
    /// acknowledged or is not known.
    pub fn acknowledge_alert(
        &mut self,
        session_id: SessionId,
        alert_id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, MonitorError> {
        Ok(self.monitor_mut(session_id)?.acknowledge_alert(alert_id, by, at))
    }

    pub fn snapshot(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<SessionRiskState, MonitorError> {
        Ok(self.monitor(session_id)?.snapshot(now))
    }

    pub fn drain_events(&mut self, session_id: SessionId) -> Result<Vec<MonitorEvent>, MonitorError> {
        Ok(self.monitor_mut(session_id)?.drain_events())
    }

    pub fn calibration_profile(
        &self,
        session_id: SessionId,
    ) -> Result<Option<&CalibrationProfile>, MonitorError> {
        Ok(self.monitor(session_id)?.calibration_profile())
    }

    pub fn session(&self, session_id: SessionId) -> Result<&Session, MonitorError> {
        Ok(self.monitor(session_id)?.session())
    }
}

/// Session description used to replay recorded samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub student_id: String,
    pub exam_id: String,
    #[serde(default)]
    pub settings: ExamSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_hash: Option<String>,
    /// Stored baseline; when absent the first samples calibrate the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationProfile>,
}

impl SessionManifest {
    /// Build the session this manifest describes, started at `start`
    pub fn to_session(&self, session_id: SessionId, start: DateTime<Utc>) -> Session {
        let session = Session::new(
            self.student_id.clone(),
            self.exam_id.clone(),
            self.settings.clone(),
            start,
        )
        .with_id(session_id);
        match &self.identity_hash {
            Some(hash) => session.with_identity_hash(hash.clone()),
            None => session,
        }
    }
}

/// Outcome of replaying one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub violations: Vec<ViolationEvent>,
    pub alerts: Vec<ProctorAlert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationProfile>,
    pub final_state: SessionRiskState,
    pub samples_processed: usize,
    pub samples_dropped: usize,
}

/// Replay a recorded, time-ordered sample stream through a fresh engine.
///
/// Sample timestamps stand in for server time. The session is completed at
/// the last sample unless it already ended.
pub fn replay(
    manifest: &SessionManifest,
    records: Vec<SampleRecord>,
    config: &EngineConfig,
) -> Result<ReplayReport, MonitorError> {
    let start = records.first().map(|r| r.timestamp).unwrap_or_else(Utc::now);
    let end = records.last().map(|r| r.timestamp).unwrap_or(start);
    let session_id = manifest
        .session_id
        .or_else(|| records.first().map(|r| r.session_id))
        .unwrap_or_default();

    let mut engine = MonitorEngine::new(config.clone());
    engine.open_session(manifest.to_session(session_id, start))?;
    match &manifest.calibration {
        Some(profile) => engine.use_calibration(session_id, profile.clone(), start)?,
        None => engine.start_calibration(session_id, start)?,
    }

    let mut processed = 0;
    let mut dropped = 0;
    for record in records {
        let now = record.timestamp;
        match engine.process_at(session_id, record, now) {
            Ok(_) => processed += 1,
            Err(e) => {
                dropped += 1;
                warn!(session_id = %session_id, error = %e, "Sample dropped during replay");
            }
        }
    }

    let status = engine.session(session_id)?.status();
    if status == SessionStatus::Calibrating {
        if let Err(e) = engine.finish_calibration(session_id, end) {
            warn!(session_id = %session_id, error = %e, "Replay ended before calibration succeeded");
        }
    }
    if matches!(
        engine.session(session_id)?.status(),
        SessionStatus::InProgress | SessionStatus::Paused
    ) {
        engine.complete(session_id, end)?;
    }

    let monitor = engine.monitor(session_id)?;
    Ok(ReplayReport {
        session_id,
        status: monitor.status(),
        violations: monitor.session().violations().to_vec(),
        alerts: monitor.alerts().to_vec(),
        calibration: monitor.calibration_profile().cloned(),
        final_state: monitor.snapshot(end),
        samples_processed: processed,
        samples_dropped: dropped,
    })
}
