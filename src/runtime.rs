//! Async monitoring runtime
//!
//! Each session runs as one actor task that owns its [`SessionMonitor`], fed
//! by five worker tasks, one per modality. Workers own their modality's
//! rolling buffer and run the evaluator; the actor merges their output,
//! aggregates and scores. Sessions share nothing.
//!
//! ```text
//! submit ─▶ [face q] ─▶ face worker ─┐
//!        ─▶ [audio q] ─▶ audio worker ─┤
//!        ─▶ ...                        ├─▶ session actor ─▶ broadcast<MonitorEvent>
//!        ─▶ [env q] ─▶ env worker ─────┘         │
//!                                                └─▶ watch<status>, watch<calibration>
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{IngestError, MonitorError};
use crate::ingestor::{check_clock_skew, RollingBuffer};
use crate::pipeline::{MonitorEvent, SamplePolicy, SessionMonitor};
use crate::sample::SampleRecord;
use crate::session::Session;
use crate::types::{
    CalibrationProfile, CandidateViolation, Modality, SessionId, SessionRiskState,
    SessionStatus, ViolationEvent, ViolationId,
};

/// Capacity of each session's event stream
const EVENT_CHANNEL_CAPACITY: usize = 1024;

type Reply<T> = oneshot::Sender<Result<T, MonitorError>>;

enum Command {
    Evaluated {
        modality: Modality,
        timestamp: DateTime<Utc>,
        candidates: Vec<CandidateViolation>,
    },
    Calibrate(SampleRecord),
    StartCalibration {
        at: DateTime<Utc>,
        reply: Reply<()>,
    },
    UseCalibration {
        profile: CalibrationProfile,
        at: DateTime<Utc>,
        reply: Reply<()>,
    },
    FinishCalibration {
        at: DateTime<Utc>,
        reply: Reply<CalibrationProfile>,
    },
    Pause {
        at: DateTime<Utc>,
        reply: Reply<()>,
    },
    Resume {
        at: DateTime<Utc>,
        reply: Reply<()>,
    },
    Complete {
        at: DateTime<Utc>,
        reply: Reply<SessionStatus>,
    },
    Terminate {
        at: DateTime<Utc>,
        reason: String,
        reply: Reply<()>,
    },
    FinalizeReview {
        outcome: SessionStatus,
        at: DateTime<Utc>,
        reply: Reply<()>,
    },
    Resolve {
        id: ViolationId,
        resolution: String,
        reviewed_by: String,
        reply: Reply<ViolationEvent>,
    },
    Snapshot {
        now: DateTime<Utc>,
        reply: oneshot::Sender<SessionRiskState>,
    },
}

/// Spawns session actors on the ambient Tokio runtime
#[derive(Debug, Clone, Default)]
pub struct MonitorRuntime {
    config: Arc<EngineConfig>,
}

impl MonitorRuntime {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start monitoring tasks for a session.
    ///
    /// Must be called from within a Tokio runtime. The tasks stop once every
    /// clone of the returned handle is dropped.
    pub fn open_session(&self, session: Session) -> Result<SessionHandle, MonitorError> {
        session.settings.validate()?;
        let id = session.id;
        let ingest = &self.config.ingest;

        let policy = Arc::new(SamplePolicy::for_session(&session, &self.config));
        let (status_tx, status_rx) = watch::channel(session.status());
        let (calibration_tx, calibration_rx) = watch::channel(session.calibration().cloned());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(ingest.queue_capacity);

        let monitor = SessionMonitor::new(session, &self.config);
        tokio::spawn(run_actor(
            monitor,
            command_rx,
            Outlets {
                events: events_tx.clone(),
                status: status_tx,
                calibration: calibration_tx,
            },
        ));

        let samples = Modality::ALL.map(|modality| {
            let (tx, rx) = mpsc::channel(ingest.queue_capacity);
            tokio::spawn(run_worker(Worker {
                session_id: id,
                modality,
                samples: rx,
                buffer: RollingBuffer::from_config(ingest),
                policy: Arc::clone(&policy),
                status: status_rx.clone(),
                calibration: calibration_rx.clone(),
                commands: command_tx.clone(),
                budget: ingest.time_budget(),
            }));
            tx
        });

        info!(session_id = %id, "Session runtime started");
        Ok(SessionHandle {
            id,
            samples: Arc::new(samples),
            commands: command_tx,
            events: events_tx,
            status: status_rx,
            calibration: calibration_rx,
            max_skew: ingest.max_clock_skew(),
        })
    }
}

/// Client side of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    samples: Arc<[mpsc::Sender<SampleRecord>; 5]>,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<MonitorEvent>,
    status: watch::Receiver<SessionStatus>,
    calibration: watch::Receiver<Option<CalibrationProfile>>,
    max_skew: chrono::Duration,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Evaluated { .. } => "Evaluated",
            Command::Calibrate(_) => "Calibrate",
            Command::StartCalibration { .. } => "StartCalibration",
            Command::UseCalibration { .. } => "UseCalibration",
            Command::FinishCalibration { .. } => "FinishCalibration",
            Command::Pause { .. } => "Pause",
            Command::Resume { .. } => "Resume",
            Command::Complete { .. } => "Complete",
            Command::Terminate { .. } => "Terminate",
            Command::FinalizeReview { .. } => "FinalizeReview",
            Command::Resolve { .. } => "Resolve",
            Command::Snapshot { .. } => "Snapshot",
        };
        f.write_str(name)
    }
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn calibration_profile(&self) -> Option<CalibrationProfile> {
        self.calibration.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Queue a sample against the current server time
    pub fn submit(&self, record: SampleRecord) -> Result<(), MonitorError> {
        self.submit_at(record, Utc::now())
    }

    /// Queue a sample without waiting.
    ///
    /// # Errors
    /// * `SessionClosed` once the session stopped accepting samples
    /// * `ClockSkew` for samples stamped too far ahead of `now`
    /// * `Malformed` for samples failing schema validation; nothing is buffered
    /// * `BufferOverflow` when the modality's queue is full
    pub fn submit_at(&self, record: SampleRecord, now: DateTime<Utc>) -> Result<(), MonitorError> {
        if record.session_id != self.id {
            return Err(IngestError::UnknownSession(record.session_id).into());
        }
        if !self.status().accepts_samples() {
            return Err(IngestError::SessionClosed(self.id).into());
        }
        if let Err(e) = check_clock_skew(record.timestamp, now, self.max_skew) {
            warn!(session_id = %self.id, error = %e, "Dropping clock-skewed sample");
            return Err(e.into());
        }
        if let Err(e) = record.check() {
            warn!(session_id = %self.id, error = %e, "Dropping malformed sample");
            return Err(IngestError::Malformed(e).into());
        }

        let modality = record.modality();
        match self.samples[modality.index()].try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %self.id, ?modality, "Sample queue full; dropping sample");
                Err(IngestError::BufferOverflow { modality }.into())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(MonitorError::RuntimeStopped(self.id)),
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| MonitorError::RuntimeStopped(self.id))?;
        rx.await.map_err(|_| MonitorError::RuntimeStopped(self.id))
    }

    pub async fn start_calibration(&self, at: DateTime<Utc>) -> Result<(), MonitorError> {
        self.request(|reply| Command::StartCalibration { at, reply })
            .await?
    }

    pub async fn use_calibration(
        &self,
        profile: CalibrationProfile,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        self.request(|reply| Command::UseCalibration { profile, at, reply })
            .await?
    }

    pub async fn finish_calibration(
        &self,
        at: DateTime<Utc>,
    ) -> Result<CalibrationProfile, MonitorError> {
        self.request(|reply| Command::FinishCalibration { at, reply })
            .await?
    }

    pub async fn pause(&self, at: DateTime<Utc>) -> Result<(), MonitorError> {
        self.request(|reply| Command::Pause { at, reply }).await?
    }

    pub async fn resume(&self, at: DateTime<Utc>) -> Result<(), MonitorError> {
        self.request(|reply| Command::Resume { at, reply }).await?
    }

    pub async fn complete(&self, at: DateTime<Utc>) -> Result<SessionStatus, MonitorError> {
        self.request(|reply| Command::Complete { at, reply }).await?
    }

    pub async fn terminate(
        &self,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<(), MonitorError> {
        let reason = reason.into();
        self.request(|reply| Command::Terminate { at, reason, reply })
            .await?
    }

    pub async fn finalize_review(
        &self,
        outcome: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        self.request(|reply| Command::FinalizeReview { outcome, at, reply })
            .await?
    }

    pub async fn resolve_violation(
        &self,
        id: ViolationId,
        resolution: impl Into<String>,
        reviewed_by: impl Into<String>,
    ) -> Result<ViolationEvent, MonitorError> {
        let resolution = resolution.into();
        let reviewed_by = reviewed_by.into();
        self.request(|reply| Command::Resolve {
            id,
            resolution,
            reviewed_by,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<SessionRiskState, MonitorError> {
        self.request(|reply| Command::Snapshot { now, reply }).await
    }
}

/// Where the actor publishes state after every command
struct Outlets {
    events: broadcast::Sender<MonitorEvent>,
    status: watch::Sender<SessionStatus>,
    calibration: watch::Sender<Option<CalibrationProfile>>,
}

impl Outlets {
    /// Watches first, so a subscriber reacting to an event sees the new state
    fn publish(&self, monitor: &mut SessionMonitor) {
        self.status.send_if_modified(|current| {
            let next = monitor.status();
            let changed = *current != next;
            *current = next;
            changed
        });
        if self.calibration.borrow().is_none() {
            if let Some(profile) = monitor.calibration_profile() {
                self.calibration.send_replace(Some(profile.clone()));
            }
        }
        for event in monitor.drain_events() {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }
}

async fn run_actor(
    mut monitor: SessionMonitor,
    mut commands: mpsc::Receiver<Command>,
    outlets: Outlets,
) {
    let session_id = monitor.session_id();
    while let Some(command) = commands.recv().await {
        debug!(session_id = %session_id, ?command, "Session command");
        match command {
            Command::Evaluated {
                modality,
                timestamp,
                candidates,
            } => {
                monitor.accept(modality, timestamp, candidates);
                outlets.publish(&mut monitor);
            }
            Command::Calibrate(record) => {
                if let Err(e) = monitor.observe_calibration(record) {
                    debug!(session_id = %session_id, error = %e, "Calibration sample not used");
                }
                outlets.publish(&mut monitor);
            }
            Command::StartCalibration { at, reply } => {
                let result = monitor.start_calibration(at);
                outlets.publish(&mut monitor);
                let _ = reply.send(result);
            }
            Command::UseCalibration { profile, at, reply } => {
                let result = monitor.use_calibration(profile, at);
                outlets.publish(&mut monitor);
                let _ = reply.send(result);
            }
            Command::FinishCalibration { at, reply } => {
                let result = monitor.finish_calibration(at);
                outlets.publish(&mut monitor);
                let _ = reply.send(result);
            }
            Command::Pause { at, reply } => {
                let result = monitor.pause(at);
                outlets.publish(&mut monitor);
                let _ = reply.send(result);
            }
            Command::Resume { at, reply } => {
                let result = monitor.resume(at);
                outlets.publish(&mut monitor);
                let _ = reply.send(result);
            }
            Command::Complete { at, reply } => {
                let result = monitor.complete(at);
                outlets.publish(&mut monitor);
                let _ = reply.send(result);
            }
            Command::Terminate { at, reason, reply } => {
                let result = monitor.terminate(at, &reason);
                outlets.publish(&mut monitor);
                let _ = reply.send(result);
            }
            Command::FinalizeReview { outcome, at, reply } => {
                let result = monitor.finalize_review(outcome, at);
                outlets.publish(&mut monitor);
                let _ = reply.send(result);
            }
            Command::Resolve {
                id,
                resolution,
                reviewed_by,
                reply,
            } => {
                let _ = reply.send(monitor.resolve_violation(id, &resolution, &reviewed_by));
            }
            Command::Snapshot { now, reply } => {
                let _ = reply.send(monitor.snapshot(now));
            }
        }
    }
    debug!(session_id = %session_id, "Session actor stopped");
}

struct Worker {
    session_id: SessionId,
    modality: Modality,
    samples: mpsc::Receiver<SampleRecord>,
    buffer: RollingBuffer,
    policy: Arc<SamplePolicy>,
    status: watch::Receiver<SessionStatus>,
    calibration: watch::Receiver<Option<CalibrationProfile>>,
    commands: mpsc::Sender<Command>,
    budget: Duration,
}

async fn run_worker(mut worker: Worker) {
    let session_id = worker.session_id;
    let modality = worker.modality;
    while let Some(record) = worker.samples.recv().await {
        let current = *worker.status.borrow();
        if !current.accepts_samples() {
            // Drain in-flight samples of a closed session
            worker.buffer.clear();
            continue;
        }

        worker.buffer.push(record);
        let Some(stored) = worker.buffer.latest().cloned() else {
            continue;
        };

        let command = match current {
            SessionStatus::Calibrating => Command::Calibrate(stored),
            SessionStatus::InProgress => {
                let profile = worker.calibration.borrow().clone();
                let candidates = worker
                    .policy
                    .evaluate(&stored, &worker.buffer, profile.as_ref());
                Command::Evaluated {
                    modality,
                    timestamp: stored.timestamp,
                    candidates,
                }
            }
            _ => continue,
        };

        match timeout(worker.budget, worker.commands.send(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    ?modality,
                    budget_ms = worker.budget.as_millis() as u64,
                    "Time budget exceeded; dropping late sample"
                );
            }
        }
    }
    debug!(session_id = %session_id, ?modality, "Modality worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExamSettings;
    use crate::sample::{AudioSample, FaceSample, Sample, ScreenSample};
    use crate::types::{FacePosition, ViolationType};

    const WAIT: Duration = Duration::from_secs(5);

    fn base() -> DateTime<Utc> {
        Utc::now() - chrono::Duration::seconds(120)
    }

    fn profile(at: DateTime<Utc>) -> CalibrationProfile {
        CalibrationProfile {
            optimal_face_position: FacePosition::default(),
            baseline_eye_gaze: 0.8,
            background_noise_level: 0.1,
            optimal_lighting: 0.7,
            calibration_completed: true,
            calibration_time: at,
            sample_count: 5,
            calibration_notes: String::new(),
        }
    }

    fn screen(full_screen: bool, vm: bool) -> Sample {
        Sample::Screen(ScreenSample {
            is_full_screen: full_screen,
            tab_switch_detected: false,
            window_change_detected: false,
            screenshot_attempted: false,
            print_screen_detected: false,
            virtual_machine_detected: vm,
            remote_desktop_detected: false,
            running_processes: vec![],
            suspicious_applications: vec![],
            monitor_count: None,
        })
    }

    fn face() -> Sample {
        faces(1)
    }

    fn faces(count: u32) -> Sample {
        Sample::Face(FaceSample {
            face_detected: true,
            face_count: count,
            confidence: 0.9,
            position: None,
            is_looking_at_screen: true,
            eye_gaze_confidence: 0.8,
            liveness_detected: true,
            emotions: None,
            face_encoding_hash: None,
        })
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<MonitorEvent>,
        pred: impl Fn(&MonitorEvent) -> bool,
    ) -> MonitorEvent {
        timeout(WAIT, async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    async fn monitoring(settings: ExamSettings) -> (SessionHandle, DateTime<Utc>) {
        let start = base();
        let runtime = MonitorRuntime::default();
        let handle = runtime
            .open_session(Session::new("student", "exam", settings, start))
            .unwrap();
        handle.use_calibration(profile(start), start).await.unwrap();
        (handle, start)
    }

    fn at(start: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        start + chrono::Duration::seconds(secs)
    }

    #[tokio::test]
    async fn test_full_screen_exit_is_published() {
        let (handle, start) = monitoring(ExamSettings::default()).await;
        let mut events = handle.subscribe();
        let sid = handle.id();

        handle
            .submit(SampleRecord::new(sid, at(start, 1), screen(false, false)))
            .unwrap();
        handle
            .submit(SampleRecord::new(sid, at(start, 2), screen(false, false)))
            .unwrap();
        handle
            .submit(SampleRecord::new(sid, at(start, 13), screen(true, false)))
            .unwrap();

        let event = next_matching(&mut events, |e| matches!(e, MonitorEvent::Violation(_))).await;
        let MonitorEvent::Violation(violation) = event else {
            unreachable!()
        };
        assert_eq!(violation.violation_type, ViolationType::FullScreenExit);
        assert_eq!(handle.status(), SessionStatus::InProgress);

        let snap = handle.snapshot(at(start, 13)).await.unwrap();
        assert_eq!(snap.total_violations, 1);
        assert!(snap.current_score < 0.8);
    }

    #[tokio::test]
    async fn test_zero_tolerance_terminates_and_rejects_samples() {
        let settings = ExamSettings {
            zero_tolerance: true,
            ..ExamSettings::default()
        };
        let (handle, start) = monitoring(settings).await;
        let mut events = handle.subscribe();
        let sid = handle.id();

        handle
            .submit(SampleRecord::new(sid, at(start, 1), screen(true, true)))
            .unwrap();
        handle
            .submit(SampleRecord::new(sid, at(start, 12), screen(true, false)))
            .unwrap();

        next_matching(&mut events, |e| {
            matches!(
                e,
                MonitorEvent::StatusChanged {
                    to: SessionStatus::Terminated,
                    ..
                }
            )
        })
        .await;

        let err = handle
            .submit(SampleRecord::new(sid, at(start, 13), face()))
            .unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Ingest(IngestError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_full_queue_reports_overflow() {
        let runtime = MonitorRuntime::new(EngineConfig {
            ingest: crate::config::IngestConfig {
                queue_capacity: 1,
                ..Default::default()
            },
            ..Default::default()
        });
        let start = base();
        let handle = runtime
            .open_session(Session::new("s", "e", ExamSettings::default(), start))
            .unwrap();
        let sid = handle.id();

        // Current-thread runtime: workers do not run until this test yields
        handle
            .submit(SampleRecord::new(sid, at(start, 1), face()))
            .unwrap();
        let err = handle
            .submit(SampleRecord::new(sid, at(start, 2), face()))
            .unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Ingest(IngestError::BufferOverflow {
                modality: Modality::Face
            })
        ));

        // Other modalities have their own queues
        handle
            .submit(SampleRecord::new(sid, at(start, 2), screen(true, false)))
            .unwrap();
    }

    #[tokio::test]
    async fn test_clock_skew_rejected() {
        let runtime = MonitorRuntime::default();
        let handle = runtime
            .open_session(Session::new("s", "e", ExamSettings::default(), Utc::now()))
            .unwrap();
        let future = Utc::now() + chrono::Duration::seconds(30);
        let err = handle
            .submit(SampleRecord::new(handle.id(), future, face()))
            .unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Ingest(IngestError::ClockSkew { .. })
        ));
    }

    #[tokio::test]
    async fn test_calibration_from_streamed_samples() {
        let start = base();
        let runtime = MonitorRuntime::default();
        let handle = runtime
            .open_session(Session::new("s", "e", ExamSettings::default(), start))
            .unwrap();
        let mut status = handle.watch_status();
        handle.start_calibration(start).await.unwrap();
        assert_eq!(handle.status(), SessionStatus::Calibrating);

        for i in 0..=5 {
            handle
                .submit(SampleRecord::new(handle.id(), at(start, i), face()))
                .unwrap();
        }
        timeout(WAIT, status.wait_for(|s| *s == SessionStatus::InProgress))
            .await
            .unwrap()
            .unwrap();

        let profile = handle.calibration_profile().unwrap();
        assert!(profile.calibration_completed);
        assert_eq!(profile.sample_count, 6);

        let err = handle.start_calibration(at(start, 7)).await.unwrap_err();
        assert!(matches!(err, MonitorError::Calibration(_)));
    }

    #[tokio::test]
    async fn test_malformed_samples_rejected_before_calibration() {
        let start = base();
        let runtime = MonitorRuntime::default();
        let handle = runtime
            .open_session(Session::new("s", "e", ExamSettings::default(), start))
            .unwrap();
        let mut status = handle.watch_status();
        handle.start_calibration(start).await.unwrap();

        for i in 0..3 {
            let noisy = Sample::Audio(AudioSample {
                voice_level: 0.0,
                background_noise: -4.0,
                speaker_count: 0,
                voice_detected: false,
                multiple_voices_detected: false,
                confidence: 0.9,
                detected_words: vec![],
            });
            let err = handle
                .submit(SampleRecord::new(handle.id(), at(start, i), noisy))
                .unwrap_err();
            assert!(matches!(err, MonitorError::Ingest(IngestError::Malformed(_))));
        }
        for i in 0..=5 {
            handle
                .submit(SampleRecord::new(handle.id(), at(start, i), face()))
                .unwrap();
        }
        timeout(WAIT, status.wait_for(|s| *s == SessionStatus::InProgress))
            .await
            .unwrap()
            .unwrap();

        let profile = handle.calibration_profile().unwrap();
        assert_eq!(
            profile.background_noise_level,
            crate::config::CalibrationConfig::default().default_noise_level
        );
    }

    #[tokio::test]
    async fn test_silent_modality_does_not_hold_back_violations() {
        let (handle, start) = monitoring(ExamSettings::default()).await;
        let mut events = handle.subscribe();
        let sid = handle.id();
        handle.submit(SampleRecord::new(sid, at(start, 0), face())).unwrap();
        for (secs, full) in [(1, false), (2, false), (13, true)] {
            handle
                .submit(SampleRecord::new(sid, at(start, secs), screen(full, false)))
                .unwrap();
        }

        let event = next_matching(&mut events, |e| matches!(e, MonitorEvent::Violation(_))).await;
        let MonitorEvent::Violation(violation) = event else {
            unreachable!()
        };
        assert_eq!(violation.violation_type, ViolationType::FullScreenExit);
        assert_eq!(handle.status(), SessionStatus::InProgress);
    }

    #[tokio::test]
    async fn test_complete_flushes_and_routes_to_review() {
        let (handle, start) = monitoring(ExamSettings::default()).await;
        let mut events = handle.subscribe();
        let sid = handle.id();
        handle
            .submit(SampleRecord::new(sid, at(start, 1), faces(2)))
            .unwrap();
        // Let the face worker forward its evaluation
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = handle.complete(at(start, 3)).await.unwrap();
        assert_eq!(status, SessionStatus::UnderReview);
        next_matching(&mut events, |e| matches!(e, MonitorEvent::Violation(_))).await;
    }
}
