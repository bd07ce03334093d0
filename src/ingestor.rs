//! Sample ingestion and rolling buffers
//!
//! The ingestor admits samples for open sessions, rejects clock-skewed ones,
//! normalizes timestamps so each (session, modality) stream is non-decreasing,
//! and keeps a bounded rolling window per stream as evaluator context.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::sample::SampleRecord;
use crate::types::{Modality, SessionId};

/// Bounded, time-ordered window of recent samples for one stream.
///
/// Holds at most `capacity` samples and nothing older than `max_age` relative
/// to the newest sample, whichever is smaller.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    samples: VecDeque<SampleRecord>,
    capacity: usize,
    max_age: Duration,
}

impl RollingBuffer {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            max_age,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.buffer_capacity, config.buffer_max_age())
    }

    /// Append a sample, clamping its timestamp to the newest buffered one.
    ///
    /// Returns the number of samples evicted.
    pub fn push(&mut self, mut record: SampleRecord) -> usize {
        if let Some(last) = self.samples.back() {
            if record.timestamp < last.timestamp {
                debug!(
                    modality = ?record.modality(),
                    late_by_ms = (last.timestamp - record.timestamp).num_milliseconds(),
                    "Normalizing out-of-order sample timestamp"
                );
                record.timestamp = last.timestamp;
            }
        }

        let newest = record.timestamp;
        self.samples.push_back(record);

        let mut evicted = 0;
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
            evicted += 1;
        }
        while let Some(front) = self.samples.front() {
            if newest - front.timestamp > self.max_age {
                self.samples.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    pub fn latest(&self) -> Option<&SampleRecord> {
        self.samples.back()
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(|s| s.timestamp)
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SampleRecord> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Reject samples stamped further in the future than the allowed skew
pub fn check_clock_skew(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    max_skew: Duration,
) -> Result<(), IngestError> {
    let skew = timestamp - now;
    if skew > max_skew {
        return Err(IngestError::ClockSkew {
            timestamp,
            skew_ms: skew.num_milliseconds(),
        });
    }
    Ok(())
}

#[derive(Debug)]
struct SessionBuffers {
    closed: bool,
    buffers: [RollingBuffer; 5],
}

impl SessionBuffers {
    fn new(config: &IngestConfig) -> Self {
        Self {
            closed: false,
            buffers: std::array::from_fn(|_| RollingBuffer::from_config(config)),
        }
    }
}

/// Per-session, per-modality sample admission and buffering
#[derive(Debug)]
pub struct SampleIngestor {
    config: IngestConfig,
    sessions: HashMap<SessionId, SessionBuffers>,
}

impl Default for SampleIngestor {
    fn default() -> Self {
        Self::new(IngestConfig::default())
    }
}

impl SampleIngestor {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Start accepting samples for a session
    pub fn register(&mut self, session_id: SessionId) {
        self.sessions
            .entry(session_id)
            .or_insert_with(|| SessionBuffers::new(&self.config));
    }

    /// Stop accepting samples; buffered samples are discarded
    pub fn close(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.closed = true;
            for buffer in session.buffers.iter_mut() {
                buffer.clear();
            }
        }
    }

    pub fn is_open(&self, session_id: SessionId) -> bool {
        self.sessions
            .get(&session_id)
            .is_some_and(|s| !s.closed)
    }

    /// Admit a sample using the current server time
    pub fn ingest(&mut self, session_id: SessionId, sample: SampleRecord) -> Result<(), IngestError> {
        self.ingest_at(session_id, sample, Utc::now()).map(|_| ())
    }

    /// Admit a sample against an explicit server time.
    ///
    /// Returns the buffered record with its normalized timestamp.
    pub fn ingest_at(
        &mut self,
        session_id: SessionId,
        sample: SampleRecord,
        now: DateTime<Utc>,
    ) -> Result<&SampleRecord, IngestError> {
        if sample.session_id != session_id {
            return Err(IngestError::UnknownSession(sample.session_id));
        }
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(IngestError::UnknownSession(session_id))?;
        if session.closed {
            return Err(IngestError::SessionClosed(session_id));
        }
        if let Err(e) = check_clock_skew(sample.timestamp, now, self.config.max_clock_skew()) {
            warn!(session_id = %session_id, error = %e, "Dropping clock-skewed sample");
            return Err(e);
        }
        if let Err(e) = sample.check() {
            warn!(session_id = %session_id, error = %e, "Dropping malformed sample");
            return Err(IngestError::Malformed(e));
        }

        let modality = sample.modality();
        let buffer = &mut session.buffers[modality.index()];
        let evicted = buffer.push(sample);
        if evicted > 0 {
            debug!(session_id = %session_id, ?modality, evicted, "Evicted stale samples");
        }

        buffer
            .latest()
            .ok_or(IngestError::BufferOverflow { modality })
    }

    pub fn buffer(&self, session_id: SessionId, modality: Modality) -> Option<&RollingBuffer> {
        self.sessions
            .get(&session_id)
            .map(|s| &s.buffers[modality.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvaluationError;
    use crate::sample::{FaceSample, Sample, ScreenSample};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap()
    }

    fn face_at(sid: SessionId, offset_secs: i64) -> SampleRecord {
        SampleRecord::new(
            sid,
            t0() + Duration::seconds(offset_secs),
            Sample::Face(FaceSample {
                face_detected: true,
                face_count: 1,
                confidence: 0.9,
                position: None,
                is_looking_at_screen: true,
                eye_gaze_confidence: 0.8,
                liveness_detected: true,
                emotions: None,
                face_encoding_hash: None,
            }),
        )
    }

    #[test]
    fn test_buffer_capacity_eviction() {
        let sid = SessionId::new();
        let mut buffer = RollingBuffer::new(10, Duration::seconds(300));
        for i in 0..15 {
            buffer.push(face_at(sid, i));
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.iter().next().unwrap().timestamp, t0() + Duration::seconds(5));
    }

    #[test]
    fn test_buffer_age_eviction() {
        let sid = SessionId::new();
        let mut buffer = RollingBuffer::new(10, Duration::seconds(30));
        buffer.push(face_at(sid, 0));
        buffer.push(face_at(sid, 20));
        let evicted = buffer.push(face_at(sid, 45));
        assert_eq!(evicted, 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_buffer_normalizes_late_timestamp() {
        let sid = SessionId::new();
        let mut buffer = RollingBuffer::new(10, Duration::seconds(30));
        buffer.push(face_at(sid, 10));
        buffer.push(face_at(sid, 7));
        let stamps: Vec<_> = buffer.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps[1], t0() + Duration::seconds(10));
    }

    #[test]
    fn test_ingest_unknown_session() {
        let mut ingestor = SampleIngestor::default();
        let sid = SessionId::new();
        let err = ingestor.ingest_at(sid, face_at(sid, 0), t0()).unwrap_err();
        assert_eq!(err, IngestError::UnknownSession(sid));
    }

    #[test]
    fn test_ingest_closed_session() {
        let mut ingestor = SampleIngestor::default();
        let sid = SessionId::new();
        ingestor.register(sid);
        ingestor.ingest_at(sid, face_at(sid, 0), t0()).unwrap();
        assert!(ingestor.is_open(sid));
        ingestor.close(sid);
        assert!(!ingestor.is_open(sid));

        let err = ingestor.ingest_at(sid, face_at(sid, 1), t0()).unwrap_err();
        assert_eq!(err, IngestError::SessionClosed(sid));
        assert!(ingestor.buffer(sid, Modality::Face).unwrap().is_empty());
    }

    #[test]
    fn test_ingest_clock_skew() {
        let mut ingestor = SampleIngestor::default();
        let sid = SessionId::new();
        ingestor.register(sid);

        // 4s ahead is tolerated, 6s is not
        assert!(ingestor.ingest_at(sid, face_at(sid, 4), t0()).is_ok());
        let err = ingestor.ingest_at(sid, face_at(sid, 6), t0()).unwrap_err();
        assert!(matches!(err, IngestError::ClockSkew { skew_ms: 6000, .. }));
    }

    #[test]
    fn test_ingest_routes_by_modality() {
        let mut ingestor = SampleIngestor::default();
        let sid = SessionId::new();
        ingestor.register(sid);

        ingestor.ingest_at(sid, face_at(sid, 0), t0()).unwrap();
        let screen = SampleRecord::new(
            sid,
            t0(),
            Sample::Screen(ScreenSample {
                is_full_screen: true,
                tab_switch_detected: false,
                window_change_detected: false,
                screenshot_attempted: false,
                print_screen_detected: false,
                virtual_machine_detected: false,
                remote_desktop_detected: false,
                running_processes: vec![],
                suspicious_applications: vec![],
                monitor_count: None,
            }),
        );
        ingestor.ingest_at(sid, screen, t0()).unwrap();

        assert_eq!(ingestor.buffer(sid, Modality::Face).unwrap().len(), 1);
        assert_eq!(ingestor.buffer(sid, Modality::Screen).unwrap().len(), 1);
        assert!(ingestor.buffer(sid, Modality::Audio).unwrap().is_empty());
    }

    #[test]
    fn test_ingest_drops_malformed_sample_before_buffering() {
        let mut ingestor = SampleIngestor::default();
        let sid = SessionId::new();
        ingestor.register(sid);

        let mut bad = face_at(sid, 0);
        if let Sample::Face(face) = &mut bad.payload {
            face.confidence = 7.0;
        }
        let err = ingestor.ingest_at(sid, bad, t0()).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Malformed(EvaluationError::MalformedSample {
                modality: Modality::Face,
                ..
            })
        ));
        assert!(ingestor.buffer(sid, Modality::Face).unwrap().is_empty());

        ingestor.ingest_at(sid, face_at(sid, 1), t0()).unwrap();
        assert_eq!(ingestor.buffer(sid, Modality::Face).unwrap().len(), 1);
    }

    #[test]
    fn test_ingest_rejects_mismatched_session() {
        let mut ingestor = SampleIngestor::default();
        let sid = SessionId::new();
        let other = SessionId::new();
        ingestor.register(sid);
        let err = ingestor.ingest_at(sid, face_at(other, 0), t0()).unwrap_err();
        assert_eq!(err, IngestError::UnknownSession(other));
    }
}
