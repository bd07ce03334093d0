//! Violation debouncing and escalation
//!
//! Candidates of the same type that fall within the debounce window collapse
//! into one event carrying the first timestamp and the highest confidence
//! and severity seen. Windows are held until they are closed and no earlier
//! window is still open, so the emitted stream is non-decreasing in time even
//! though candidates come from five independently clocked evaluators.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::AggregationConfig;
use crate::error::AggregationError;
use crate::types::{
    CandidateViolation, SessionId, ViolationEvent, ViolationId, ViolationSeverity, ViolationType,
};

/// One debounce window for one violation type
#[derive(Debug, Clone)]
struct Window {
    violation_type: ViolationType,
    first_ts: DateTime<Utc>,
    confidence: f64,
    severity: ViolationSeverity,
    description: String,
    evidence: String,
    occurrences: usize,
}

impl Window {
    fn open(candidate: CandidateViolation) -> Self {
        Self {
            violation_type: candidate.violation_type,
            first_ts: candidate.timestamp,
            confidence: candidate.confidence,
            severity: candidate.severity,
            description: candidate.description,
            evidence: candidate.evidence,
            occurrences: 1,
        }
    }

    fn absorb(&mut self, candidate: CandidateViolation) {
        self.first_ts = self.first_ts.min(candidate.timestamp);
        self.confidence = self.confidence.max(candidate.confidence);
        if candidate.severity > self.severity {
            self.severity = candidate.severity;
            self.description = candidate.description;
            self.evidence = candidate.evidence;
        }
        self.occurrences += 1;
    }

    fn closes_at(&self, window: Duration) -> DateTime<Utc> {
        self.first_ts + window
    }
}

/// Per-session debouncing aggregator.
///
/// Bound to one session at construction; candidates for any other session
/// are rejected.
#[derive(Debug)]
pub struct ViolationAggregator {
    session_id: SessionId,
    config: AggregationConfig,
    open: HashMap<ViolationType, Window>,
    /// Closed windows waiting for earlier open windows to close
    pending: Vec<Window>,
    high_water: Option<DateTime<Utc>>,
    last_emitted: Option<DateTime<Utc>>,
    emitted_by_type: HashMap<ViolationType, u32>,
}

impl ViolationAggregator {
    pub fn new(session_id: SessionId, config: AggregationConfig) -> Self {
        Self {
            session_id,
            config,
            open: HashMap::new(),
            pending: Vec::new(),
            high_water: None,
            last_emitted: None,
            emitted_by_type: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Fold a batch of candidates into the open windows and return every
    /// event that is now final.
    pub fn aggregate(
        &mut self,
        candidates: Vec<CandidateViolation>,
    ) -> Result<Vec<ViolationEvent>, AggregationError> {
        let window = self.config.debounce_window();

        for candidate in candidates {
            if candidate.session_id != self.session_id {
                return Err(AggregationError::SessionMismatch {
                    expected: self.session_id,
                    found: candidate.session_id,
                });
            }

            if let Some(last) = self.last_emitted {
                if candidate.timestamp < last {
                    warn!(
                        session_id = %self.session_id,
                        violation_type = %candidate.violation_type,
                        late_by_ms = (last - candidate.timestamp).num_milliseconds(),
                        "Dropping candidate older than last emitted violation"
                    );
                    continue;
                }
            }

            self.high_water = Some(match self.high_water {
                Some(hw) => hw.max(candidate.timestamp),
                None => candidate.timestamp,
            });

            let ty = candidate.violation_type;
            match self.open.remove(&ty) {
                Some(mut existing) if candidate.timestamp < existing.closes_at(window) => {
                    existing.absorb(candidate);
                    self.open.insert(ty, existing);
                }
                Some(existing) => {
                    self.pending.push(existing);
                    self.open.insert(ty, Window::open(candidate));
                }
                None => {
                    self.open.insert(ty, Window::open(candidate));
                }
            }
        }

        self.close_expired();
        self.release(false)
    }

    /// Advance time without new candidates, closing windows whose debounce
    /// span has passed.
    pub fn advance(
        &mut self,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<ViolationEvent>, AggregationError> {
        if self.high_water.map_or(true, |hw| watermark > hw) {
            self.high_water = Some(watermark);
        }
        self.close_expired();
        self.release(false)
    }

    /// Close every window and emit everything still held
    pub fn flush(&mut self) -> Result<Vec<ViolationEvent>, AggregationError> {
        let open: Vec<Window> = self.open.drain().map(|(_, w)| w).collect();
        self.pending.extend(open);
        self.release(true)
    }

    /// Windows still collecting candidates
    pub fn open_windows(&self) -> usize {
        self.open.len()
    }

    fn close_expired(&mut self) {
        let Some(hw) = self.high_water else {
            return;
        };
        let window = self.config.debounce_window();
        let expired: Vec<ViolationType> = self
            .open
            .iter()
            .filter(|(_, w)| w.closes_at(window) <= hw)
            .map(|(ty, _)| *ty)
            .collect();
        for ty in expired {
            if let Some(w) = self.open.remove(&ty) {
                self.pending.push(w);
            }
        }
    }

    /// Emit closed windows in timestamp order, stopping at the first one that
    /// an open window could still precede.
    fn release(&mut self, all: bool) -> Result<Vec<ViolationEvent>, AggregationError> {
        self.pending.sort_by(|a, b| {
            a.first_ts
                .cmp(&b.first_ts)
                .then(a.violation_type.cmp(&b.violation_type))
        });

        let horizon = if all {
            None
        } else {
            self.open.values().map(|w| w.first_ts).min()
        };
        let ready = match horizon {
            Some(h) => self.pending.iter().take_while(|w| w.first_ts <= h).count(),
            None => self.pending.len(),
        };

        let mut events = Vec::with_capacity(ready);
        for window in self.pending.drain(..ready).collect::<Vec<_>>() {
            if let Some(last) = self.last_emitted {
                if window.first_ts < last {
                    return Err(AggregationError::OutOfOrderFlush {
                        window_start: window.first_ts,
                        last_emitted: last,
                    });
                }
            }
            self.last_emitted = Some(window.first_ts);
            events.push(self.finalize(window));
        }
        Ok(events)
    }

    fn finalize(&mut self, window: Window) -> ViolationEvent {
        let prior = self.emitted_by_type.entry(window.violation_type).or_insert(0);
        let severity = if *prior >= self.config.escalation_recurrences {
            window.severity.escalate()
        } else {
            window.severity
        };
        *prior += 1;

        if severity != window.severity {
            debug!(
                session_id = %self.session_id,
                violation_type = %window.violation_type,
                from = ?window.severity,
                to = ?severity,
                "Escalating recurring violation"
            );
        }

        let description = if window.occurrences > 1 {
            format!("{} ({} occurrences)", window.description, window.occurrences)
        } else {
            window.description
        };

        ViolationEvent {
            id: ViolationId::new(),
            session_id: self.session_id,
            violation_type: window.violation_type,
            timestamp: window.first_ts,
            confidence: window.confidence,
            severity,
            description,
            evidence: window.evidence,
            is_resolved: false,
            resolution: None,
            reviewed_by: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn cand(
        sid: SessionId,
        ty: ViolationType,
        severity: ViolationSeverity,
        secs: i64,
        confidence: f64,
    ) -> CandidateViolation {
        CandidateViolation {
            session_id: sid,
            violation_type: ty,
            confidence,
            severity,
            timestamp: t(secs),
            description: ty.to_string(),
            evidence: format!("frame:{}", secs),
        }
    }

    fn aggregator() -> (SessionId, ViolationAggregator) {
        let sid = SessionId::new();
        (sid, ViolationAggregator::new(sid, AggregationConfig::default()))
    }

    #[test]
    fn test_same_type_within_window_collapses() {
        let (sid, mut agg) = aggregator();
        let batch: Vec<_> = (0..5)
            .map(|i| {
                cand(
                    sid,
                    ViolationType::TabSwitching,
                    ViolationSeverity::Medium,
                    i,
                    0.5 + i as f64 * 0.1,
                )
            })
            .collect();
        assert!(agg.aggregate(batch).unwrap().is_empty());

        let events = agg.flush().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, t(0));
        assert!((events[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(events[0].evidence, "frame:0");
    }

    #[test]
    fn test_identical_candidates_yield_one_event() {
        let (sid, mut agg) = aggregator();
        let c = cand(sid, ViolationType::CopyPaste, ViolationSeverity::Medium, 3, 0.7);
        agg.aggregate(vec![c.clone(), c.clone(), c]).unwrap();
        assert_eq!(agg.flush().unwrap().len(), 1);
    }

    #[test]
    fn test_window_closes_when_time_passes() {
        let (sid, mut agg) = aggregator();
        agg.aggregate(vec![cand(
            sid,
            ViolationType::FullScreenExit,
            ViolationSeverity::High,
            0,
            1.0,
        )])
        .unwrap();
        assert!(agg.advance(t(9)).unwrap().is_empty());

        let events = agg.advance(t(10)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].violation_type, ViolationType::FullScreenExit);
        assert_eq!(agg.open_windows(), 0);
    }

    #[test]
    fn test_merged_window_keeps_highest_severity() {
        let (sid, mut agg) = aggregator();
        agg.aggregate(vec![
            cand(sid, ViolationType::FaceNotDetected, ViolationSeverity::Medium, 0, 1.0),
            cand(sid, ViolationType::FaceNotDetected, ViolationSeverity::High, 3, 1.0),
        ])
        .unwrap();
        let events = agg.flush().unwrap();
        assert_eq!(events[0].severity, ViolationSeverity::High);
        assert_eq!(events[0].timestamp, t(0));
    }

    #[test]
    fn test_four_spaced_multiple_faces_escalates_fourth() {
        let (sid, mut agg) = aggregator();
        let mut events = Vec::new();
        for i in 0..4 {
            events.extend(
                agg.aggregate(vec![cand(
                    sid,
                    ViolationType::MultipleFaces,
                    ViolationSeverity::High,
                    i * 15,
                    0.9,
                )])
                .unwrap(),
            );
        }
        events.extend(agg.flush().unwrap());

        let severities: Vec<_> = events.iter().map(|e| e.severity).collect();
        assert_eq!(
            severities,
            vec![
                ViolationSeverity::High,
                ViolationSeverity::High,
                ViolationSeverity::High,
                ViolationSeverity::Critical,
            ]
        );
    }

    #[test]
    fn test_emitted_stream_is_time_ordered_across_types() {
        let (sid, mut agg) = aggregator();
        // Two types interleaved; the tab window opens first and must be
        // emitted first even though the noise window closes at the same time.
        let mut events = agg
            .aggregate(vec![
                cand(sid, ViolationType::TabSwitching, ViolationSeverity::Medium, 0, 1.0),
                cand(sid, ViolationType::BackgroundNoise, ViolationSeverity::Low, 2, 0.6),
                cand(sid, ViolationType::TabSwitching, ViolationSeverity::Medium, 4, 1.0),
            ])
            .unwrap();
        events.extend(
            agg.aggregate(vec![cand(
                sid,
                ViolationType::CopyPaste,
                ViolationSeverity::Medium,
                25,
                1.0,
            )])
            .unwrap(),
        );
        events.extend(agg.flush().unwrap());

        let order: Vec<_> = events.iter().map(|e| (e.violation_type, e.timestamp)).collect();
        assert_eq!(
            order,
            vec![
                (ViolationType::TabSwitching, t(0)),
                (ViolationType::BackgroundNoise, t(2)),
                (ViolationType::CopyPaste, t(25)),
            ]
        );
    }

    #[test]
    fn test_unordered_batch_is_emitted_in_time_order() {
        let (sid, mut agg) = aggregator();
        agg.aggregate(vec![
            cand(sid, ViolationType::CopyPaste, ViolationSeverity::Medium, 8, 1.0),
            cand(sid, ViolationType::LookingAway, ViolationSeverity::Medium, 3, 0.7),
            cand(sid, ViolationType::BackgroundNoise, ViolationSeverity::Low, 5, 0.4),
        ])
        .unwrap();

        let events = agg.advance(t(20)).unwrap();
        let order: Vec<_> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(order, vec![t(3), t(5), t(8)]);
    }

    #[test]
    fn test_late_candidate_is_dropped() {
        let (sid, mut agg) = aggregator();
        agg.aggregate(vec![cand(sid, ViolationType::CopyPaste, ViolationSeverity::Medium, 20, 1.0)])
            .unwrap();
        agg.advance(t(31)).unwrap();

        let events = agg
            .aggregate(vec![cand(sid, ViolationType::TabSwitching, ViolationSeverity::Medium, 5, 1.0)])
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(agg.open_windows(), 0);
    }

    #[test]
    fn test_session_mismatch() {
        let (sid, mut agg) = aggregator();
        let other = SessionId::new();
        let err = agg
            .aggregate(vec![cand(other, ViolationType::CopyPaste, ViolationSeverity::Medium, 0, 1.0)])
            .unwrap_err();
        assert_eq!(
            err,
            AggregationError::SessionMismatch {
                expected: sid,
                found: other
            }
        );
    }

    #[test]
    fn test_occurrence_count_in_description() {
        let (sid, mut agg) = aggregator();
        agg.aggregate(vec![
            cand(sid, ViolationType::CopyPaste, ViolationSeverity::Medium, 0, 1.0),
            cand(sid, ViolationType::CopyPaste, ViolationSeverity::Medium, 1, 1.0),
        ])
        .unwrap();
        let events = agg.flush().unwrap();
        assert_eq!(events[0].description, "copy_paste (2 occurrences)");
    }
}
