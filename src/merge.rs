//! Ordered merge of per-modality evaluator output
//!
//! Each modality stream is in timestamp order on its own, but the streams
//! run at different rates. Batches are held until every modality that has
//! reported so far has moved past them, then released in timestamp order.
//! A stalled modality holds the others back for at most `max_hold`.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::config::MergeConfig;
use crate::types::{CandidateViolation, Modality};

#[derive(Debug)]
pub struct OrderedMerge {
    max_hold: Duration,
    watermarks: [Option<DateTime<Utc>>; 5],
    held: BTreeMap<(DateTime<Utc>, u64), Vec<CandidateViolation>>,
    seq: u64,
}

impl Default for OrderedMerge {
    fn default() -> Self {
        Self::new(&MergeConfig::default())
    }
}

impl OrderedMerge {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            max_hold: config.max_hold(),
            watermarks: [None; 5],
            held: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Record that `modality` has been evaluated up to `timestamp`, holding
    /// its candidates, and return everything now safe to release.
    pub fn push(
        &mut self,
        modality: Modality,
        timestamp: DateTime<Utc>,
        candidates: Vec<CandidateViolation>,
    ) -> Vec<CandidateViolation> {
        let slot = &mut self.watermarks[modality.index()];
        *slot = Some(slot.map_or(timestamp, |w| w.max(timestamp)));

        if !candidates.is_empty() {
            self.held.insert((timestamp, self.seq), candidates);
            self.seq += 1;
        }
        self.release()
    }

    /// Lowest watermark across modalities that have reported
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermarks.iter().flatten().min().copied()
    }

    fn newest(&self) -> Option<DateTime<Utc>> {
        self.watermarks.iter().flatten().max().copied()
    }

    /// Time up to which every held batch has been released: the lowest
    /// watermark, or `max_hold` behind the newest one when a modality stalls.
    pub fn horizon(&self) -> Option<DateTime<Utc>> {
        let forced = self.newest().map(|newest| newest - self.max_hold);
        self.watermark().max(forced)
    }

    pub fn held_batches(&self) -> usize {
        self.held.len()
    }

    fn release(&mut self) -> Vec<CandidateViolation> {
        let Some(horizon) = self.horizon() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        while let Some(entry) = self.held.first_entry() {
            let ts = entry.key().0;
            if ts <= horizon {
                out.extend(entry.remove());
            } else {
                break;
            }
        }
        out
    }

    /// Release everything, in order
    pub fn drain(&mut self) -> Vec<CandidateViolation> {
        std::mem::take(&mut self.held)
            .into_values()
            .flatten()
            .collect()
    }
}
