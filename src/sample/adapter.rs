//! Parsing and batch validation of vigil.sample.v1 records

use crate::error::MonitorError;
use crate::sample::record::*;
use crate::types::SessionId;
use std::collections::BTreeMap;

/// Adapter for reading sample streams
pub struct SampleAdapter;

impl SampleAdapter {
    /// Parse a JSON string containing an array of SampleRecords
    pub fn parse_array(json: &str) -> Result<Vec<SampleRecord>, MonitorError> {
        let records: Vec<SampleRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON (newline-delimited JSON) containing SampleRecords
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<SampleRecord>, MonitorError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<SampleRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    return Err(MonitorError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(records)
    }

    /// Validate a batch of records, returning only the failures
    pub fn validate_records(records: &[SampleRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| {
                record.validate().err().map(|error| ValidationResult {
                    index: idx,
                    session_id: record.session_id,
                    error,
                })
            })
            .collect()
    }

    /// Group records by session, each group sorted by timestamp.
    ///
    /// The sort is stable, so records sharing a timestamp keep input order.
    pub fn group_by_session(records: Vec<SampleRecord>) -> BTreeMap<SessionId, Vec<SampleRecord>> {
        let mut grouped: BTreeMap<SessionId, Vec<SampleRecord>> = BTreeMap::new();
        for record in records {
            grouped.entry(record.session_id).or_default().push(record);
        }
        for group in grouped.values_mut() {
            group.sort_by_key(|r| r.timestamp);
        }
        grouped
    }
}

/// Result of record validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub session_id: SessionId,
    pub error: ValidationError,
}
