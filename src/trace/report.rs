//! Trace report shape: the persisted result of one correlation search.

use crate::entry::Entry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const REPORT_VERSION: &str = "1.0";

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    #[serde(flatten)]
    pub entry: Entry,
    /// `true` when this entry was pulled in as surrounding context
    /// rather than matching the searched ID directly.
    pub is_context: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_entries: usize,
    pub by_source: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    pub version: String,
    pub name: String,
    pub trace_id: String,
    pub group: String,
    /// `"running"`, `"completed"`, or `"failed"`.
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// The searched time range.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: TraceSummary,
    /// Sorted ascending by timestamp.
    pub entries: Vec<TraceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceReport {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: String,
        trace_id: String,
        group: String,
        status: &str,
        created_at: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mut entries: Vec<TraceEntry>,
        duration_ms: u64,
        error: Option<String>,
    ) -> Self {
        entries.sort_by_key(|e| e.entry.timestamp);

        let mut by_source = BTreeMap::new();
        let mut by_level = BTreeMap::new();
        for e in &entries {
            *by_source.entry(e.entry.source.clone()).or_insert(0) += 1;
            *by_level.entry(e.entry.level.as_str().to_string()).or_insert(0) += 1;
        }

        let summary = TraceSummary { total_entries: entries.len(), by_source, by_level, duration_ms };
        TraceReport {
            version: REPORT_VERSION.to_string(),
            name,
            trace_id,
            group,
            status: status.to_string(),
            created_at,
            start,
            end,
            summary,
            entries,
            error,
        }
    }
}
