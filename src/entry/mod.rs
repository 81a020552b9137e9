//! The canonical log record.
//!
//! Fields carry an open dictionary of mixed-kind values, represented as
//! `serde_json::Value` rather than a hand-rolled tagged enum, so parsed
//! payloads keep their original field names and nesting.


use crate::level::LogLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// The original line, preserved byte-exact.
    pub raw: String,
    /// Name of the producing viewer.
    pub source: String,
    #[serde(default)]
    pub fields: Fields,
    /// Monotonically increasing per buffer. Assigned by `RingBuffer::add`;
    /// zero until then.
    #[serde(default)]
    pub sequence: u64,
    /// Optional byte position for historical seek.
    #[serde(default)]
    pub offset: Option<u64>,
}

impl Entry {
    /// Build an entry from a raw line with no level and no fields. Used
    /// by the `none` parser and as the unparsed fallback by the others.
    /// The timestamp falls back to "now" so it is never zero.
    pub fn from_raw(raw: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        let raw = raw.into();
        Entry {
            timestamp: timestamp.unwrap_or_else(Utc::now),
            level: LogLevel::Unknown,
            message: raw.clone(),
            raw,
            source: String::new(),
            fields: Fields::new(),
            sequence: 0,
            offset: None,
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn field_as_str(&self, key: &str) -> Option<String> {
        match self.fields.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(v) => Some(v.to_string()),
            None => None,
        }
    }
}
