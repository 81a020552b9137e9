//! JSON parser. Non-object lines fall through unparsed; for objects the
//! full decoded payload stays in `fields` so derivers and layouts can
//! reference the original field names.

use super::timestamp::parse_timestamp;
use super::Parser;
use crate::entry::Entry;
use crate::level::LogLevel;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct JsonParser {
    pub timestamp_field: String,
    pub level_field: String,
    pub message_field: String,
    pub timestamp_format: Option<String>,
}

impl Default for JsonParser {
    fn default() -> Self {
        JsonParser {
            timestamp_field: "timestamp".to_string(),
            level_field: "level".to_string(),
            message_field: "message".to_string(),
            timestamp_format: None,
        }
    }
}

const MESSAGE_FALLBACKS: [&str; 3] = ["message", "msg", "log"];

impl Parser for JsonParser {
    fn parse(&self, line: &str) -> Entry {
        let value: Option<Value> = serde_json::from_str(line).ok();
        let obj = match &value {
            Some(Value::Object(obj)) => obj,
            _ => return Entry::from_raw(line, None),
        };

        let (timestamp, _parsed) = obj
            .get(&self.timestamp_field)
            .map(|v| extract_timestamp(v, self.timestamp_format.as_deref()))
            .unwrap_or((Utc::now(), false));

        let level = obj
            .get(&self.level_field)
            .and_then(|v| v.as_str())
            .map(LogLevel::normalize_for_parse)
            .unwrap_or(LogLevel::Info);

        let message = obj
            .get(&self.message_field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                MESSAGE_FALLBACKS.iter().find_map(|k| obj.get(*k).and_then(|v| v.as_str()).map(str::to_string))
            })
            .unwrap_or_default();

        Entry {
            timestamp,
            level,
            message,
            raw: line.to_string(),
            source: String::new(),
            fields: obj.clone(),
            sequence: 0,
            offset: None,
        }
    }
}

fn extract_timestamp(value: &Value, format: Option<&str>) -> (DateTime<Utc>, bool) {
    match value {
        Value::Number(n) => {
            let as_i64 = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0);
            let dt = if as_i64.unsigned_abs() > 1_000_000_000_000_000_000 {
                DateTime::<Utc>::from_timestamp_nanos(as_i64)
            } else if as_i64.unsigned_abs() as i128 > 1_000_000_000_000 {
                Utc.timestamp_millis_opt(as_i64).single().unwrap_or_else(Utc::now)
            } else {
                Utc.timestamp_opt(as_i64, 0).single().unwrap_or_else(Utc::now)
            };
            (dt, true)
        }
        Value::String(s) => parse_timestamp(s, format),
        _ => (Utc::now(), false),
    }
}
