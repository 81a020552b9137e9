//! logfmt parser: `key=value key2="quoted value"` pairs.

use super::timestamp::parse_timestamp;
use super::Parser;
use crate::entry::Entry;
use crate::level::LogLevel;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct LogfmtParser {
    pub timestamp_field: String,
    pub level_field: String,
    pub message_field: String,
    pub timestamp_format: Option<String>,
}

impl Default for LogfmtParser {
    fn default() -> Self {
        LogfmtParser {
            timestamp_field: "timestamp".to_string(),
            level_field: "level".to_string(),
            message_field: "message".to_string(),
            timestamp_format: None,
        }
    }
}

const MESSAGE_FALLBACKS: [&str; 2] = ["msg", "log"];

impl Parser for LogfmtParser {
    fn parse(&self, line: &str) -> Entry {
        let pairs = tokenize(line);
        if pairs.is_empty() {
            return Entry::from_raw(line, None);
        }

        let mut fields = serde_json::Map::new();
        for (k, v) in pairs {
            fields.insert(k, Value::String(v));
        }

        // The three configured fields are consumed: they become the
        // entry's own timestamp/level/message and leave the field map.
        let (timestamp, _parsed) = fields
            .remove(&self.timestamp_field)
            .as_ref()
            .and_then(Value::as_str)
            .map(|s| parse_timestamp(s, self.timestamp_format.as_deref()))
            .unwrap_or((chrono::Utc::now(), false));

        let level = fields
            .remove(&self.level_field)
            .as_ref()
            .and_then(Value::as_str)
            .map(LogLevel::normalize_for_parse)
            .unwrap_or(LogLevel::Info);

        let message = fields
            .remove(&self.message_field)
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                MESSAGE_FALLBACKS
                    .iter()
                    .find(|k| fields.contains_key(**k))
                    .and_then(|k| fields.remove(*k))
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        Entry {
            timestamp,
            level,
            message,
            raw: line.to_string(),
            source: String::new(),
            fields,
            sequence: 0,
            offset: None,
        }
    }
}

/// Splits a logfmt line into `key=value` pairs. A quoted value may
/// contain spaces and escaped quotes (`\"`). Known limitation: an
/// unquoted value that itself contains `=` is truncated at the first
/// `=` — `path=/a=b` yields `path: "/a"`.
fn tokenize(line: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let n = chars.len();

    while i < n {
        while i < n && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= n {
            break;
        }

        let key_start = i;
        while i < n && chars[i] != '=' && !chars[i].is_whitespace() {
            i += 1;
        }
        if i >= n || chars[i] != '=' {
            // bare token with no '=': skip to next whitespace, not a pair
            while i < n && !chars[i].is_whitespace() {
                i += 1;
            }
            continue;
        }
        let key: String = chars[key_start..i].iter().collect();
        i += 1; // skip '='

        let value = if i < n && chars[i] == '"' {
            i += 1;
            let mut value = String::new();
            while i < n && chars[i] != '"' {
                if chars[i] == '\\' && i + 1 < n {
                    i += 1;
                }
                value.push(chars[i]);
                i += 1;
            }
            if i < n {
                i += 1; // closing quote
            }
            value
        } else {
            let value_start = i;
            while i < n && !chars[i].is_whitespace() && chars[i] != '=' {
                i += 1;
            }
            let value: String = chars[value_start..i].iter().collect();
            // discard the rest of a value cut short by an embedded '='
            while i < n && !chars[i].is_whitespace() {
                i += 1;
            }
            value
        };

        if !key.is_empty() {
            pairs.push((key, value));
        }
    }

    pairs
}
