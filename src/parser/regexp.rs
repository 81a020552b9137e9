//! Regex parser: a user-supplied pattern with named capture groups,
//! compiled once at construction time.

use super::timestamp::parse_timestamp;
use super::Parser;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::level::LogLevel;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct RegexParser {
    regex: Regex,
    timestamp_field: Option<String>,
    level_field: Option<String>,
    message_field: Option<String>,
    timestamp_format: Option<String>,
}

impl RegexParser {
    /// Compiles `pattern` up front so a malformed pattern fails at
    /// construction time rather than on every line.
    pub fn new(
        pattern: &str,
        timestamp_field: Option<String>,
        level_field: Option<String>,
        message_field: Option<String>,
        timestamp_format: Option<String>,
    ) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::validation("regex_parser", "empty pattern"));
        }
        let regex = Regex::new(pattern).map_err(|e| Error::validation("regex_parser", e.to_string()))?;
        Ok(RegexParser { regex, timestamp_field, level_field, message_field, timestamp_format })
    }
}

const TIMESTAMP_ALIASES: [&str; 3] = ["timestamp", "time", "ts"];
const LEVEL_ALIASES: [&str; 2] = ["level", "lvl"];
const MESSAGE_ALIASES: [&str; 3] = ["message", "msg", "log"];

impl Parser for RegexParser {
    fn parse(&self, line: &str) -> Entry {
        let caps = match self.regex.captures(line) {
            Some(c) => c,
            None => return Entry::from_raw(line, None),
        };

        let mut fields = serde_json::Map::new();
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                fields.insert(name.to_string(), Value::String(m.as_str().to_string()));
            }
        }

        // Configured group name first, then the fixed aliases; whichever
        // group resolves is consumed and leaves the field map.
        let (timestamp, _parsed) = take_group(&mut fields, self.timestamp_field.as_deref(), &TIMESTAMP_ALIASES)
            .map(|s| parse_timestamp(&s, self.timestamp_format.as_deref()))
            .unwrap_or((chrono::Utc::now(), false));

        let level = take_group(&mut fields, self.level_field.as_deref(), &LEVEL_ALIASES)
            .map(|s| LogLevel::normalize_for_parse(&s))
            .unwrap_or(LogLevel::Info);

        let message =
            take_group(&mut fields, self.message_field.as_deref(), &MESSAGE_ALIASES).unwrap_or_else(|| line.to_string());

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

fn take_group(
    fields: &mut serde_json::Map<String, Value>,
    configured: Option<&str>,
    aliases: &[&str],
) -> Option<String> {
    let key = configured
        .filter(|name| fields.contains_key(*name))
        .or_else(|| aliases.iter().copied().find(|name| fields.contains_key(*name)))?;
    fields.remove(key).as_ref().and_then(Value::as_str).map(str::to_string)
}
