//! Options form of the filter language: an independently conjoined
//! bundle used by the live service-log path.

use super::Filter;
use crate::entry::Entry;
use crate::level::LogLevel;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct FilterOptions {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Explicit level set. Ignored when `min_level` is set (see
    /// `matches_base`).
    pub levels: Option<Vec<LogLevel>>,
    /// `None` is the UNSET sentinel: no min-level filter in effect.
    pub min_level: Option<LogLevel>,
    pub grep: Option<Regex>,
    /// Wildcard (`*`) case-insensitive field equality.
    pub fields: HashMap<String, String>,
    /// Grep context margins. Only meaningful alongside `grep`.
    pub before: usize,
    pub after: usize,
}

impl FilterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time + level + field conjuncts, without grep. Used both by
    /// `matches` and as the base filter for context-window computation
    /// in [`super::filter_entries`].
    pub fn matches_base(&self, entry: &Entry) -> bool {
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp >= until {
                return false;
            }
        }

        if let Some(min) = self.min_level {
            if !entry.level.meets_min(min) {
                return false;
            }
        } else if let Some(levels) = &self.levels {
            if !levels.is_empty() && !levels.contains(&entry.level) {
                return false;
            }
        }

        for (key, pattern) in &self.fields {
            let value = entry.field_as_str(key).unwrap_or_default();
            if !wildcard_match_ci(pattern, &value) {
                return false;
            }
        }

        true
    }

    fn matches_grep(&self, entry: &Entry) -> bool {
        match &self.grep {
            None => true,
            Some(re) => re.is_match(&entry.message) || re.is_match(&entry.raw),
        }
    }
}

impl Filter for FilterOptions {
    fn matches(&self, entry: &Entry) -> bool {
        self.matches_base(entry) && self.matches_grep(entry)
    }
}

/// Case-insensitive wildcard match where `*` matches any run of
/// characters (including empty). No other metacharacters are special.
pub fn wildcard_match_ci(pattern: &str, value: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let value = value.to_ascii_lowercase();
    if !pattern.contains('*') {
        return pattern == value;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !value[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if i == parts.len() - 1 {
            return value[pos..].ends_with(part);
        } else {
            match value[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}
