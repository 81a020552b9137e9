//! Log severity lattice and level normalization.
//!
//! `LogLevel` is a closed six-member total order plus an `Unknown`
//! sentinel that sits outside the lattice: it never equals, and never
//! satisfies a minimum-level predicate against, any concrete level.
//! "No minimum level configured" is modeled separately as `Option<LogLevel>
//! == None` wherever a min-level filter is stored (`FilterOptions`,
//! `Query` clauses) rather than folding it into this enum, so that the
//! two very different sentinels (`UNKNOWN` the parse failure, `UNSET`
//! the absent filter) can't be confused with each other at the type level.


use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    /// Parse-failure sentinel. Outside the lattice (see
    /// [`LogLevel::meets_min`]); serialized as the empty string.
    #[serde(rename = "", alias = "unknown")]
    Unknown,
}

impl LogLevel {
    const ORDER: [LogLevel; 6] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    fn rank(&self) -> Option<u8> {
        Self::ORDER.iter().position(|l| l == self).map(|i| i as u8)
    }

    /// `self >= min` inside the lattice. `Unknown` never satisfies any
    /// predicate, including against itself.
    pub fn meets_min(&self, min: LogLevel) -> bool {
        match (self.rank(), min.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Unknown => "unknown",
        }
    }

    /// Parser-path normalization: unrecognized or empty input becomes
    /// `Info`.
    pub fn normalize_for_parse(raw: &str) -> LogLevel {
        Self::from_alias(raw).unwrap_or(LogLevel::Info)
    }

    /// Classification of caller-supplied level strings: unrecognized or
    /// empty input becomes the `Unknown` sentinel.
    pub fn normalize_for_classify(raw: &str) -> LogLevel {
        Self::from_alias(raw).unwrap_or(LogLevel::Unknown)
    }

    fn from_alias(raw: &str) -> Option<LogLevel> {
        if raw.is_empty() {
            return None;
        }
        let lower = raw.to_ascii_lowercase();
        match lower.as_str() {
            "trace" | "trc" => Some(LogLevel::Trace),
            "debug" | "dbg" => Some(LogLevel::Debug),
            "info" | "inf" | "information" => Some(LogLevel::Info),
            "warn" | "warning" | "wrn" => Some(LogLevel::Warn),
            "error" | "err" => Some(LogLevel::Error),
            "fatal" | "critical" | "panic" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Unknown
    }
}
