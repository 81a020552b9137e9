//! Shared duration-string parsing, used by manager idle timeouts, trace
//! retention windows, and source `since` settings. Unlike
//! [`crate::parser::timestamp::parse_relative_duration_millis`] (which
//! is signed and used for query-language comparisons), this accepts
//! unsigned durations plus a `d` (day) suffix.

use crate::error::{Error, Result};
use std::time::Duration;

const UNITS: [(&str, u64); 5] = [
    ("ms", 1),
    ("s", 1_000),
    ("m", 60_000),
    ("h", 3_600_000),
    ("d", 86_400_000),
];

/// Parses `"30s"`, `"5m"`, `"2h"`, `"7d"`, or a bare millisecond
/// integer like `"1500"`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::validation("duration", "empty duration string"));
    }

    if let Ok(n) = s.parse::<u64>() {
        return Ok(Duration::from_millis(n));
    }

    for (suffix, mult) in UNITS {
        if let Some(num) = s.strip_suffix(suffix) {
            let n: f64 = num
                .parse()
                .map_err(|_| Error::validation("duration", format!("invalid duration: {s}")))?;
            return Ok(Duration::from_millis((n * mult as f64) as u64));
        }
    }

    Err(Error::validation("duration", format!("invalid duration: {s}")))
}
