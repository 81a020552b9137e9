//! Timestamp coercion shared by every parser.

use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Fallback formats tried after the configured layout, in order.
const FALLBACK_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%b %e %H:%M:%S",
];

/// Tries the configured layout first, then the fixed fallback list,
/// then Unix seconds/milliseconds if the string is purely numeric. On
/// total failure returns the current time and `false` ("unparsed").
pub fn parse_timestamp(raw: &str, layout: Option<&str>) -> (DateTime<Utc>, bool) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (Utc::now(), false);
    }

    if let Some(layout) = layout {
        if let Some(dt) = try_format(raw, layout) {
            return (dt, true);
        }
    }

    for fmt in FALLBACK_FORMATS {
        if let Some(dt) = try_format(raw, fmt) {
            return (dt, true);
        }
    }

    if let Ok(n) = raw.parse::<i64>() {
        let dt = if n.unsigned_abs() as i128 > 1_000_000_000_000 {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        };
        if let Some(dt) = dt {
            return (dt, true);
        }
    }

    (Utc::now(), false)
}

fn try_format(raw: &str, fmt: &str) -> Option<DateTime<Utc>> {
    use chrono::format::{parse, Parsed, StrftimeItems};

    // Offset-carrying layouts go through the full zoned parse so the
    // offset is honored rather than discarded.
    if fmt.contains("%z") || fmt.contains("%:z") {
        return DateTime::parse_from_str(raw, fmt).ok().map(|dt| dt.with_timezone(&Utc));
    }

    let mut parsed = Parsed::new();
    let items = StrftimeItems::new(fmt);
    if parse(&mut parsed, raw, items).is_err() {
        return None;
    }

    // BSD-style layouts carry no year; default to the current one.
    if parsed.year().is_none() {
        parsed.set_year(Utc::now().year() as i64).ok()?;
    }

    let naive = parsed.to_naive_datetime_with_offset(0).ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Parses a signed relative duration string like `-5m`, `+10s`, `2h`,
/// `-1d` into total milliseconds. Used by the query language's
/// timestamp clauses, where `-5m` means five minutes before now.
pub fn parse_relative_duration_millis(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (sign, rest) = match s.strip_prefix('-') {
        Some(r) => (-1i64, r),
        None => (1i64, s.strip_prefix('+').unwrap_or(s)),
    };

    let suffixes: [(&str, i64); 5] = [
        ("ms", 1),
        ("s", 1_000),
        ("m", 60_000),
        ("h", 3_600_000),
        ("d", 86_400_000),
    ];
    for (suffix, mult) in suffixes {
        if let Some(num) = rest.strip_suffix(suffix) {
            if let Ok(n) = num.parse::<f64>() {
                return Some(sign * (n * mult as f64) as i64);
            }
        }
    }
    None
}
