//! syslog parser: RFC 5424 first, RFC 3164 (BSD) second.

use super::timestamp::parse_timestamp;
use super::Parser;
use crate::entry::Entry;
use crate::level::LogLevel;
use chrono::Utc;
use serde_json::{Map, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct SyslogParser;

impl Parser for SyslogParser {
    fn parse(&self, line: &str) -> Entry {
        if let Some((pri, after)) = split_priority(line) {
            let severity = pri % 8;
            if let Some(entry) = try_rfc5424(after, severity, line) {
                return entry;
            }
            if let Some(entry) = try_rfc3164(after, severity, line) {
                return entry;
            }
        }
        Entry::from_raw(line, None)
    }
}

fn split_priority(line: &str) -> Option<(u32, &str)> {
    let rest = line.strip_prefix('<')?;
    let close = rest.find('>')?;
    let pri: u32 = rest[..close].parse().ok()?;
    Some((pri, &rest[close + 1..]))
}

fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(idx) => Some((&s[..idx], &s[idx..])),
        None => Some((s, "")),
    }
}

fn severity_to_level(severity: u32) -> LogLevel {
    match severity {
        0 | 1 | 2 => LogLevel::Fatal,
        3 => LogLevel::Error,
        4 => LogLevel::Warn,
        5 | 6 => LogLevel::Info,
        7 => LogLevel::Debug,
        _ => LogLevel::Unknown,
    }
}

/// `<PRI>VERSION TIMESTAMP HOSTNAME APP-NAME PROCID MSGID SD MSG`
fn try_rfc5424(after: &str, severity: u32, raw: &str) -> Option<Entry> {
    let (version, rest) = next_token(after)?;
    version.parse::<u32>().ok()?;
    let (ts_tok, rest) = next_token(rest)?;
    let (hostname, rest) = next_token(rest)?;
    let (appname, rest) = next_token(rest)?;
    let (procid, rest) = next_token(rest)?;
    let (msgid, rest) = next_token(rest)?;
    let (_sd, rest) = next_token(rest)?;

    let message = rest.trim_start().trim_start_matches('\u{feff}').to_string();

    let (timestamp, _) = if ts_tok == "-" {
        (Utc::now(), false)
    } else {
        parse_timestamp(ts_tok, None)
    };

    let mut fields = Map::new();
    fields.insert("hostname".to_string(), Value::String(hostname.to_string()));
    fields.insert("app_name".to_string(), Value::String(appname.to_string()));
    fields.insert("proc_id".to_string(), Value::String(procid.to_string()));
    fields.insert("msg_id".to_string(), Value::String(msgid.to_string()));

    Some(Entry {
        timestamp,
        level: severity_to_level(severity),
        message,
        raw: raw.to_string(),
        source: String::new(),
        fields,
        sequence: 0,
        offset: None,
    })
}

/// `<PRI>Mon dd hh:mm:ss HOSTNAME TAG: MSG` — the fixed-width BSD
/// timestamp has no year, so [`parse_timestamp`] defaults to the
/// current one.
fn try_rfc3164(after: &str, severity: u32, raw: &str) -> Option<Entry> {
    let after = after.trim_start_matches(' ');
    if after.len() < 15 {
        return None;
    }
    let (ts_part, remainder) = after.split_at(15);
    let (timestamp, ok) = parse_timestamp(ts_part, Some("%b %e %H:%M:%S"));
    if !ok {
        return None;
    }
    let (hostname, rest) = next_token(remainder)?;
    let message = rest.trim_start().to_string();

    let mut fields = Map::new();
    fields.insert("hostname".to_string(), Value::String(hostname.to_string()));

    Some(Entry {
        timestamp,
        level: severity_to_level(severity),
        message,
        raw: raw.to_string(),
        source: String::new(),
        fields,
        sequence: 0,
        offset: None,
    })
}
