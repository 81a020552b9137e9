//! Query form of the filter language: a whitespace-tokenized string
//! used by viewer historical and buffer reads.

use super::Filter;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::level::LogLevel;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
enum FieldRef {
    Message,
    Level,
    Timestamp,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
enum ClauseOp {
    Equals(String),
    OneOf(Vec<String>),
    Contains(String),
    Cmp(CmpOp, String),
}

#[derive(Debug, Clone)]
struct Clause {
    negate: bool,
    field: FieldRef,
    op: ClauseOp,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    pub fn parse(input: &str) -> Result<Query> {
        let tokens = tokenize(input)?;
        let clauses = tokens.into_iter().map(parse_token).collect();
        Ok(Query { clauses })
    }
}

impl Filter for Query {
    fn matches(&self, entry: &Entry) -> bool {
        self.clauses.iter().all(|c| clause_matches(c, entry))
    }
}

enum RawToken {
    Quoted(String),
    Plain(String),
}

/// Tokenized by whitespace; quoted runs form a single full-text token.
/// An unclosed quote is an error.
fn tokenize(input: &str) -> Result<Vec<RawToken>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut current = String::new();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(RawToken::Plain(std::mem::take(&mut current)));
            }
            chars.next();
            continue;
        }
        if c == '"' {
            if !current.is_empty() {
                tokens.push(RawToken::Plain(std::mem::take(&mut current)));
            }
            chars.next();
            let mut quoted = String::new();
            let mut closed = false;
            for qc in chars.by_ref() {
                if qc == '"' {
                    closed = true;
                    break;
                }
                quoted.push(qc);
            }
            if !closed {
                return Err(Error::parse("query", "unclosed quote"));
            }
            tokens.push(RawToken::Quoted(quoted));
            continue;
        }
        current.push(c);
        chars.next();
    }
    if !current.is_empty() {
        tokens.push(RawToken::Plain(current));
    }
    Ok(tokens)
}

fn parse_token(token: RawToken) -> Clause {
    match token {
        RawToken::Quoted(text) => Clause {
            negate: false,
            field: FieldRef::Message,
            op: ClauseOp::Contains(text.to_ascii_lowercase()),
        },
        RawToken::Plain(tok) => {
            let (negate, rest) = match tok.strip_prefix('-') {
                Some(r) => (true, r),
                None => (false, tok.as_str()),
            };

            match rest.split_once(':') {
                Some((field_part, value_part)) => {
                    let field = resolve_field(field_part);
                    let op = parse_value(value_part, false);
                    Clause { negate, field, op }
                }
                None => Clause {
                    negate,
                    field: FieldRef::Message,
                    op: parse_value(rest, true),
                },
            }
        }
    }
}

fn resolve_field(name: &str) -> FieldRef {
    match name.to_ascii_lowercase().as_str() {
        "message" | "msg" | "" => FieldRef::Message,
        "level" => FieldRef::Level,
        "timestamp" | "ts" | "time" => FieldRef::Timestamp,
        other => FieldRef::Named(other.to_string()),
    }
}

/// `no_field` selects the "bare token, no field" case, where a plain
/// value means message-contains rather than exact match.
fn parse_value(value: &str, no_field: bool) -> ClauseOp {
    if let Some(rest) = value.strip_prefix('~') {
        return ClauseOp::Contains(rest.to_string());
    }
    for (prefix, op) in [(">=", CmpOp::Ge), ("<=", CmpOp::Le), (">", CmpOp::Gt), ("<", CmpOp::Lt)] {
        if let Some(rest) = value.strip_prefix(prefix) {
            return ClauseOp::Cmp(op, rest.to_string());
        }
    }
    if value.contains(',') {
        return ClauseOp::OneOf(value.split(',').map(|s| s.to_string()).collect());
    }
    if no_field {
        ClauseOp::Contains(value.to_string())
    } else {
        ClauseOp::Equals(value.to_string())
    }
}

fn clause_matches(clause: &Clause, entry: &Entry) -> bool {
    let result = match &clause.field {
        FieldRef::Message => match_string_op(&clause.op, &entry.message),
        FieldRef::Level => match_level_op(&clause.op, entry.level),
        FieldRef::Timestamp => match_timestamp_op(&clause.op, entry.timestamp),
        FieldRef::Named(name) => {
            let value = entry.field_as_str(name).unwrap_or_default();
            match_string_op(&clause.op, &value)
        }
    };
    clause.negate != result
}

fn match_string_op(op: &ClauseOp, haystack: &str) -> bool {
    let lower = haystack.to_ascii_lowercase();
    match op {
        ClauseOp::Equals(v) => lower == v.to_ascii_lowercase(),
        ClauseOp::OneOf(vs) => vs.iter().any(|v| lower == v.to_ascii_lowercase()),
        ClauseOp::Contains(v) => lower.contains(&v.to_ascii_lowercase()),
        ClauseOp::Cmp(cmp, v) => compare_numeric_or_lexical(cmp, haystack, v),
    }
}

fn match_level_op(op: &ClauseOp, level: LogLevel) -> bool {
    let name = level.as_str();
    match op {
        ClauseOp::Cmp(cmp, v) => {
            let rhs = LogLevel::normalize_for_classify(v);
            match (level, rhs) {
                (l, r) if l != LogLevel::Unknown && r != LogLevel::Unknown => {
                    compare_ranks(cmp, &l, &r)
                }
                _ => compare_numeric_or_lexical(cmp, name, v),
            }
        }
        other => match_string_op(other, name),
    }
}

fn compare_ranks(cmp: &CmpOp, a: &LogLevel, b: &LogLevel) -> bool {
    // Reuse `meets_min`'s total order via string rank lookup: both are
    // known non-Unknown here, so the lattice position is well-defined.
    let order = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];
    let ra = order.iter().position(|l| l == a).unwrap();
    let rb = order.iter().position(|l| l == b).unwrap();
    apply_cmp(cmp, ra as f64, rb as f64)
}

fn match_timestamp_op(op: &ClauseOp, ts: DateTime<Utc>) -> bool {
    let iso = ts.to_rfc3339();
    match op {
        ClauseOp::Equals(v) => match parse_timestamp_value(v) {
            Some(parsed) => ts == parsed,
            None => iso == *v,
        },
        ClauseOp::OneOf(vs) => vs.iter().any(|v| match parse_timestamp_value(v) {
            Some(parsed) => ts == parsed,
            None => iso == *v,
        }),
        ClauseOp::Contains(v) => iso.contains(v.as_str()),
        ClauseOp::Cmp(cmp, v) => match parse_timestamp_value(v) {
            Some(parsed) => apply_cmp(cmp, ts.timestamp_millis() as f64, parsed.timestamp_millis() as f64),
            None => compare_numeric_or_lexical(cmp, &iso, v),
        },
    }
}

/// Absolute ISO timestamps, or a negative relative duration (e.g.
/// `-5m`) interpreted as `now + delta`.
fn parse_timestamp_value(v: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(millis) = crate::parser::timestamp::parse_relative_duration_millis(v) {
        return Some(Utc::now() + chrono::Duration::milliseconds(millis));
    }
    None
}

fn compare_numeric_or_lexical(cmp: &CmpOp, lhs: &str, rhs: &str) -> bool {
    match (parse_numeric_with_duration(lhs), parse_numeric_with_duration(rhs)) {
        (Some(a), Some(b)) => apply_cmp(cmp, a, b),
        _ => apply_cmp_str(cmp, lhs, rhs),
    }
}

fn apply_cmp(cmp: &CmpOp, a: f64, b: f64) -> bool {
    match cmp {
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
    }
}

fn apply_cmp_str(cmp: &CmpOp, a: &str, b: &str) -> bool {
    match cmp {
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
    }
}

/// Parses a number with optional duration suffix: `ms` (as-is), `s`
/// (×1000), `m` (×60000). Falls back to a plain float parse.
fn parse_numeric_with_duration(s: &str) -> Option<f64> {
    if let Ok(n) = s.parse::<f64>() {
        return Some(n);
    }
    let suffixes: [(&str, f64); 3] = [("ms", 1.0), ("s", 1000.0), ("m", 60_000.0)];
    for (suffix, mult) in suffixes {
        if let Some(num_part) = s.strip_suffix(suffix) {
            if let Ok(n) = num_part.parse::<f64>() {
                return Some(n * mult);
            }
        }
    }
    None
}
