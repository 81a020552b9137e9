//! Field deriver: post-processes a parsed [`Entry`], computing extra
//! fields from a timestamp reformat (`timefmt`) or a
//! `{field}`/`{func(field)}` template (`fmt`). Applied once per entry on
//! the live path and once per entry produced by a historical read.


use crate::config::DeriveConfig;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::parser::timestamp::parse_timestamp;
use serde_json::Value;

const DEFAULT_TIME_LAYOUT: &str = "%H:%M:%S";

#[derive(Debug, Clone)]
pub enum DeriveOp {
    /// Reformat a time into `target`. The source is `from` if set (a
    /// field whose value the shared timestamp coercion can read),
    /// otherwise the entry's own timestamp. An unreadable source writes
    /// nothing.
    TimeFmt {
        from: Option<String>,
        layout: String,
        target: String,
    },
    /// Render a template with `{field}` or `{func(field)}` placeholders
    /// into `target`.
    Fmt { template: String, target: String },
}

#[derive(Debug, Clone, Default)]
pub struct Deriver {
    ops: Vec<DeriveOp>,
}

impl Deriver {
    pub fn new(ops: Vec<DeriveOp>) -> Self {
        Deriver { ops }
    }

    /// Builds a deriver from configuration: one op per map entry, keyed
    /// by the field each op writes. `args[0]` is the layout (`timefmt`)
    /// or the template (`fmt`).
    pub fn from_config<'a>(entries: impl IntoIterator<Item = (&'a String, &'a DeriveConfig)>) -> Result<Deriver> {
        let mut ops = Vec::new();
        for (target, cfg) in entries {
            let op = match cfg.op.as_str() {
                "timefmt" => DeriveOp::TimeFmt {
                    from: cfg.from.clone().filter(|f| !f.is_empty()),
                    layout: cfg.args.first().cloned().unwrap_or_else(|| DEFAULT_TIME_LAYOUT.to_string()),
                    target: target.clone(),
                },
                "fmt" => {
                    let template = cfg
                        .args
                        .first()
                        .cloned()
                        .ok_or_else(|| Error::validation("deriver", format!("fmt op for {target} needs a template")))?;
                    DeriveOp::Fmt { template, target: target.clone() }
                }
                other => {
                    return Err(Error::validation("deriver", format!("unknown derive op: {other}")));
                }
            };
            ops.push(op);
        }
        Ok(Deriver { ops })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn derive(&self, entry: &mut Entry) {
        for op in &self.ops {
            apply(op, entry);
        }
    }
}

fn apply(op: &DeriveOp, entry: &mut Entry) {
    match op {
        DeriveOp::TimeFmt { from, layout, target } => {
            let dt = match from {
                None => Some(entry.timestamp),
                Some(field) => match resolve_field(entry, field) {
                    // absent source field falls back to the entry time;
                    // a present but unreadable one writes nothing
                    v if v.is_empty() => Some(entry.timestamp),
                    v => match parse_timestamp(&v, None) {
                        (dt, true) => Some(dt),
                        (_, false) => None,
                    },
                },
            };
            if let Some(dt) = dt {
                entry.fields.insert(target.clone(), Value::String(dt.format(layout).to_string()));
            }
        }
        DeriveOp::Fmt { template, target } => {
            let rendered = render_template(template, entry);
            entry.fields.insert(target.clone(), Value::String(rendered));
        }
    }
}

/// Resolves `{field}` and `{func(field)}` placeholders. Unknown
/// functions pass the value through unchanged; unknown fields render
/// as an empty string.
fn render_template(template: &str, entry: &Entry) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut inner = String::new();
        let mut closed = false;
        for c2 in chars.by_ref() {
            if c2 == '}' {
                closed = true;
                break;
            }
            inner.push(c2);
        }
        if !closed {
            out.push('{');
            out.push_str(&inner);
            continue;
        }
        out.push_str(&resolve_placeholder(&inner, entry));
    }
    out
}

fn resolve_placeholder(inner: &str, entry: &Entry) -> String {
    let inner = inner.trim();
    if let Some(open) = inner.find('(') {
        if let Some(close) = inner.rfind(')') {
            if close > open {
                let func = &inner[..open];
                let arg = &inner[open + 1..close];
                let value = resolve_field(entry, arg.trim());
                return apply_func(func.trim(), value);
            }
        }
    }
    resolve_field(entry, inner)
}

fn resolve_field(entry: &Entry, name: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "timestamp" | "time" => entry.timestamp.to_rfc3339(),
        "level" => entry.level.as_str().to_string(),
        "message" | "msg" => entry.message.clone(),
        "raw" => entry.raw.clone(),
        "source" => entry.source.clone(),
        _ => entry.field_as_str(name).unwrap_or_default(),
    }
}

fn apply_func(func: &str, value: String) -> String {
    match func.to_ascii_lowercase().as_str() {
        "basename" => value.rsplit('/').next().unwrap_or(&value).to_string(),
        "dirname" => match value.rfind('/') {
            Some(idx) => value[..idx].to_string(),
            None => ".".to_string(),
        },
        "upper" => value.to_uppercase(),
        "lower" => value.to_lowercase(),
        "trim" => value.trim().to_string(),
        _ => value,
    }
}
