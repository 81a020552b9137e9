//! Declarative configuration: everything a [`crate::manager::Manager`]
//! needs to construct sources, parsers and derivers without the caller
//! touching Rust types directly. Plain `serde::Deserialize` structs,
//! loadable from any serde-backed format the host chooses.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogSourceConfig {
    File {
        path: String,
        /// Whether `path` is the live, currently-written file. When set,
        /// historical reads whose window extends past the newest rotated
        /// file also read the live file.
        #[serde(default)]
        current: bool,
        /// Glob for rotated siblings, resolved relative to the log
        /// directory when not absolute. Defaults to `<basename>.*`.
        #[serde(default)]
        rotated_pattern: Option<String>,
        /// Decompressor command for rotated archives. When absent, the
        /// decompressor is chosen by file extension.
        #[serde(default)]
        decompress: Option<String>,
    },
    Command {
        command: Vec<String>,
    },
    Ssh {
        host: String,
        path: String,
    },
    Docker {
        container: String,
        #[serde(default)]
        since: Option<String>,
        #[serde(default)]
        follow: Option<bool>,
    },
    Kubernetes {
        pod: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        container: Option<String>,
        #[serde(default)]
        since: Option<String>,
        #[serde(default)]
        follow: Option<bool>,
    },
    Service {
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    Json,
    Logfmt,
    Regex,
    Syslog,
    #[default]
    None,
}

/// One parser declaration. `timestamp`/`level`/`message` name the input
/// fields the parser extracts; `id` names the field trace correlation's
/// expansion pass reads; `pattern` is the regex for `type: regex`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LogParserConfig {
    #[serde(rename = "type", default)]
    pub kind: ParserKind,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp_format: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
}

/// One derived field. The target field name is the key in
/// [`LogViewerConfig::derive`]; `op` is `timefmt` or `fmt`; `args[0]`
/// carries the output layout (`timefmt`) or the template (`fmt`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeriveConfig {
    #[serde(default)]
    pub from: Option<String>,
    pub op: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BufferConfig {
    #[serde(default)]
    pub max_entries: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogViewerConfig {
    pub name: String,
    pub source: LogSourceConfig,
    #[serde(default)]
    pub parser: Option<LogParserConfig>,
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Derived fields, keyed by the field name each one writes.
    #[serde(default)]
    pub derive: BTreeMap<String, DeriveConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LogViewerSettings {
    /// How long a running viewer with no subscribers may sit untouched
    /// before the cleanup sweep stops it. `"0"` disables eviction.
    #[serde(default)]
    pub idle_timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TraceGroupConfig {
    pub name: String,
    #[serde(default)]
    pub log_viewers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TraceConfig {
    #[serde(default)]
    pub reports_dir: Option<String>,
    #[serde(default)]
    pub max_age: Option<String>,
    #[serde(default)]
    pub groups: Vec<TraceGroupConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub viewers: Vec<LogViewerConfig>,
    #[serde(default)]
    pub settings: LogViewerSettings,
    #[serde(default)]
    pub trace: TraceConfig,
}
