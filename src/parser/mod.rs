//! The parser family: five variants sharing timestamp coercion, modeled
//! as a trait over a common capability (one raw line in, one [`Entry`]
//! out) since each variant carries its own construction-time
//! configuration and no shared layout.

pub mod json;
pub mod logfmt;
pub mod none;
pub mod regexp;
pub mod syslog;
pub mod timestamp;

use crate::entry::Entry;

pub trait Parser: Send + Sync {
    /// Transform one raw line into an [`Entry`]. Must never panic on
    /// malformed input — on failure to recognize structure, produce an
    /// unparsed entry with `raw == message == line`.
    fn parse(&self, line: &str) -> Entry;
}

pub use json::JsonParser;
pub use logfmt::LogfmtParser;
pub use none::NoneParser;
pub use regexp::RegexParser;
pub use syslog::SyslogParser;
