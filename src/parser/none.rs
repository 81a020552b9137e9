//! The `none` parser: no structure assumed at all.

use super::Parser;
use crate::entry::Entry;
use chrono::Utc;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoneParser;

impl Parser for NoneParser {
    fn parse(&self, line: &str) -> Entry {
        Entry {
            timestamp: Utc::now(),
            level: crate::level::LogLevel::Unknown,
            message: line.to_string(),
            raw: line.to_string(),
            source: String::new(),
            fields: Default::default(),
            sequence: 0,
            offset: None,
        }
    }
}
