//! Lenient key/value extraction from node payloads.
//!
//! Nodes answer with text that is usually, but not always, a flat JSON
//! object. Rather than parsing JSON, every `"key":value` pair terminated by
//! a comma or closing brace is extracted. Nested objects and escaped
//! quotes are not understood; values are kept as raw text.

use crate::types::TelemetryField;
use regex::Regex;

/// Quoted key, colon, shortest value up to `,` or `}`.
pub const FIELD_PATTERN: &str = r#""([^"]+?)":(.+?)(?:,|\})"#;

/// Compiled field extractor.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    pattern: Regex,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(FIELD_PATTERN).expect("FIELD_PATTERN compiles"),
        }
    }

    /// Extracts every field in payload order. Duplicate keys are kept.
    pub fn extract(&self, payload: &str) -> Vec<TelemetryField> {
        self.pattern
            .captures_iter(payload.trim())
            .map(|caps| TelemetryField::new(&caps[1], &caps[2]))
            .collect()
    }
}
