//! Telemetry data structures shared by the poller and the session.
//!
//! Defines the field and reading types produced by every successful poll.

use crate::topology::CanonicalAddress;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the synthetic field prepended to every reading.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Format of the synthetic timestamp value (local wall-clock time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current local time rendered with [`TIMESTAMP_FORMAT`].
pub fn local_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One (name, value) pair extracted from a node payload.
///
/// Values are kept as the raw payload text; nothing is coerced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryField {
    pub name: String,
    pub value: String,
}

impl TelemetryField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// A successful poll of one node.
#[derive(Clone, Debug)]
pub struct Reading {
    /// Node the reading came from
    pub address: CanonicalAddress,
    /// Ordered fields, `timestamp` first
    pub fields: Vec<TelemetryField>,
}

impl Reading {
    /// Builds a reading from extracted payload fields, prepending the
    /// synthetic timestamp.
    pub fn new(address: CanonicalAddress, timestamp: String, extracted: Vec<TelemetryField>) -> Self {
        let mut fields = Vec::with_capacity(extracted.len() + 1);
        fields.push(TelemetryField::new(TIMESTAMP_FIELD, timestamp));
        fields.extend(extracted);
        Self { address, fields }
    }

    /// Value of the synthetic timestamp field.
    pub fn timestamp(&self) -> &str {
        self.fields
            .first()
            .map(|f| f.value.as_str())
            .unwrap_or_default()
    }

    /// True when the payload yielded no fields beyond the timestamp.
    pub fn is_empty(&self) -> bool {
        self.fields.len() <= 1
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.value.as_str())
    }

    /// Bracketed, comma-joined list of field names.
    pub fn render_names(&self) -> String {
        format!("[{}]", self.names().collect::<Vec<_>>().join(", "))
    }

    /// Bracketed, comma-joined list of field values.
    pub fn render_values(&self) -> String {
        format!("[{}]", self.values().collect::<Vec<_>>().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> CanonicalAddress {
        CanonicalAddress::parse("fd12::1")
    }

    #[test]
    fn test_reading_prepends_timestamp() {
        let reading = Reading::new(
            addr(),
            "2026-10-19 10:00:00".to_string(),
            vec![TelemetryField::new("temp", "23.5")],
        );

        assert_eq!(reading.fields[0].name, TIMESTAMP_FIELD);
        assert_eq!(reading.timestamp(), "2026-10-19 10:00:00");
        assert_eq!(reading.fields[1], TelemetryField::new("temp", "23.5"));
        assert!(!reading.is_empty());
    }

    #[test]
    fn test_render_lists() {
        let reading = Reading::new(
            addr(),
            "2026-10-19 10:00:00".to_string(),
            vec![
                TelemetryField::new("temp", "23.5"),
                TelemetryField::new("hum", "41"),
            ],
        );

        assert_eq!(reading.render_names(), "[timestamp, temp, hum]");
        assert_eq!(reading.render_values(), "[2026-10-19 10:00:00, 23.5, 41]");
    }

    #[test]
    fn test_timestamp_only_reading_is_empty() {
        let reading = Reading::new(addr(), local_timestamp(), Vec::new());
        assert!(reading.is_empty());
        assert_eq!(reading.render_names(), "[timestamp]");
    }

    #[test]
    fn test_local_timestamp_shape() {
        let ts = local_timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok());
    }
}
