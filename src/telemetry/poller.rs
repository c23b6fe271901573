//! # Telemetry Poller
//!
//! One CoAP GET per node, parsed into an ordered reading.

use super::parser::FieldExtractor;
use super::transport::{CoapTransport, COAP_PORT};
use crate::error::PollError;
use crate::topology::CanonicalAddress;
use crate::types::{local_timestamp, Reading};
use log::{error, info, warn};
use parking_lot::RwLock;
use std::time::Duration;

/// Outcome of one poll attempt.
pub type PollResult = Result<Reading, PollError>;

/// Configuration for node polling
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// CoAP port of every node
    pub port: u16,

    /// Resource path served by every node
    pub resource_path: String,

    /// Upper bound for a single poll. `None` waits as long as the
    /// transport does.
    pub poll_timeout: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            port: COAP_PORT,
            resource_path: "/om2m".to_string(),
            poll_timeout: None,
        }
    }
}

impl PollerConfig {
    /// Request target for a node.
    pub fn target_uri(&self, address: &CanonicalAddress) -> String {
        let path = self.resource_path.trim_start_matches('/');
        format!("coap://[{}]:{}/{}", address, self.port, path)
    }
}

/// Polls nodes through an injected transport
pub struct TelemetryPoller<T> {
    /// Configuration
    config: PollerConfig,

    /// Transport used for every request
    transport: T,

    /// Payload field extractor
    extractor: FieldExtractor,

    /// Running counters
    stats: RwLock<PollStats>,
}

impl<T: CoapTransport> TelemetryPoller<T> {
    pub fn new(config: PollerConfig, transport: T) -> Self {
        TelemetryPoller {
            config,
            transport,
            extractor: FieldExtractor::new(),
            stats: RwLock::new(PollStats::default()),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Polls one node. Never panics and never aborts the caller: every
    /// failure comes back as an `Err` outcome.
    pub async fn poll(&self, address: &CanonicalAddress) -> PollResult {
        let uri = self.config.target_uri(address);
        info!("Fetching resource from {}", uri);

        let result = self.fetch_and_parse(address, &uri).await;

        let mut stats = self.stats.write();
        stats.polls += 1;
        match &result {
            Ok(reading) => {
                stats.readings += 1;
                if reading.is_empty() {
                    stats.empty_payloads += 1;
                }
            }
            Err(e) => {
                stats.failures += 1;
                error!("Failed to fetch resource from {}: {}", uri, e);
            }
        }

        result
    }

    async fn fetch_and_parse(&self, address: &CanonicalAddress, uri: &str) -> PollResult {
        let payload = match self.config.poll_timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.get(uri))
                .await
                .map_err(|_| PollError::Timeout(limit))??,
            None => self.transport.get(uri).await?,
        };

        let text = std::str::from_utf8(&payload)?;
        let fields = self.extractor.extract(text);
        if fields.is_empty() {
            warn!("No fields found in payload from {}", uri);
        }

        Ok(Reading::new(address.clone(), local_timestamp(), fields))
    }

    /// Get poll statistics
    pub fn stats(&self) -> PollStats {
        self.stats.read().clone()
    }
}

/// Poll statistics
#[derive(Debug, Clone, Default)]
pub struct PollStats {
    pub polls: u64,
    pub readings: u64,
    pub empty_payloads: u64,
    pub failures: u64,
}

impl PollStats {
    /// Counts accumulated since an earlier snapshot.
    pub fn since(&self, earlier: &PollStats) -> PollStats {
        PollStats {
            polls: self.polls.saturating_sub(earlier.polls),
            readings: self.readings.saturating_sub(earlier.readings),
            empty_payloads: self.empty_payloads.saturating_sub(earlier.empty_payloads),
            failures: self.failures.saturating_sub(earlier.failures),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.polls == 0 {
            0.0
        } else {
            self.failures as f64 / self.polls as f64
        }
    }
}
