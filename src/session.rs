//! Poll session - one full resolve-and-poll run.
//!
//! Owns the topology provider and the transport for the duration of a
//! run; both are released when the session is dropped.
//!
//! Nodes are polled strictly one at a time in resolver order, and each
//! node's output is written before the next poll starts.

use crate::error::ProviderError;
use crate::telemetry::{CoapTransport, PollerConfig, TelemetryPoller};
use crate::topology::{AddressResolver, CanonicalAddress, TopologyProvider};
use crate::types::{now_ms, Reading};
use log::{info, warn};
use std::io::Write;

/// Statistics from one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Addresses returned by the resolver
    pub addresses_resolved: usize,
    /// Nodes a poll was issued for
    pub nodes_polled: u64,
    /// Successful polls
    pub readings: u64,
    /// Successful polls whose payload held no fields
    pub empty_payloads: u64,
    /// Failed polls
    pub failures: u64,
    /// Duration of the run in milliseconds
    pub duration_ms: u64,
    /// Start of the run (Unix ms)
    pub started_at: u64,
}

/// A resolver and a poller bound together for one run.
pub struct PollSession<P, T> {
    resolver: AddressResolver<P>,
    poller: TelemetryPoller<T>,
    skip_first: bool,
}

impl<P: TopologyProvider, T: CoapTransport> PollSession<P, T> {
    pub fn new(provider: P, transport: T, config: PollerConfig, skip_first: bool) -> Self {
        Self {
            resolver: AddressResolver::new(provider),
            poller: TelemetryPoller::new(config, transport),
            skip_first,
        }
    }

    pub fn poller(&self) -> &TelemetryPoller<T> {
        &self.poller
    }

    /// Addresses this session will poll, after the skip-first rule.
    pub fn targets(&self, resolved: Vec<CanonicalAddress>) -> Vec<CanonicalAddress> {
        let skip = usize::from(self.skip_first);
        if skip > 0 {
            if let Some(first) = resolved.first() {
                info!("Skipping first resolved address {}", first);
            }
        }
        resolved.into_iter().skip(skip).collect()
    }

    /// Resolves all nodes and polls each one, writing results to `out`.
    ///
    /// Only a topology failure aborts the run. Poll failures are written
    /// as a diagnostic line and the run moves on to the next node.
    pub async fn run<W: Write>(&self, out: &mut W) -> Result<RunStats, ProviderError> {
        let started_at = now_ms();
        let resolved = self.resolver.resolve_addresses()?;
        let addresses_resolved = resolved.len();
        let before = self.poller.stats();

        for address in self.targets(resolved) {
            let uri = self.poller.config().target_uri(&address);
            info!("Fetching and printing data for {}", uri);

            match self.poller.poll(&address).await {
                Ok(reading) => {
                    info!("Node Information for {}:", uri);
                    emit(out, &render_reading(&reading));
                }
                Err(e) => {
                    emit(out, &format!("Failed to fetch data from {}: {}", uri, e));
                }
            }
        }

        let polled = self.poller.stats().since(&before);
        let stats = RunStats {
            addresses_resolved,
            nodes_polled: polled.polls,
            readings: polled.readings,
            empty_payloads: polled.empty_payloads,
            failures: polled.failures,
            duration_ms: now_ms().saturating_sub(started_at),
            started_at,
        };
        info!(
            "Run completed: {} of {} nodes answered in {}ms",
            stats.readings, stats.nodes_polled, stats.duration_ms
        );

        Ok(stats)
    }
}

/// Console rendering of a reading: field names, then values.
pub fn render_reading(reading: &Reading) -> String {
    format!("{}\n{}", reading.render_names(), reading.render_values())
}

fn emit<W: Write>(out: &mut W, text: &str) {
    if let Err(e) = writeln!(out, "{}", text).and_then(|_| out.flush()) {
        warn!("Failed to write output: {}", e);
    }
}
