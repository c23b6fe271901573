//! Run configuration.
//!
//! Defaults match a stock Wi-SUN border router; every value can be
//! overridden through `MESHPOLL_*` environment variables.

use crate::error::ConfigError;
use crate::telemetry::{PollerConfig, TransmissionParams};
use crate::topology::BusConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_SNAPSHOT: &str = "MESHPOLL_SNAPSHOT";
pub const ENV_BUS_SERVICE: &str = "MESHPOLL_BUS_SERVICE";
pub const ENV_BUS_OBJECT: &str = "MESHPOLL_BUS_OBJECT";
pub const ENV_BUS_INTERFACE: &str = "MESHPOLL_BUS_INTERFACE";
pub const ENV_COAP_PORT: &str = "MESHPOLL_COAP_PORT";
pub const ENV_COAP_PATH: &str = "MESHPOLL_COAP_PATH";
pub const ENV_POLL_TIMEOUT: &str = "MESHPOLL_POLL_TIMEOUT_SECS";
pub const ENV_SKIP_FIRST: &str = "MESHPOLL_SKIP_FIRST";

/// Where the node list comes from.
#[derive(Debug, Clone)]
pub enum TopologySource {
    /// Live border router on the system bus
    Bus(BusConfig),
    /// JSON snapshot on disk
    Snapshot(PathBuf),
}

impl Default for TopologySource {
    fn default() -> Self {
        TopologySource::Bus(BusConfig::default())
    }
}

/// Configuration for one polling run.
#[derive(Debug, Clone)]
pub struct MeshpollConfig {
    /// Topology provider selection
    pub topology: TopologySource,
    /// Request target and per-poll limits
    pub poller: PollerConfig,
    /// CoAP retransmission parameters
    pub transmission: TransmissionParams,
    /// Skip the first resolved address (the border router itself on
    /// deployed networks)
    pub skip_first: bool,
}

impl Default for MeshpollConfig {
    fn default() -> Self {
        Self {
            topology: TopologySource::default(),
            poller: PollerConfig::default(),
            transmission: TransmissionParams::default(),
            skip_first: true,
        }
    }
}

impl MeshpollConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.topology = match lookup(ENV_SNAPSHOT) {
            Some(path) if !path.is_empty() => TopologySource::Snapshot(PathBuf::from(path)),
            _ => {
                let mut bus = BusConfig::default();
                if let Some(service) = lookup(ENV_BUS_SERVICE) {
                    bus.service = service;
                }
                if let Some(object) = lookup(ENV_BUS_OBJECT) {
                    bus.object_path = object;
                }
                if let Some(interface) = lookup(ENV_BUS_INTERFACE) {
                    bus.interface = interface;
                }
                TopologySource::Bus(bus)
            }
        };

        if let Some(port) = parse_var::<u16>(&lookup, ENV_COAP_PORT)? {
            config.poller.port = port;
        }
        if let Some(path) = lookup(ENV_COAP_PATH) {
            config.poller.resource_path = path;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_POLL_TIMEOUT)? {
            config.poller.poll_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(skip) = lookup(ENV_SKIP_FIRST) {
            config.skip_first = parse_bool(ENV_SKIP_FIRST, &skip)?;
        }

        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
