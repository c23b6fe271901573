//! # meshpoll
//!
//! Enumerates the nodes of a Wi-SUN mesh through the border router,
//! derives each node's canonical address and polls its CoAP telemetry
//! resource.
//!
//! - [`topology`]: node enumeration and address normalization
//! - [`telemetry`]: CoAP transport, payload extraction, polling
//! - [`session`]: one sequential resolve-and-poll run

pub mod config;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod topology;
pub mod types;

pub use config::{MeshpollConfig, TopologySource};
pub use error::{ConfigError, PollError, ProviderError, TransportError};
pub use session::{PollSession, RunStats};
pub use telemetry::{CoapTransport, PollResult, PollerConfig, TelemetryPoller, UdpCoapTransport};
pub use topology::{AddressResolver, CanonicalAddress, TopologyPayload, TopologyProvider};
pub use types::{Reading, TelemetryField};
