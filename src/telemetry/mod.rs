//! # Telemetry Module - node polling for the mesh
//!
//! Fetches each node's telemetry resource over CoAP and turns the payload
//! into an ordered list of fields:
//! - Transport: confirmable CoAP GET over UDP
//! - Parser: lenient `"key":value` extraction
//! - Poller: one request per node, failures returned as values

pub mod parser;
pub mod poller;
pub mod transport;

pub use parser::FieldExtractor;
pub use poller::{PollResult, PollStats, PollerConfig, TelemetryPoller};
pub use transport::{CoapTransport, CoapUri, TransmissionParams, UdpCoapTransport};
