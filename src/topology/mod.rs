//! Mesh topology - node enumeration and address normalization.
//!
//! Queries the border router once per run and yields the canonical
//! addresses of every pollable node.

pub mod address;
pub mod provider;
pub mod resolver;

pub use address::CanonicalAddress;
pub use provider::{
    AttrValue, BusConfig, BusctlProvider, GraphEntry, NodeRecord, SnapshotProvider,
    TopologyProvider,
};
pub use resolver::{AddressResolver, TopologyPayload};
