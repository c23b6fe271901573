//! Topology providers - sources of the border router's node list.
//!
//! Two implementations:
//! 1. **BusctlProvider**: queries the live border router over the system bus
//!    through `busctl --json=short get-property`
//! 2. **SnapshotProvider**: reads the same JSON documents from a file, for
//!    offline runs and fixtures
//!
//! Both decode busctl's JSON rendering of D-Bus values: a property is an
//! envelope `{"type": <signature>, "data": <value>}`, structs are arrays,
//! string-keyed dicts are objects, and variants are nested envelopes.

use crate::error::ProviderError;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

// ================================================================================================
// RECORDS
// ================================================================================================

/// A decoded D-Bus variant from a legacy node's attribute map.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Bytes(Vec<u8>),
    ByteGroups(Vec<Vec<u8>>),
    Uint(u64),
    Bool(bool),
    Text(String),
    /// Any signature this crate has no use for
    Other,
}

/// One entry of the legacy `Nodes` property: (id, attributes).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeRecord {
    pub id: Vec<u8>,
    pub attributes: HashMap<String, AttrValue>,
}

impl NodeRecord {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: AttrValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }
}

/// One entry of the current `RoutingGraph` property.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphEntry {
    /// Raw address bytes of the node
    pub address: Vec<u8>,
    /// Whether the node is a limited-function node
    pub is_lfn: bool,
    /// Raw addresses of the node's parents
    pub parents: Vec<Vec<u8>>,
}

impl GraphEntry {
    pub fn new(address: Vec<u8>) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }
}

// ================================================================================================
// PROVIDER TRAIT
// ================================================================================================

/// Read-only access to the border router's topology.
///
/// Queries are blocking and are issued once per run.
pub trait TopologyProvider {
    /// Fetches the `Nodes` property.
    fn nodes(&self) -> Result<Vec<NodeRecord>, ProviderError>;

    /// Fetches the `RoutingGraph` property.
    fn routing_graph(&self) -> Result<Vec<GraphEntry>, ProviderError>;
}

impl<P: TopologyProvider + ?Sized> TopologyProvider for Box<P> {
    fn nodes(&self) -> Result<Vec<NodeRecord>, ProviderError> {
        (**self).nodes()
    }

    fn routing_graph(&self) -> Result<Vec<GraphEntry>, ProviderError> {
        (**self).routing_graph()
    }
}

// ================================================================================================
// BUSCTL PROVIDER
// ================================================================================================

/// System bus coordinates of the border router service.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Well-known bus name
    pub service: String,
    /// Object exposing the topology properties
    pub object_path: String,
    /// Interface owning the properties
    pub interface: String,
    /// busctl executable
    pub busctl: PathBuf,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service: "com.silabs.Wisun.BorderRouter".to_string(),
            object_path: "/com/silabs/Wisun/BorderRouter".to_string(),
            interface: "com.silabs.Wisun.BorderRouter".to_string(),
            busctl: PathBuf::from("busctl"),
        }
    }
}

/// Queries the live border router through `busctl`.
pub struct BusctlProvider {
    config: BusConfig,
}

impl BusctlProvider {
    pub fn new(config: BusConfig) -> Self {
        Self { config }
    }

    fn get_property(&self, property: &str) -> Result<BusctlDocument, ProviderError> {
        let args = [
            "--system",
            "--json=short",
            "get-property",
            self.config.service.as_str(),
            self.config.object_path.as_str(),
            self.config.interface.as_str(),
            property,
        ];
        let command = format!("{} {}", self.config.busctl.display(), args.join(" "));
        debug!("Querying topology: {}", command);

        let output = Command::new(&self.config.busctl)
            .args(args)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ProviderError::Unavailable(format!(
                    "{} not found",
                    self.config.busctl.display()
                )),
                _ => ProviderError::Io(e),
            })?;

        if !output.status.success() {
            return Err(ProviderError::Command {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

impl TopologyProvider for BusctlProvider {
    fn nodes(&self) -> Result<Vec<NodeRecord>, ProviderError> {
        decode_nodes(&self.get_property("Nodes")?)
    }

    fn routing_graph(&self) -> Result<Vec<GraphEntry>, ProviderError> {
        decode_routing_graph(&self.get_property("RoutingGraph")?)
    }
}

// ================================================================================================
// SNAPSHOT PROVIDER
// ================================================================================================

/// Snapshot file layout: the busctl documents of both properties.
#[derive(Debug, Deserialize)]
struct Snapshot {
    nodes: BusctlDocument,
    #[serde(default)]
    routing_graph: Option<BusctlDocument>,
}

/// Reads topology from a JSON snapshot on disk.
pub struct SnapshotProvider {
    path: PathBuf,
}

impl SnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Snapshot, ProviderError> {
        let raw = std::fs::read(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                ProviderError::Unavailable(format!("snapshot {} not found", self.path.display()))
            }
            _ => ProviderError::Io(e),
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl TopologyProvider for SnapshotProvider {
    fn nodes(&self) -> Result<Vec<NodeRecord>, ProviderError> {
        decode_nodes(&self.load()?.nodes)
    }

    fn routing_graph(&self) -> Result<Vec<GraphEntry>, ProviderError> {
        match self.load()?.routing_graph {
            Some(doc) => decode_routing_graph(&doc),
            None => Err(ProviderError::Malformed(format!(
                "snapshot {} has no routing_graph",
                self.path.display()
            ))),
        }
    }
}

// ================================================================================================
// BUSCTL JSON DECODING
// ================================================================================================

/// busctl's JSON envelope for a single value.
#[derive(Debug, Clone, Deserialize)]
pub struct BusctlDocument {
    #[serde(rename = "type")]
    pub signature: String,
    pub data: Value,
}

/// Decodes a `Nodes` document (`a(aya{sv})`).
///
/// Only a document that is not an array is an error. Entries of the wrong
/// shape are dropped.
pub fn decode_nodes(doc: &BusctlDocument) -> Result<Vec<NodeRecord>, ProviderError> {
    let entries = doc
        .data
        .as_array()
        .ok_or_else(|| malformed("Nodes", "expected an array"))?;

    Ok(entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let record = decode_node(entry);
            if record.is_none() {
                debug!("Skipping Nodes entry {}: not an (id, attrs) record", idx);
            }
            record
        })
        .collect())
}

fn decode_node(entry: &Value) -> Option<NodeRecord> {
    let fields = entry.as_array().filter(|f| f.len() == 2)?;
    let id = decode_bytes(&fields[0])?;
    let attributes = fields[1]
        .as_object()?
        .iter()
        .map(|(key, variant)| (key.clone(), decode_variant(variant)))
        .collect();

    Some(NodeRecord { id, attributes })
}

/// Decodes a `RoutingGraph` document (`a(aybaay)`).
///
/// Entries without a byte address are dropped.
pub fn decode_routing_graph(doc: &BusctlDocument) -> Result<Vec<GraphEntry>, ProviderError> {
    let entries = doc
        .data
        .as_array()
        .ok_or_else(|| malformed("RoutingGraph", "expected an array"))?;

    Ok(entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let graph_entry = decode_graph_entry(entry);
            if graph_entry.is_none() {
                debug!("Skipping RoutingGraph entry {}: no byte address", idx);
            }
            graph_entry
        })
        .collect())
}

fn decode_graph_entry(entry: &Value) -> Option<GraphEntry> {
    let fields = entry.as_array()?;
    let address = decode_bytes(fields.first()?)?;
    let is_lfn = fields.get(1).and_then(Value::as_bool).unwrap_or(false);
    let parents = fields
        .get(2)
        .and_then(decode_byte_groups)
        .unwrap_or_default();

    Some(GraphEntry {
        address,
        is_lfn,
        parents,
    })
}

fn decode_variant(variant: &Value) -> AttrValue {
    let (signature, data) = match (variant.get("type").and_then(Value::as_str), variant.get("data")) {
        (Some(signature), Some(data)) => (signature, data),
        _ => return AttrValue::Other,
    };

    let decoded = match signature {
        "ay" => decode_bytes(data).map(AttrValue::Bytes),
        "aay" => decode_byte_groups(data).map(AttrValue::ByteGroups),
        "y" | "q" | "u" | "t" | "n" | "i" | "x" => data.as_u64().map(AttrValue::Uint),
        "b" => data.as_bool().map(AttrValue::Bool),
        "s" | "o" | "g" => data.as_str().map(|s| AttrValue::Text(s.to_string())),
        _ => None,
    };

    decoded.unwrap_or(AttrValue::Other)
}

fn decode_bytes(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|b| b.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn decode_byte_groups(value: &Value) -> Option<Vec<Vec<u8>>> {
    value.as_array()?.iter().map(decode_bytes).collect()
}

fn malformed(property: &str, reason: &str) -> ProviderError {
    ProviderError::Malformed(format!("{}: {}", property, reason))
}
