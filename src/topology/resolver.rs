//! Address resolver - turns the border router's topology into pollable
//! node addresses.
//!
//! The provider exposes one of two schemas per run:
//! - **Legacy** (`Nodes` carries an `ipv6` attribute): every record is
//!   filtered down to routable nodes
//! - **Current** (`Nodes` has no `ipv6` attribute): the `RoutingGraph`
//!   property lists every enumerable endpoint directly
//!
//! The schema is decided once, from the first `Nodes` record.

use super::address::CanonicalAddress;
use super::provider::{AttrValue, GraphEntry, NodeRecord, TopologyProvider};
use crate::error::ProviderError;
use log::{debug, info};

/// Attribute holding a legacy node's address groups.
pub const IPV6_ATTR: &str = "ipv6";
/// Attribute present on every non-root legacy node.
pub const PARENT_ATTR: &str = "parent";
/// Attribute carrying a legacy node's role code.
pub const NODE_ROLE_ATTR: &str = "node_role";
/// Role code of nodes that are reachable without a parent.
pub const ROUTABLE_ROLE: u64 = 2;

/// Topology classified by schema version.
#[derive(Clone, Debug, PartialEq)]
pub enum TopologyPayload {
    /// D-Bus API < 2.0 node list
    Legacy(Vec<NodeRecord>),
    /// D-Bus API >= 2.0 routing graph
    Current(Vec<GraphEntry>),
}

impl TopologyPayload {
    /// Raw address bytes of every selected node, in provider order.
    pub fn selected_addresses(&self) -> Vec<&[u8]> {
        match self {
            TopologyPayload::Legacy(nodes) => nodes.iter().filter_map(routable_address).collect(),
            TopologyPayload::Current(graph) => {
                graph.iter().map(|entry| entry.address.as_slice()).collect()
            }
        }
    }

    pub fn schema_name(&self) -> &'static str {
        match self {
            TopologyPayload::Legacy(_) => "legacy",
            TopologyPayload::Current(_) => "routing-graph",
        }
    }
}

/// Resolves node addresses through a topology provider.
pub struct AddressResolver<P> {
    provider: P,
}

impl<P: TopologyProvider> AddressResolver<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Queries the provider and decides the active schema.
    ///
    /// An empty node list classifies as an empty legacy payload.
    pub fn classify(&self) -> Result<TopologyPayload, ProviderError> {
        let nodes = self.provider.nodes()?;

        match nodes.first() {
            None => Ok(TopologyPayload::Legacy(nodes)),
            Some(first) if first.has(IPV6_ATTR) => Ok(TopologyPayload::Legacy(nodes)),
            Some(_) => Ok(TopologyPayload::Current(self.provider.routing_graph()?)),
        }
    }

    /// Returns canonical addresses of every reachable node, in provider
    /// order. Never sorted or deduplicated.
    pub fn resolve_addresses(&self) -> Result<Vec<CanonicalAddress>, ProviderError> {
        let payload = self.classify()?;

        let addresses: Vec<CanonicalAddress> = payload
            .selected_addresses()
            .into_iter()
            .map(CanonicalAddress::from_bytes)
            .collect();

        info!(
            "Resolved {} node addresses from {} topology",
            addresses.len(),
            payload.schema_name()
        );

        Ok(addresses)
    }
}

/// Address bytes of a legacy record that names a routable node.
///
/// Records with a malformed `ipv6` attribute, or with neither a parent nor
/// the routable role, are skipped.
fn routable_address(node: &NodeRecord) -> Option<&[u8]> {
    let groups = match node.get(IPV6_ATTR) {
        Some(AttrValue::ByteGroups(groups)) if groups.len() == 2 => groups,
        _ => {
            debug!("Skipping node {:02x?}: no two-group ipv6 attribute", node.id);
            return None;
        }
    };

    let routable_role = matches!(node.get(NODE_ROLE_ATTR), Some(AttrValue::Uint(ROUTABLE_ROLE)));
    if !node.has(PARENT_ATTR) && !routable_role {
        debug!("Skipping node {:02x?}: no parent and not a routable role", node.id);
        return None;
    }

    Some(groups[1].as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct StaticProvider {
        nodes: Vec<NodeRecord>,
        graph: Vec<GraphEntry>,
        graph_queries: Cell<usize>,
    }

    impl StaticProvider {
        fn new(nodes: Vec<NodeRecord>, graph: Vec<GraphEntry>) -> Self {
            Self {
                nodes,
                graph,
                graph_queries: Cell::new(0),
            }
        }
    }

    impl TopologyProvider for StaticProvider {
        fn nodes(&self) -> Result<Vec<NodeRecord>, ProviderError> {
            Ok(self.nodes.clone())
        }

        fn routing_graph(&self) -> Result<Vec<GraphEntry>, ProviderError> {
            self.graph_queries.set(self.graph_queries.get() + 1);
            Ok(self.graph.clone())
        }
    }

    fn addr_bytes(last: u8) -> Vec<u8> {
        let mut bytes = vec![0xfd, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        bytes[15] = last;
        bytes
    }

    fn legacy_node(last: u8) -> NodeRecord {
        NodeRecord::new(vec![last]).with_attr(
            IPV6_ATTR,
            AttrValue::ByteGroups(vec![vec![0xfe, 0x80], addr_bytes(last)]),
        )
    }

    #[test]
    fn test_single_group_ipv6_is_excluded() {
        let node = NodeRecord::new(vec![1])
            .with_attr(IPV6_ATTR, AttrValue::ByteGroups(vec![addr_bytes(1)]))
            .with_attr(PARENT_ATTR, AttrValue::Bytes(vec![0]))
            .with_attr(NODE_ROLE_ATTR, AttrValue::Uint(ROUTABLE_ROLE));

        assert_eq!(routable_address(&node), None);
    }

    #[test]
    fn test_role_without_parent() {
        let routable = legacy_node(1).with_attr(NODE_ROLE_ATTR, AttrValue::Uint(2));
        let leaf = legacy_node(2).with_attr(NODE_ROLE_ATTR, AttrValue::Uint(1));
        let bare = legacy_node(3);

        assert_eq!(routable_address(&routable), Some(addr_bytes(1).as_slice()));
        assert_eq!(routable_address(&leaf), None);
        assert_eq!(routable_address(&bare), None);
    }

    #[test]
    fn test_parent_without_role_is_included() {
        let node = legacy_node(4).with_attr(PARENT_ATTR, AttrValue::Bytes(vec![1]));
        assert_eq!(routable_address(&node), Some(addr_bytes(4).as_slice()));
    }

    #[test]
    fn test_classify_legacy_does_not_query_graph() {
        let provider = StaticProvider::new(vec![legacy_node(1)], vec![GraphEntry::new(addr_bytes(9))]);
        let resolver = AddressResolver::new(provider);

        let payload = resolver.classify().unwrap();
        assert!(matches!(payload, TopologyPayload::Legacy(_)));
        assert_eq!(resolver.provider().graph_queries.get(), 0);
    }

    #[test]
    fn test_classify_current_uses_routing_graph() {
        let provider = StaticProvider::new(
            vec![NodeRecord::new(vec![1])],
            vec![GraphEntry::new(addr_bytes(7)), GraphEntry::new(addr_bytes(3))],
        );
        let resolver = AddressResolver::new(provider);

        let addresses = resolver.resolve_addresses().unwrap();
        let text: Vec<&str> = addresses.iter().map(|a| a.as_str()).collect();
        assert_eq!(text, vec!["fd00::7", "fd00::3"]);
        assert_eq!(resolver.provider().graph_queries.get(), 1);
    }

    #[test]
    fn test_empty_node_list() {
        let resolver = AddressResolver::new(StaticProvider::new(Vec::new(), Vec::new()));
        assert!(resolver.resolve_addresses().unwrap().is_empty());
        assert_eq!(resolver.provider().graph_queries.get(), 0);
    }

    #[test]
    fn test_legacy_order_and_duplicates_preserved() {
        let nodes = vec![
            legacy_node(9).with_attr(PARENT_ATTR, AttrValue::Bytes(vec![1])),
            legacy_node(2).with_attr(NODE_ROLE_ATTR, AttrValue::Uint(1)),
            legacy_node(5).with_attr(NODE_ROLE_ATTR, AttrValue::Uint(2)),
            legacy_node(9).with_attr(PARENT_ATTR, AttrValue::Bytes(vec![1])),
        ];
        let resolver = AddressResolver::new(StaticProvider::new(nodes, Vec::new()));

        let addresses = resolver.resolve_addresses().unwrap();
        let text: Vec<&str> = addresses.iter().map(|a| a.as_str()).collect();
        assert_eq!(text, vec!["fd00::9", "fd00::5", "fd00::9"]);
    }
}
