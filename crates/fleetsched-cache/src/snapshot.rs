//! Per-node aggregates and the per-cycle snapshot handed to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use fleetsched_core::{Node, PlacementUnit, Resources};

/// A node together with the placement units bound or assumed on it.
///
/// A `NodeInfo` without a node is a ghost: the node was removed while
/// units were still recorded against it.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    node: Option<Arc<Node>>,
    pub units: Vec<PlacementUnit>,
    pub requested: Resources,
    pub generation: u64,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node: Some(Arc::new(node)),
            ..Default::default()
        }
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_deref()
    }

    pub fn shared_node(&self) -> Option<Arc<Node>> {
        self.node.clone()
    }

    pub fn set_node(&mut self, node: Node) {
        self.node = Some(Arc::new(node));
    }

    pub fn clear_node(&mut self) {
        self.node = None;
    }

    pub fn allocatable(&self) -> Resources {
        self.node().map(|n| n.allocatable).unwrap_or_default()
    }

    /// Allocatable minus requested.
    pub fn free(&self) -> Resources {
        self.allocatable() - self.requested
    }

    pub fn add_unit(&mut self, unit: PlacementUnit) {
        self.requested += unit_requests(&unit);
        self.units.push(unit);
    }

    /// Remove the unit with `key`, returning whether it was present.
    pub fn remove_unit(&mut self, key: &str) -> bool {
        match self.units.iter().position(|u| u.key() == key) {
            Some(idx) => {
                let unit = self.units.swap_remove(idx);
                self.requested -= unit_requests(&unit);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none() && self.units.is_empty()
    }
}

/// Every unit occupies one pod slot regardless of its declared requests.
fn unit_requests(unit: &PlacementUnit) -> Resources {
    Resources {
        pods: 1,
        ..unit.requests
    }
}

/// Point-in-time copy of every live node, refreshed incrementally by
/// [`crate::CapacityCache::update_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub(crate) node_infos: HashMap<String, NodeInfo>,
    pub(crate) node_list: Vec<String>,
    pub(crate) generation: u64,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot directly from nodes and bound units.
    ///
    /// Units whose node is missing are ignored.
    pub fn from_parts(nodes: Vec<Node>, units: Vec<PlacementUnit>) -> Self {
        let mut snapshot = Snapshot::new();
        for node in nodes {
            snapshot.node_list.push(node.name.clone());
            snapshot
                .node_infos
                .insert(node.name.clone(), NodeInfo::new(node));
        }
        snapshot.node_list.sort();
        for unit in units {
            if let Some(info) = unit
                .node_name
                .as_ref()
                .and_then(|n| snapshot.node_infos.get_mut(n))
            {
                info.add_unit(unit);
            }
        }
        snapshot
    }

    pub fn num_nodes(&self) -> usize {
        self.node_list.len()
    }

    pub fn get(&self, node_name: &str) -> Option<&NodeInfo> {
        self.node_infos.get(node_name)
    }

    /// Node infos in stable name order.
    pub fn list(&self) -> Vec<&NodeInfo> {
        self.node_list
            .iter()
            .filter_map(|name| self.node_infos.get(name))
            .collect()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_node(name: &str) -> Node {
        Node::new(name, BTreeMap::new(), Resources::new(4000, 1 << 30, 0, 10))
    }

    fn make_unit(name: &str, node: &str, milli_cpu: i64) -> PlacementUnit {
        PlacementUnit::new("ns", name)
            .with_requests(Resources::new(milli_cpu, 0, 0, 0))
            .with_node_name(node)
    }

    #[test]
    fn node_info_tracks_requested_resources() {
        let mut info = NodeInfo::new(make_node("c/n1"));
        info.add_unit(make_unit("a", "c/n1", 1000));
        info.add_unit(make_unit("b", "c/n1", 500));
        assert_eq!(info.requested, Resources::new(1500, 0, 0, 2));
        assert_eq!(info.free().milli_cpu, 2500);

        assert!(info.remove_unit("ns/a"));
        assert!(!info.remove_unit("ns/a"));
        assert_eq!(info.requested, Resources::new(500, 0, 0, 1));
    }

    #[test]
    fn from_parts_orders_nodes_and_binds_units() {
        let snapshot = Snapshot::from_parts(
            vec![make_node("c/n2"), make_node("c/n1")],
            vec![make_unit("a", "c/n2", 100), make_unit("b", "c/missing", 100)],
        );
        assert_eq!(snapshot.num_nodes(), 2);
        let names: Vec<_> = snapshot
            .list()
            .iter()
            .filter_map(|i| i.node().map(|n| n.name.clone()))
            .collect();
        assert_eq!(names, vec!["c/n1", "c/n2"]);
        assert_eq!(snapshot.get("c/n2").unwrap().units.len(), 1);
    }
}
