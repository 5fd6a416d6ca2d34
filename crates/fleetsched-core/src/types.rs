//! Core scheduling types: nodes, placement units and resource vectors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::labels;
use crate::selector::{NodeSelector, PreferredTerm};

// ── Resources ──────────────────────────────────────────────────

/// CPU in milli-units, memory in bytes, GPUs and pod slots as counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub milli_cpu: i64,
    #[serde(default)]
    pub memory: i64,
    #[serde(default)]
    pub gpu: i64,
    #[serde(default)]
    pub pods: i64,
}

impl Resources {
    pub fn new(milli_cpu: i64, memory: i64, gpu: i64, pods: i64) -> Self {
        Self {
            milli_cpu,
            memory,
            gpu,
            pods,
        }
    }

    /// Resource names on which `self` exceeds `capacity`.
    pub fn exceeds(&self, capacity: &Resources) -> Vec<&'static str> {
        let mut insufficient = Vec::new();
        if self.milli_cpu > capacity.milli_cpu {
            insufficient.push("cpu");
        }
        if self.memory > capacity.memory {
            insufficient.push("memory");
        }
        if self.gpu > capacity.gpu {
            insufficient.push("gpu");
        }
        if self.pods > capacity.pods {
            insufficient.push("pods");
        }
        insufficient
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            milli_cpu: self.milli_cpu + rhs.milli_cpu,
            memory: self.memory + rhs.memory,
            gpu: self.gpu + rhs.gpu,
            pods: self.pods + rhs.pods,
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        *self = *self + rhs;
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(self, rhs: Resources) -> Resources {
        Resources {
            milli_cpu: self.milli_cpu - rhs.milli_cpu,
            memory: self.memory - rhs.memory,
            gpu: self.gpu - rhs.gpu,
            pods: self.pods - rhs.pods,
        }
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, rhs: Resources) {
        *self = *self - rhs;
    }
}

// ── Enumerations ───────────────────────────────────────────────

/// Fabric isolation scheme of a node or group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NetworkMode {
    /// Narrow, VLAN isolated.
    Vvv,
    /// Wide fabric, BGP isolated.
    Xbx,
    VvxStandalone,
    IgnoreXbx,
    Other(String),
}

impl NetworkMode {
    pub fn as_str(&self) -> &str {
        match self {
            NetworkMode::Vvv => "VVV",
            NetworkMode::Xbx => "XBX",
            NetworkMode::VvxStandalone => "VVX-standalone",
            NetworkMode::IgnoreXbx => "IGNORE_XBX",
            NetworkMode::Other(s) => s,
        }
    }

    pub fn is_wide_fabric(&self) -> bool {
        *self == NetworkMode::Xbx
    }
}

impl From<&str> for NetworkMode {
    fn from(s: &str) -> Self {
        match s {
            "VVV" => NetworkMode::Vvv,
            "XBX" => NetworkMode::Xbx,
            "VVX-standalone" => NetworkMode::VvxStandalone,
            "IGNORE_XBX" => NetworkMode::IgnoreXbx,
            other => NetworkMode::Other(other.to_string()),
        }
    }
}

impl From<String> for NetworkMode {
    fn from(s: String) -> Self {
        NetworkMode::from(s.as_str())
    }
}

impl From<NetworkMode> for String {
    fn from(mode: NetworkMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceCategory {
    VirtualMachine,
    BareMetalHost,
}

impl InstanceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceCategory::VirtualMachine => "VirtualMachine",
            InstanceCategory::BareMetalHost => "BareMetalHost",
        }
    }
}

// ── Nodes ──────────────────────────────────────────────────────

/// Typed view of the labels a node carries, parsed once on ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTraits {
    pub cluster_group_id: Option<String>,
    pub supercompute_group_id: Option<String>,
    pub network_mode: Option<NetworkMode>,
    pub verified: bool,
    pub unschedulable: bool,
    pub assigned: bool,
    pub firmware_version: Option<String>,
    pub partition: Option<String>,
    pub compute_node_pools: BTreeSet<String>,
    pub instance_types: BTreeSet<String>,
    pub category: Option<InstanceCategory>,
}

impl NodeTraits {
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        let non_empty = |key: &str| {
            labels
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
        };
        let is_true = |key: &str| labels.get(key).is_some_and(|v| v == labels::TRUE);

        let prefixed = |prefix: &str| {
            labels
                .iter()
                .filter(|(_, v)| v.as_str() == labels::TRUE)
                .filter_map(|(k, _)| k.strip_prefix(prefix))
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
        };

        let category = if labels.keys().any(|k| k.contains(labels::VM_NODE_MARKER)) {
            Some(InstanceCategory::VirtualMachine)
        } else if labels
            .keys()
            .any(|k| k.contains(labels::BAREMETAL_NODE_MARKER))
        {
            Some(InstanceCategory::BareMetalHost)
        } else {
            None
        };

        NodeTraits {
            cluster_group_id: non_empty(labels::CLUSTER_GROUP_ID),
            supercompute_group_id: non_empty(labels::SUPERCOMPUTE_GROUP_ID),
            network_mode: non_empty(labels::NETWORK_MODE).map(NetworkMode::from),
            verified: is_true(labels::VERIFIED),
            unschedulable: is_true(labels::UNSCHEDULABLE),
            assigned: is_true(labels::NODE_ASSIGNED),
            firmware_version: non_empty(labels::FIRMWARE_VERSION),
            partition: non_empty(labels::PARTITION),
            compute_node_pools: prefixed(labels::COMPUTE_NODE_POOL_PREFIX),
            instance_types: prefixed(labels::INSTANCE_TYPE_PREFIX),
            category,
        }
    }
}

/// A schedulable unit of capacity, named `clusterId/localName`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    labels: BTreeMap<String, String>,
    pub allocatable: Resources,
    traits: NodeTraits,
}

impl Node {
    pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>, allocatable: Resources) -> Self {
        let traits = NodeTraits::from_labels(&labels);
        Self {
            name: name.into(),
            labels,
            allocatable,
            traits,
        }
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn traits(&self) -> &NodeTraits {
        &self.traits
    }

    /// Set a label and refresh the parsed traits.
    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
        self.traits = NodeTraits::from_labels(&self.labels);
    }
}

// ── Placement units ────────────────────────────────────────────

/// Spread placement units evenly across values of `topology_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySpreadConstraint {
    pub topology_key: String,
    pub max_skew: i64,
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl TopologySpreadConstraint {
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// One instance request in scheduler-internal form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementUnit {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub requests: Resources,
    /// Qualified host name once assumed or bound.
    pub node_name: Option<String>,
    pub nominated_node_name: Option<String>,
    pub scheduler_name: String,
    pub category: Option<InstanceCategory>,
    pub network_mode: Option<NetworkMode>,
    pub required_affinity: Option<NodeSelector>,
    pub preferred_affinity: Vec<PreferredTerm>,
    pub topology_spread: Vec<TopologySpreadConstraint>,
}

impl PlacementUnit {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Cache key, `namespace/name`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_requests(mut self, requests: Resources) -> Self {
        self.requests = requests;
        self
    }

    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_scheduler_name(mut self, scheduler_name: impl Into<String>) -> Self {
        self.scheduler_name = scheduler_name.into();
        self
    }

    pub fn is_bare_metal(&self) -> bool {
        self.category == Some(InstanceCategory::BareMetalHost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn traits_parse_group_and_flags() {
        let traits = NodeTraits::from_labels(&labels(&[
            (labels::CLUSTER_GROUP_ID, "cg-1"),
            (labels::SUPERCOMPUTE_GROUP_ID, ""),
            (labels::NETWORK_MODE, "XBX"),
            (labels::VERIFIED, "true"),
            (labels::UNSCHEDULABLE, "false"),
            (labels::MEMORY_SIZE, "2048Gi"),
            ("instance-type.fleetsched.io/bm-spr", "true"),
            ("instance-type.fleetsched.io/bm-icx", "false"),
            ("pool.fleetsched.io/general", "true"),
        ]));
        assert_eq!(traits.cluster_group_id.as_deref(), Some("cg-1"));
        assert_eq!(traits.supercompute_group_id, None);
        assert_eq!(traits.network_mode, Some(NetworkMode::Xbx));
        assert!(traits.verified);
        assert!(!traits.unschedulable);
        assert!(!traits.assigned);
        assert_eq!(traits.category, Some(InstanceCategory::BareMetalHost));
        assert_eq!(traits.instance_types.len(), 1);
        assert!(traits.instance_types.contains("bm-spr"));
        assert!(traits.compute_node_pools.contains("general"));
    }

    #[test]
    fn set_label_refreshes_traits() {
        let mut node = Node::new("c/n", BTreeMap::new(), Resources::default());
        assert!(!node.traits().assigned);
        node.set_label(labels::NODE_ASSIGNED, "true");
        assert!(node.traits().assigned);
    }

    #[test]
    fn network_mode_round_trips_through_strings() {
        for raw in ["VVV", "XBX", "VVX-standalone", "IGNORE_XBX", "custom"] {
            let mode = NetworkMode::from(raw);
            assert_eq!(mode.as_str(), raw);
        }
        assert!(NetworkMode::Xbx.is_wide_fabric());
        let json = serde_json::to_string(&NetworkMode::Vvv).unwrap();
        assert_eq!(json, "\"VVV\"");
    }

    #[test]
    fn resource_arithmetic_and_fit() {
        let a = Resources::new(1000, 10, 1, 1);
        let b = Resources::new(500, 5, 0, 1);
        assert_eq!(a + b, Resources::new(1500, 15, 1, 2));
        assert_eq!(a - b, Resources::new(500, 5, 1, 0));
        assert_eq!((a + b).exceeds(&a), vec!["cpu", "memory", "pods"]);
        assert!(b.exceeds(&a).is_empty());
    }

    #[test]
    fn unit_key_and_spread_selection() {
        let unit = PlacementUnit::new("acct", "inst-1");
        assert_eq!(unit.key(), "acct/inst-1");

        let constraint = TopologySpreadConstraint {
            topology_key: labels::PARTITION.into(),
            max_skew: 1,
            match_labels: labels(&[("app", "db")]),
        };
        assert!(constraint.selects(&labels(&[("app", "db"), ("x", "y")])));
        assert!(!constraint.selects(&labels(&[("app", "web")])));
    }
}
