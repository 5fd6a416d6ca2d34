//! Wire shapes of the node and pod objects delivered by VM cells.
//!
//! Only the fields the scheduler reads are modelled; everything else in a
//! watch payload is ignored on decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fleetsched_core::{
    InstanceCategory, Node, PlacementUnit, Quantity, Resources, labels, qualify,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub deletion_timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub allocatable: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub scheduler_name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
}

/// Sum a resource list into a typed vector. Extended resources whose name
/// mentions a GPU count as GPUs.
pub fn resources_from_list(list: &BTreeMap<String, Quantity>) -> Resources {
    let mut resources = Resources::default();
    for (name, qty) in list {
        match name.as_str() {
            "cpu" => resources.milli_cpu += qty.milli_value(),
            "memory" => resources.memory += qty.value(),
            "pods" => resources.pods += qty.value(),
            other if other.contains("gpu") => resources.gpu += qty.value(),
            _ => {}
        }
    }
    resources
}

impl NodeObject {
    pub fn into_node(self, cluster_id: &str) -> Node {
        let allocatable = resources_from_list(&self.status.allocatable);
        Node::new(
            qualify(cluster_id, &self.metadata.name),
            self.metadata.labels,
            allocatable,
        )
    }
}

impl PodObject {
    /// Bound to a node.
    pub fn is_assigned(&self) -> bool {
        self.spec.node_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// `Succeeded` and `Failed` pods no longer hold capacity.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.phase.as_deref(), Some("Succeeded" | "Failed"))
    }

    pub fn into_unit(self, cluster_id: &str) -> PlacementUnit {
        let requests = self
            .spec
            .containers
            .iter()
            .map(|c| resources_from_list(&c.resources.requests))
            .fold(Resources::default(), |acc, r| acc + r);
        let category = match self.metadata.labels.get(labels::INSTANCE_CATEGORY) {
            Some(v) if v == InstanceCategory::BareMetalHost.as_str() => {
                InstanceCategory::BareMetalHost
            }
            _ => InstanceCategory::VirtualMachine,
        };
        PlacementUnit {
            namespace: self.metadata.namespace,
            name: qualify(cluster_id, &self.metadata.name),
            labels: self.metadata.labels,
            requests,
            node_name: self.spec.node_name.map(|n| qualify(cluster_id, &n)),
            scheduler_name: self.spec.scheduler_name,
            category: Some(category),
            ..Default::default()
        }
    }
}
