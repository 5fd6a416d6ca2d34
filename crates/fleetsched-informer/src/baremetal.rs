//! BareMetalHost translation.
//!
//! An enrolled host becomes a synthetic node that can hold exactly one
//! placement unit. A host that is not available for new tenants carries a
//! synthetic reservation unit so the group model counts it as occupied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fleetsched_core::{
    InstanceCategory, Node, PlacementUnit, Quantity, Resources, labels, qualify,
};

use crate::error::{BridgeError, BridgeResult};
use crate::objects::ObjectMeta;

pub const STATE_AVAILABLE: &str = "available";
pub const PAUSED_ANNOTATION: &str = "baremetalhost.metal3.io/paused";

/// Memory is not a limiting resource on bare metal; every host advertises
/// the same ceiling.
pub const HOST_MEMORY_CEILING: &str = "10000Gi";
/// A host runs a single tenant workload.
pub const HOST_UNIT_ALLOWANCE: i64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BareMetalHost {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: BareMetalHostSpec,
    #[serde(default)]
    pub status: BareMetalHostStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostSpec {
    #[serde(default)]
    pub consumer_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostStatus {
    #[serde(default)]
    pub provisioning: ProvisionStatus,
    #[serde(default)]
    pub error_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionStatus {
    #[serde(default)]
    pub state: String,
}

impl BareMetalHost {
    /// `namespace/name`, which is already a qualified name.
    pub fn node_name(&self, cluster_id: &str) -> String {
        qualify(
            cluster_id,
            &format!("{}/{}", self.metadata.namespace, self.metadata.name),
        )
    }

    /// Free for a new tenant.
    pub fn is_available(&self) -> bool {
        self.status.provisioning.state == STATE_AVAILABLE
            && self.spec.consumer_ref.is_none()
            && self.status.error_count == 0
            && self.metadata.deletion_timestamp.is_none()
            && !self.metadata.annotations.contains_key(PAUSED_ANNOTATION)
    }

    /// Enrollment labels the host once it finishes; until then it has no
    /// capacity.
    pub fn is_enrolled(&self) -> bool {
        !self.metadata.labels.is_empty()
    }

    pub fn to_node(&self, cluster_id: &str) -> BridgeResult<Node> {
        let allocatable = if self.is_enrolled() {
            let memory: Quantity = HOST_MEMORY_CEILING.parse()?;
            Resources {
                milli_cpu: self.count_label(labels::CPU_COUNT)? * 1000,
                memory: memory.value(),
                gpu: self.count_label(labels::GPU_COUNT)?,
                pods: HOST_UNIT_ALLOWANCE,
            }
        } else {
            Resources::default()
        };
        Ok(Node::new(
            self.node_name(cluster_id),
            self.metadata.labels.clone(),
            allocatable,
        ))
    }

    /// The unit that marks this host occupied. Its labels come from the
    /// consumer reference, falling back to the last association recorded
    /// by enrollment.
    pub fn reservation_unit(&self, cluster_id: &str) -> PlacementUnit {
        let host_labels = &self.metadata.labels;
        let mut unit_labels = BTreeMap::new();
        let resource_id = self
            .spec
            .consumer_ref
            .as_ref()
            .map(|r| r.name.clone())
            .or_else(|| host_labels.get(labels::LAST_ASSOCIATED_INSTANCE).cloned());
        if let Some(resource_id) = resource_id {
            unit_labels.insert(labels::RESOURCE_ID.to_string(), resource_id);
        }
        if let Some(group) = host_labels.get(labels::LAST_CLUSTER_GROUP) {
            unit_labels.insert(labels::INSTANCE_GROUP.to_string(), group.clone());
        }
        PlacementUnit {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
            labels: unit_labels,
            requests: Resources::default(),
            node_name: Some(self.node_name(cluster_id)),
            category: Some(InstanceCategory::BareMetalHost),
            ..Default::default()
        }
    }

    /// A missing count label reads as zero; a malformed one is an error.
    fn count_label(&self, label: &'static str) -> BridgeResult<i64> {
        match self.metadata.labels.get(label) {
            None => Ok(0),
            Some(value) => value.trim().parse().map_err(|_| BridgeError::InvalidLabel {
                label,
                value: value.clone(),
            }),
        }
    }
}
