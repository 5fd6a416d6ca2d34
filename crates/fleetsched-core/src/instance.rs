//! Instance requests accepted by the scheduler and the placements it
//! returns.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;
use crate::types::{InstanceCategory, NetworkMode};

/// One instance to place. A batch of these forms an instance group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub cloud_account_id: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: Option<InstanceSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    #[serde(default)]
    pub instance_type: String,
    pub instance_type_spec: Option<InstanceTypeSpec>,
    #[serde(default)]
    pub instance_group: String,
    #[serde(default)]
    pub instance_group_size: u32,
    /// One id, or a comma-separated candidate list.
    #[serde(default)]
    pub cluster_group_id: String,
    /// One id, or a comma-separated candidate list.
    #[serde(default)]
    pub supercompute_group_id: String,
    #[serde(default)]
    pub network_mode: String,
    #[serde(default)]
    pub compute_node_pools: Vec<String>,
    #[serde(default)]
    pub topology_spread: Vec<SpreadSpec>,
}

/// Spread instances selected by `match_labels` across partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadSpec {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Resource shape of an instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceTypeSpec {
    pub name: String,
    pub category: InstanceCategory,
    pub cpu: Option<CpuSpec>,
    pub memory: Option<MemorySpec>,
    pub gpu: Option<GpuSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSpec {
    pub cores: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySpec {
    pub size: Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSpec {
    #[serde(default)]
    pub model_name: String,
    pub count: i64,
}

impl InstanceTypeSpec {
    pub fn gpu_count(&self) -> i64 {
        self.gpu.as_ref().map_or(0, |g| g.count)
    }
}

/// Network placement derived for a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub network_mode: Option<NetworkMode>,
    pub cluster_group_ids: BTreeSet<String>,
    pub supercompute_group_ids: BTreeSet<String>,
}

/// Where one instance of a batch was placed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceResult {
    pub cluster_id: String,
    pub node_id: String,
    pub partition: String,
    pub group_id: String,
    pub supercompute_group_id: String,
    pub network_mode: String,
    pub compute_node_pools: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub instance_results: Vec<InstanceResult>,
}

/// Split a comma-separated id list, dropping empty entries.
pub fn split_ids(ids: &str) -> BTreeSet<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
