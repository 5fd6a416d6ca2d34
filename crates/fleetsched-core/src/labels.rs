//! Label vocabulary shared by the enrollment producer, the cache bridge and
//! the scheduler.
//!
//! Node labels are parsed once into [`crate::types::NodeTraits`]; hot paths
//! never look these keys up again.

// ── Node labels ────────────────────────────────────────────────

pub const CLUSTER_GROUP_ID: &str = "cloud.fleetsched.io/instance-group-id";
pub const SUPERCOMPUTE_GROUP_ID: &str = "cloud.fleetsched.io/supercompute-group-id";
pub const NETWORK_MODE: &str = "cloud.fleetsched.io/network-mode";
pub const VERIFIED: &str = "cloud.fleetsched.io/verified";
pub const UNSCHEDULABLE: &str = "cloud.fleetsched.io/unschedulable";
pub const NODE_ASSIGNED: &str = "scheduling.fleetsched.io/node-assigned";
pub const PARTITION: &str = "cloud.fleetsched.io/partition";
pub const FIRMWARE_VERSION: &str = "cloud.fleetsched.io/firmware-version";

pub const CPU_COUNT: &str = "cloud.fleetsched.io/host-cpu-count";
pub const GPU_COUNT: &str = "cloud.fleetsched.io/host-gpu-count";
pub const GPU_MODEL: &str = "cloud.fleetsched.io/host-gpu-model";
pub const MEMORY_SIZE: &str = "cloud.fleetsched.io/host-memory-size";

/// Marker substring of labels set on KubeVirt-managed VM nodes.
pub const VM_NODE_MARKER: &str = "kubevirt.io";
/// Marker substring of labels set on enrolled bare-metal hosts.
pub const BAREMETAL_NODE_MARKER: &str = "host-memory-size";

/// `instance-type.fleetsched.io/<type>=true` advertises a supported type.
pub const INSTANCE_TYPE_PREFIX: &str = "instance-type.fleetsched.io/";
/// `pool.fleetsched.io/<pool>=true` marks compute-node-pool membership.
pub const COMPUTE_NODE_POOL_PREFIX: &str = "pool.fleetsched.io/";

// ── Bare-metal host labels ─────────────────────────────────────

pub const LAST_ASSOCIATED_INSTANCE: &str = "cloud.fleetsched.io/last-associated-instance";
pub const LAST_CLUSTER_GROUP: &str = "cloud.fleetsched.io/last-cluster-group";

// ── Placement unit labels ──────────────────────────────────────

pub const RESOURCE_ID: &str = "cloud.fleetsched.io/resource-id";
pub const INSTANCE_GROUP: &str = "cloud.fleetsched.io/instance-group";
pub const INSTANCE_CATEGORY: &str = "cloud.fleetsched.io/instance-category";

pub const TRUE: &str = "true";

/// Label key advertising support for `instance_type`.
pub fn instance_type_label(instance_type: &str) -> String {
    format!("{INSTANCE_TYPE_PREFIX}{instance_type}")
}

/// Label key marking membership of `pool`.
pub fn compute_node_pool_label(pool: &str) -> String {
    format!("{COMPUTE_NODE_POOL_PREFIX}{pool}")
}
