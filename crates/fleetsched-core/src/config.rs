//! fleetsched.toml configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::instance::InstanceTypeSpec;
use crate::quantity::Quantity;

/// Sentinel cluster id of the local bare-metal cell.
pub const LOCAL_BAREMETAL_CLUSTER_ID: &str = "bmaas-local";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub region: String,
    pub availability_zone: String,
    /// Share of nodes to evaluate per cycle; `0` selects the adaptive default.
    pub percentage_of_nodes_to_score: i32,
    pub parallelism: usize,
    pub assume_ttl_secs: u64,
    pub cleanup_period_secs: u64,
    pub enable_binpack: bool,
    /// Instance-group size from which a new group gets the wide-fabric mode;
    /// `0` disables the rule.
    pub wide_fabric_instance_count_threshold: u32,
    pub cpu_overcommit_percent: u32,
    /// Added to the memory request of VM instances without GPUs.
    pub vm_overhead_memory: Quantity,
    pub statistics_interval_secs: u64,
    pub clusters: Vec<ClusterConfig>,
    pub instance_types: Vec<InstanceTypeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: String,
    pub kind: ClusterKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    Vm,
    Baremetal,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            availability_zone: String::new(),
            percentage_of_nodes_to_score: 0,
            parallelism: 16,
            assume_ttl_secs: 30,
            cleanup_period_secs: 1,
            enable_binpack: true,
            wide_fabric_instance_count_threshold: 0,
            cpu_overcommit_percent: 100,
            vm_overhead_memory: Quantity::ZERO,
            statistics_interval_secs: 60,
            clusters: Vec::new(),
            instance_types: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parallelism == 0 {
            anyhow::bail!("parallelism must be greater than zero");
        }
        if self.cpu_overcommit_percent == 0 {
            anyhow::bail!("cpu_overcommit_percent must be greater than zero");
        }
        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            if !seen.insert(cluster.id.as_str()) {
                anyhow::bail!("duplicate cluster id {:?}", cluster.id);
            }
        }
        Ok(())
    }

    pub fn assume_ttl(&self) -> Duration {
        Duration::from_secs(self.assume_ttl_secs)
    }

    pub fn cleanup_period(&self) -> Duration {
        Duration::from_secs(self.cleanup_period_secs.max(1))
    }

    pub fn statistics_interval(&self) -> Duration {
        Duration::from_secs(self.statistics_interval_secs.max(1))
    }
}
