//! Capacity statistics per node and per instance type.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetsched_cache::{NodeInfo, Snapshot};
use fleetsched_core::instance::InstanceTypeSpec;
use fleetsched_core::{
    InstanceCategory, LOCAL_BAREMETAL_CLUSTER_ID, SchedulerConfig, labels, split,
};

use crate::error::SchedulerResult;
use crate::instance::milli_cpu_request;
use crate::scheduler::Scheduler;

const BAREMETAL_SOURCE: &str = "metal3.io/v1alpha1/baremetalhosts";
const NODE_SOURCE: &str = "v1/nodes";

/// Source of instance type shapes, keyed by instance type name.
#[async_trait]
pub trait InstanceTypeCatalog: Send + Sync {
    async fn search(&self) -> anyhow::Result<BTreeMap<String, InstanceTypeSpec>>;
}

/// Catalog backed by the instance types in configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    types: BTreeMap<String, InstanceTypeSpec>,
}

impl StaticCatalog {
    pub fn new(types: impl IntoIterator<Item = InstanceTypeSpec>) -> Self {
        Self {
            types: types.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.instance_types.iter().cloned())
    }
}

#[async_trait]
impl InstanceTypeCatalog for StaticCatalog {
    async fn search(&self) -> anyhow::Result<BTreeMap<String, InstanceTypeSpec>> {
        Ok(self.types.clone())
    }
}

// ── Reports ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeResources {
    pub free_milli_cpu: i64,
    pub used_milli_cpu: i64,
    pub free_memory_bytes: i64,
    pub used_memory_bytes: i64,
    pub free_gpu: i64,
    pub used_gpu: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceTypeStatistics {
    pub instance_type: String,
    pub running_instances: i64,
    pub max_new_instances: i64,
    pub instance_category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatistics {
    pub cluster_id: String,
    /// Set for bare-metal hosts only.
    pub namespace: String,
    pub node_name: String,
    pub region: String,
    pub availability_zone: String,
    pub partition: String,
    pub cluster_group: String,
    pub network_mode: String,
    pub source_resource: String,
    pub compute_node_pools: Vec<String>,
    pub resources: NodeResources,
    pub instance_types: Vec<InstanceTypeStatistics>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatistics {
    pub nodes: Vec<NodeStatistics>,
}

impl Scheduler {
    /// Capacity of every live node in the cache.
    ///
    /// Reads its own snapshot, so it never waits for a scheduling cycle.
    pub async fn statistics(
        &self,
        catalog: &dyn InstanceTypeCatalog,
    ) -> SchedulerResult<SchedulerStatistics> {
        let catalog: BTreeMap<String, InstanceTypeSpec> = catalog
            .search()
            .await?
            .into_values()
            .map(|t| (t.name.to_lowercase(), t))
            .collect();

        let mut snapshot = Snapshot::new();
        self.cache().update_snapshot(&mut snapshot).await;

        let mut nodes = Vec::with_capacity(snapshot.num_nodes());
        for info in snapshot.list() {
            if let Some(stats) = node_statistics(info, self.config(), &catalog)? {
                nodes.push(stats);
            }
        }
        debug!(nodes = nodes.len(), "statistics collected");
        Ok(SchedulerStatistics { nodes })
    }
}

fn node_statistics(
    info: &NodeInfo,
    config: &SchedulerConfig,
    catalog: &BTreeMap<String, InstanceTypeSpec>,
) -> SchedulerResult<Option<NodeStatistics>> {
    let Some(node) = info.node() else {
        return Ok(None);
    };
    let traits = node.traits();
    let Some(category) = traits.category else {
        warn!(node = %node.name, "instance category cannot be determined, skipping");
        return Ok(None);
    };

    let (prefix, node_name) = split(&node.name)?;
    let (cluster_id, namespace, source) = match category {
        InstanceCategory::BareMetalHost => (LOCAL_BAREMETAL_CLUSTER_ID, prefix, BAREMETAL_SOURCE),
        InstanceCategory::VirtualMachine => (prefix, "", NODE_SOURCE),
    };
    let label = |key: &str| node.labels().get(key).cloned().unwrap_or_default();

    let allocatable = info.allocatable();
    let free = info.free();
    let resources = NodeResources {
        free_milli_cpu: free.milli_cpu,
        used_milli_cpu: info.requested.milli_cpu,
        free_memory_bytes: free.memory,
        used_memory_bytes: info.requested.memory,
        free_gpu: free.gpu,
        used_gpu: info.requested.gpu,
    };

    let mut instance_types = Vec::new();
    for name in &traits.instance_types {
        let Some(spec) = catalog.get(&name.to_lowercase()) else {
            debug!(node = %node.name, instance_type = %name, "instance type missing from catalog");
            continue;
        };
        let running = match category {
            InstanceCategory::BareMetalHost => info.units.len(),
            InstanceCategory::VirtualMachine => info
                .units
                .iter()
                .filter(|u| {
                    u.labels
                        .get(&labels::instance_type_label(name))
                        .is_some_and(|v| v == labels::TRUE)
                })
                .count(),
        };
        let mut max_new = max_new_instances(&resources, spec, config.cpu_overcommit_percent);
        if allocatable.pods > 0 {
            max_new = max_new.min(free.pods.max(0));
        }
        instance_types.push(InstanceTypeStatistics {
            instance_type: name.clone(),
            running_instances: running as i64,
            max_new_instances: max_new,
            instance_category: category.as_str().into(),
        });
    }

    Ok(Some(NodeStatistics {
        cluster_id: cluster_id.to_string(),
        namespace: namespace.to_string(),
        node_name: node_name.to_string(),
        region: config.region.clone(),
        availability_zone: config.availability_zone.clone(),
        partition: label(labels::PARTITION),
        cluster_group: label(labels::CLUSTER_GROUP_ID),
        network_mode: label(labels::NETWORK_MODE),
        source_resource: source.into(),
        compute_node_pools: traits.compute_node_pools.iter().cloned().collect(),
        resources,
        instance_types,
    }))
}

/// How many more instances of `spec` fit in the free resources.
pub fn max_new_instances(free: &NodeResources, spec: &InstanceTypeSpec, overcommit_percent: u32) -> i64 {
    let cpu = spec
        .cpu
        .map(|c| milli_cpu_request(c.cores, overcommit_percent))
        .filter(|&m| m > 0);
    let memory = spec.memory.as_ref().map(|m| m.size.value()).filter(|&m| m > 0);

    let mut max = i64::MAX;
    if let Some(cpu) = cpu {
        max = max.min(free.free_milli_cpu / cpu);
    }
    if let Some(memory) = memory {
        max = max.min(free.free_memory_bytes / memory);
    }
    let gpus = spec.gpu_count();
    if gpus > 0 {
        max = max.min(free.free_gpu / gpus);
    }
    if max == i64::MAX { 0 } else { max.max(0) }
}

// ── Reporter ───────────────────────────────────────────────────

/// Logs capacity statistics on a fixed period.
pub struct StatisticsReporter {
    scheduler: Arc<Scheduler>,
    catalog: Arc<dyn InstanceTypeCatalog>,
    interval: Duration,
}

impl StatisticsReporter {
    pub fn new(scheduler: Arc<Scheduler>, catalog: Arc<dyn InstanceTypeCatalog>) -> Self {
        let interval = scheduler.config().statistics_interval();
        Self {
            scheduler,
            catalog,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Collect and log one report.
    pub async fn report(&self) -> SchedulerResult<SchedulerStatistics> {
        let stats = self.scheduler.statistics(self.catalog.as_ref()).await?;
        for node in &stats.nodes {
            info!(
                cluster = %node.cluster_id,
                node = %node.node_name,
                cluster_group = %node.cluster_group,
                free_milli_cpu = node.resources.free_milli_cpu,
                free_memory_bytes = node.resources.free_memory_bytes,
                free_gpu = node.resources.free_gpu,
                instance_types = node.instance_types.len(),
                "node capacity"
            );
        }
        Ok(stats)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "statistics reporter started");
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.report().await {
                        warn!(error = %err, "statistics collection failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("statistics reporter shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fleetsched_cache::CapacityCache;
    use fleetsched_core::instance::{CpuSpec, GpuSpec, MemorySpec};
    use fleetsched_core::{Node, PlacementUnit, Resources};

    const GI: i64 = 1 << 30;

    fn make_type(name: &str, category: InstanceCategory, cores: i64, mem_gi: i64, gpus: i64) -> InstanceTypeSpec {
        InstanceTypeSpec {
            name: name.into(),
            category,
            cpu: Some(CpuSpec { cores }),
            memory: Some(MemorySpec {
                size: format!("{mem_gi}Gi").parse().unwrap(),
            }),
            gpu: (gpus > 0).then(|| GpuSpec {
                model_name: "pvc".into(),
                count: gpus,
            }),
        }
    }

    fn make_labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn make_vm_node() -> Node {
        let mut node_labels = make_labels(&[
            ("kubevirt.io/schedulable", "true"),
            (labels::PARTITION, "p1"),
            (labels::compute_node_pool_label("general").as_str(), "true"),
        ]);
        node_labels.insert(labels::instance_type_label("vm-small"), "true".into());
        node_labels.insert(labels::instance_type_label("vm-gpu"), "true".into());
        Node::new("vm-east/n1", node_labels, Resources::new(16_000, 64 * GI, 2, 110))
    }

    fn make_host() -> Node {
        let mut node_labels = make_labels(&[
            (labels::MEMORY_SIZE, "256Gi"),
            (labels::CLUSTER_GROUP_ID, "cg-1"),
            (labels::NETWORK_MODE, "VVV"),
        ]);
        node_labels.insert(labels::instance_type_label("bm-icx"), "true".into());
        Node::new("metal-ns/h1", node_labels, Resources::new(64_000, 256 * GI, 0, 1))
    }

    fn make_scheduler(cache: Arc<CapacityCache>) -> Scheduler {
        let config = SchedulerConfig {
            region: "us-west".into(),
            availability_zone: "us-west-1a".into(),
            ..Default::default()
        };
        Scheduler::new(cache, config)
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new([
            make_type("VM-Small", InstanceCategory::VirtualMachine, 4, 8, 0),
            make_type("vm-gpu", InstanceCategory::VirtualMachine, 2, 8, 1),
            make_type("bm-icx", InstanceCategory::BareMetalHost, 64, 256, 0),
        ])
    }

    #[test]
    fn max_new_takes_the_scarcest_resource() {
        let spec = make_type("t", InstanceCategory::VirtualMachine, 4, 8, 1);
        let free = NodeResources {
            free_milli_cpu: 16_000,
            free_memory_bytes: 64 * GI,
            free_gpu: 3,
            ..Default::default()
        };
        assert_eq!(max_new_instances(&free, &spec, 100), 3);
        assert_eq!(max_new_instances(&free, &spec, 400), 3);

        let spec = make_type("t", InstanceCategory::VirtualMachine, 4, 8, 0);
        assert_eq!(max_new_instances(&free, &spec, 100), 4);
        assert_eq!(max_new_instances(&free, &spec, 200), 8);
    }

    #[tokio::test]
    async fn vm_node_statistics() {
        let cache = Arc::new(CapacityCache::new(Duration::from_secs(30), Duration::from_secs(1)));
        cache.add_node(make_vm_node()).await;
        let mut running = PlacementUnit::new("acct", "virt-launcher-a")
            .with_requests(Resources::new(4000, 8 * GI, 0, 0))
            .with_node_name("vm-east/n1");
        running
            .labels
            .insert(labels::instance_type_label("vm-small"), "true".into());
        cache.add_unit(running).await.unwrap();

        let scheduler = make_scheduler(cache);
        let stats = scheduler.statistics(&catalog()).await.unwrap();
        assert_eq!(stats.nodes.len(), 1);
        let node = &stats.nodes[0];
        assert_eq!(node.cluster_id, "vm-east");
        assert_eq!(node.namespace, "");
        assert_eq!(node.node_name, "n1");
        assert_eq!(node.region, "us-west");
        assert_eq!(node.partition, "p1");
        assert_eq!(node.source_resource, NODE_SOURCE);
        assert_eq!(node.compute_node_pools, vec!["general".to_string()]);
        assert_eq!(node.resources.free_milli_cpu, 12_000);
        assert_eq!(node.resources.used_memory_bytes, 8 * GI);

        let by_type: BTreeMap<&str, &InstanceTypeStatistics> = node
            .instance_types
            .iter()
            .map(|t| (t.instance_type.as_str(), t))
            .collect();
        assert_eq!(by_type["vm-small"].running_instances, 1);
        assert_eq!(by_type["vm-small"].max_new_instances, 3);
        assert_eq!(by_type["vm-gpu"].running_instances, 0);
        assert_eq!(by_type["vm-gpu"].max_new_instances, 2);
        assert_eq!(by_type["vm-gpu"].instance_category, "VirtualMachine");
    }

    #[tokio::test]
    async fn bare_metal_host_statistics() {
        let cache = Arc::new(CapacityCache::new(Duration::from_secs(30), Duration::from_secs(1)));
        cache.add_node(make_host()).await;
        let scheduler = make_scheduler(cache.clone());

        let stats = scheduler.statistics(&catalog()).await.unwrap();
        let node = &stats.nodes[0];
        assert_eq!(node.cluster_id, LOCAL_BAREMETAL_CLUSTER_ID);
        assert_eq!(node.namespace, "metal-ns");
        assert_eq!(node.node_name, "h1");
        assert_eq!(node.cluster_group, "cg-1");
        assert_eq!(node.source_resource, BAREMETAL_SOURCE);
        assert_eq!(node.instance_types[0].running_instances, 0);
        assert_eq!(node.instance_types[0].max_new_instances, 1);

        let tenant = PlacementUnit::new("acct", "bm-1")
            .with_requests(Resources::new(1000, GI, 0, 0))
            .with_node_name("metal-ns/h1");
        cache.add_unit(tenant).await.unwrap();
        let stats = scheduler.statistics(&catalog()).await.unwrap();
        assert_eq!(stats.nodes[0].instance_types[0].running_instances, 1);
        assert_eq!(stats.nodes[0].instance_types[0].max_new_instances, 0);
    }

    #[tokio::test]
    async fn nodes_without_category_are_skipped() {
        let cache = Arc::new(CapacityCache::new(Duration::from_secs(30), Duration::from_secs(1)));
        cache
            .add_node(Node::new("c/plain", BTreeMap::new(), Resources::new(1000, GI, 0, 10)))
            .await;
        let stats = make_scheduler(cache).statistics(&catalog()).await.unwrap();
        assert!(stats.nodes.is_empty());
    }

    struct FailingCatalog;

    #[async_trait]
    impl InstanceTypeCatalog for FailingCatalog {
        async fn search(&self) -> anyhow::Result<BTreeMap<String, InstanceTypeSpec>> {
            anyhow::bail!("catalog unavailable")
        }
    }

    #[tokio::test]
    async fn catalog_failure_is_reported() {
        let cache = Arc::new(CapacityCache::new(Duration::from_secs(30), Duration::from_secs(1)));
        let scheduler = Arc::new(make_scheduler(cache));
        let reporter = StatisticsReporter::new(scheduler, Arc::new(FailingCatalog));
        let err = reporter.report().await.unwrap_err();
        assert!(err.to_string().contains("catalog unavailable"));
    }

    #[tokio::test]
    async fn reporter_stops_on_shutdown() {
        let cache = Arc::new(CapacityCache::new(Duration::from_secs(30), Duration::from_secs(1)));
        let scheduler = Arc::new(make_scheduler(cache));
        let reporter = StatisticsReporter::new(scheduler, Arc::new(catalog()))
            .with_interval(Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { reporter.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
