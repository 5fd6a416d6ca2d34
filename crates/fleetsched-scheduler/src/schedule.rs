//! Batch entry point: place every instance of a request or none of them.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use fleetsched_core::{
    InstanceRequest, InstanceResult, NetworkInfo, NetworkMode, PlacementUnit, ScheduleResponse,
    labels, split,
};

use crate::error::{SchedulerError, SchedulerResult};
use crate::instance::{instance_to_unit, network_info};
use crate::scheduler::{CycleContext, ScheduleResult, Scheduler};

impl Scheduler {
    /// Place a batch of instances.
    ///
    /// Instances are placed in order, each cycle seeing the reservations of
    /// the ones before it. If any instance fails, every reservation made for
    /// the batch is released. With `dry_run` the reservations are released
    /// after a successful placement as well.
    pub async fn schedule(
        &self,
        instances: &[InstanceRequest],
        dry_run: bool,
    ) -> SchedulerResult<ScheduleResponse> {
        if instances.is_empty() {
            return Ok(ScheduleResponse::default());
        }
        let total = instances.len();

        let mut cycle = self.cycle.lock().await;
        self.cache().update_snapshot(&mut cycle.snapshot).await;
        let net = {
            let CycleContext { snapshot, rng } = &mut *cycle;
            network_info(instances, &snapshot.list(), self.config(), rng)?
        };

        let mut assumed = Vec::with_capacity(total);
        let outcome = self
            .schedule_batch(&mut cycle, instances, &net, &mut assumed)
            .await;
        drop(cycle);

        match outcome {
            Ok(instance_results) => {
                if dry_run {
                    self.unassume_units(&assumed).await;
                }
                info!(instances = total, dry_run, "batch scheduled");
                Ok(ScheduleResponse { instance_results })
            }
            Err((index, err)) => {
                warn!(index, total, assumed = assumed.len(), error = %err, "batch failed, releasing reservations");
                self.unassume_units(&assumed).await;
                if total > 1 {
                    Err(SchedulerError::Batch {
                        index,
                        total,
                        source: Box::new(err),
                    })
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn schedule_batch(
        &self,
        cycle: &mut CycleContext,
        instances: &[InstanceRequest],
        net: &NetworkInfo,
        assumed: &mut Vec<PlacementUnit>,
    ) -> Result<Vec<InstanceResult>, (usize, SchedulerError)> {
        let total = instances.len();
        let mut net = net.clone();
        let pin_to_first_group = pins_to_first_group(instances, &net);
        let mut results = Vec::with_capacity(total);

        for (index, instance) in instances.iter().enumerate() {
            let unit = instance_to_unit(instance, &net, self.config()).map_err(|e| (index, e))?;
            let (unit, result) = self
                .schedule_one_unit(cycle, unit, total - index)
                .await
                .map_err(|e| (index, e))?;
            assumed.push(unit);

            if pin_to_first_group && index == 0 {
                if let Some(group) = result.suggested_host_labels.get(labels::CLUSTER_GROUP_ID) {
                    debug!(group = %group, "pinning remaining instances to cluster group");
                    net.cluster_group_ids = BTreeSet::from([group.clone()]);
                }
            }
            results.push(instance_result(instance, &result).map_err(|e| (index, e))?);
        }
        Ok(results)
    }
}

/// Narrow instance groups without an assigned cluster group must still
/// end up inside a single one.
fn pins_to_first_group(instances: &[InstanceRequest], net: &NetworkInfo) -> bool {
    let grouped = instances
        .first()
        .and_then(|i| i.spec.as_ref())
        .is_some_and(|s| !s.instance_group.is_empty());
    grouped
        && instances.len() > 1
        && net.network_mode == Some(NetworkMode::Vvv)
        && net.cluster_group_ids.is_empty()
}

fn instance_result(
    instance: &InstanceRequest,
    result: &ScheduleResult,
) -> SchedulerResult<InstanceResult> {
    let (cluster_id, node_id) = split(&result.suggested_host)?;
    let host_labels = &result.suggested_host_labels;
    let label = |key: &str| host_labels.get(key).cloned().unwrap_or_default();

    let compute_node_pools = instance
        .spec
        .iter()
        .flat_map(|s| &s.compute_node_pools)
        .filter(|pool| {
            host_labels
                .get(&labels::compute_node_pool_label(pool))
                .is_some_and(|v| v == labels::TRUE)
        })
        .cloned()
        .collect();

    Ok(InstanceResult {
        cluster_id: cluster_id.to_string(),
        node_id: node_id.to_string(),
        partition: result.partition.clone().unwrap_or_default(),
        group_id: label(labels::CLUSTER_GROUP_ID),
        supercompute_group_id: label(labels::SUPERCOMPUTE_GROUP_ID),
        network_mode: label(labels::NETWORK_MODE),
        compute_node_pools,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use fleetsched_cache::CapacityCache;
    use fleetsched_core::instance::{CpuSpec, InstanceSpec, InstanceTypeSpec, MemorySpec};
    use fleetsched_core::{InstanceCategory, Node, Resources, SchedulerConfig};

    const GI: i64 = 1 << 30;
    const BM_TYPE: &str = "bm-icx";

    fn make_cache() -> Arc<CapacityCache> {
        Arc::new(CapacityCache::new(Duration::from_secs(30), Duration::from_secs(1)))
    }

    fn make_type(name: &str, category: InstanceCategory) -> InstanceTypeSpec {
        InstanceTypeSpec {
            name: name.into(),
            category,
            cpu: Some(CpuSpec { cores: 4 }),
            memory: Some(MemorySpec {
                size: "8Gi".parse().unwrap(),
            }),
            gpu: None,
        }
    }

    fn make_vm(id: &str) -> InstanceRequest {
        InstanceRequest {
            resource_id: id.into(),
            cloud_account_id: "acct-1".into(),
            labels: BTreeMap::new(),
            spec: Some(InstanceSpec {
                instance_type: "vm-small".into(),
                instance_type_spec: Some(make_type("vm-small", InstanceCategory::VirtualMachine)),
                ..Default::default()
            }),
        }
    }

    fn make_bm(id: &str, group_size: u32) -> InstanceRequest {
        InstanceRequest {
            resource_id: id.into(),
            cloud_account_id: "acct-1".into(),
            labels: BTreeMap::new(),
            spec: Some(InstanceSpec {
                instance_type: BM_TYPE.into(),
                instance_type_spec: Some(make_type(BM_TYPE, InstanceCategory::BareMetalHost)),
                instance_group: "ig-1".into(),
                instance_group_size: group_size,
                compute_node_pools: vec!["general".into(), "reserved".into()],
                ..Default::default()
            }),
        }
    }

    fn make_vm_node(name: &str, cpu: i64) -> Node {
        let node_labels = [(labels::instance_type_label("vm-small"), "true".to_string())].into();
        Node::new(name, node_labels, Resources::new(cpu * 1000, 64 * GI, 0, 110))
    }

    fn make_host(name: &str, group: &str) -> Node {
        let host_labels = [
            (labels::VERIFIED.to_string(), "true".to_string()),
            (labels::CLUSTER_GROUP_ID.to_string(), group.to_string()),
            (labels::NETWORK_MODE.to_string(), "VVV".to_string()),
            (labels::instance_type_label(BM_TYPE), "true".to_string()),
            (labels::compute_node_pool_label("general"), "true".to_string()),
        ]
        .into();
        Node::new(name, host_labels, Resources::new(64_000, 256 * GI, 0, 1))
    }

    fn make_scheduler(cache: Arc<CapacityCache>) -> Scheduler {
        Scheduler::new(cache, SchedulerConfig::default()).with_rng_seed(11)
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let scheduler = make_scheduler(make_cache());
        let response = scheduler.schedule(&[], false).await.unwrap();
        assert!(response.instance_results.is_empty());
    }

    #[tokio::test]
    async fn batch_results_name_cluster_and_node() {
        let cache = make_cache();
        cache.add_node(make_vm_node("vm-east/n1", 16)).await;
        let scheduler = make_scheduler(cache.clone());

        let response = scheduler
            .schedule(&[make_vm("i-1"), make_vm("i-2")], false)
            .await
            .unwrap();
        assert_eq!(response.instance_results.len(), 2);
        for result in &response.instance_results {
            assert_eq!(result.cluster_id, "vm-east");
            assert_eq!(result.node_id, "n1");
        }
        assert_eq!(cache.unit_count().await, 2);
        assert!(cache.is_assumed("acct-1/virt-launcher-i-1-abcde").await);
    }

    #[tokio::test]
    async fn dry_run_releases_reservations() {
        let cache = make_cache();
        cache.add_node(make_vm_node("vm-east/n1", 16)).await;
        let scheduler = make_scheduler(cache.clone());

        let response = scheduler.schedule(&[make_vm("i-1")], true).await.unwrap();
        assert_eq!(response.instance_results.len(), 1);
        assert_eq!(cache.unit_count().await, 0);
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_reservations() {
        let cache = make_cache();
        // Room for two 4-core instances only.
        cache.add_node(make_vm_node("vm-east/n1", 8)).await;
        let scheduler = make_scheduler(cache.clone());

        let batch = [make_vm("i-1"), make_vm("i-2"), make_vm("i-3")];
        let err = scheduler.schedule(&batch, false).await.unwrap_err();
        match &err {
            SchedulerError::Batch { index, total, source } => {
                assert_eq!((*index, *total), (2, 3));
                assert!(matches!(**source, SchedulerError::Fit(_)));
            }
            other => panic!("expected batch error, got {other}"),
        }
        assert!(err.is_unschedulable());
        assert_eq!(cache.unit_count().await, 0);

        // The capacity is usable again.
        scheduler.schedule(&batch[..2], false).await.unwrap();
    }

    #[tokio::test]
    async fn single_instance_errors_are_not_wrapped() {
        let scheduler = make_scheduler(make_cache());
        let err = scheduler.schedule(&[make_vm("i-1")], false).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoNodesAvailable));
    }

    #[tokio::test]
    async fn mixed_batch_is_rejected_before_placement() {
        let cache = make_cache();
        cache.add_node(make_host("metal/h1", "a")).await;
        let scheduler = make_scheduler(cache.clone());
        let mut other = make_bm("i-2", 2);
        other.spec.as_mut().unwrap().network_mode = "XBX".into();

        let err = scheduler
            .schedule(&[make_bm("i-1", 2), other], false)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));
        assert_eq!(cache.unit_count().await, 0);
    }

    #[tokio::test]
    async fn narrow_instance_group_stays_in_one_cluster_group() {
        let cache = make_cache();
        for (name, group) in [
            ("metal/a1", "a"),
            ("metal/a2", "a"),
            ("metal/a3", "a"),
            ("metal/b1", "b"),
            ("metal/b2", "b"),
            ("metal/b3", "b"),
        ] {
            cache.add_node(make_host(name, group)).await;
        }
        let scheduler = make_scheduler(cache.clone());

        let batch: Vec<InstanceRequest> = (0..3).map(|i| make_bm(&format!("bm-{i}"), 3)).collect();
        let response = scheduler.schedule(&batch, false).await.unwrap();

        let groups: BTreeSet<&str> = response
            .instance_results
            .iter()
            .map(|r| r.group_id.as_str())
            .collect();
        assert_eq!(groups.len(), 1);
        let nodes: BTreeSet<&str> = response
            .instance_results
            .iter()
            .map(|r| r.node_id.as_str())
            .collect();
        assert_eq!(nodes.len(), 3);
        for result in &response.instance_results {
            assert_eq!(result.cluster_id, "metal");
            assert_eq!(result.network_mode, "VVV");
            assert_eq!(result.compute_node_pools, vec!["general".to_string()]);
        }
    }
}
