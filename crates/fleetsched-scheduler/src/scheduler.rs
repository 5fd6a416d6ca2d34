//! The scheduling cycle for a single placement unit.
//!
//! A cycle refreshes the snapshot, filters nodes in parallel, narrows the
//! feasible set by bin-packing, scores what is left and assumes the unit
//! on the winner. Cycles are serialized by the cycle mutex; a batch holds
//! it for all of its units.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use fleetsched_cache::{CapacityCache, NodeInfo, Snapshot};
use fleetsched_core::{Node, PlacementUnit, SchedulerConfig};
use fleetsched_placement::binpack;

use crate::error::{SchedulerError, SchedulerResult};
use crate::framework::{
    Code, CycleState, Diagnosis, FitError, Framework, NodePluginScores, Status,
};
use crate::instance::DEFAULT_SCHEDULER_NAME;
use crate::parallel::{parallelize_until, run_blocking};
use crate::plugins::default_profile;
use crate::rotation::NodeRotation;

/// Below this many nodes every node is evaluated.
pub const MIN_FEASIBLE_NODES_TO_FIND: usize = 100;

/// Floor of the adaptive share of nodes evaluated per cycle.
pub const MIN_FEASIBLE_NODES_PERCENTAGE_TO_FIND: i64 = 5;

/// Where one unit should go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleResult {
    pub suggested_host: String,
    pub suggested_host_labels: BTreeMap<String, String>,
    /// Partition of the host when the unit spreads across partitions.
    pub partition: Option<String>,
    pub evaluated_nodes: usize,
    pub feasible_nodes: usize,
}

/// State owned by whoever holds the cycle lock.
pub(crate) struct CycleContext {
    pub(crate) snapshot: Snapshot,
    pub(crate) rng: StdRng,
}

/// Places units on nodes of the capacity cache.
pub struct Scheduler {
    cache: Arc<CapacityCache>,
    profiles: HashMap<String, Arc<dyn Framework>>,
    config: SchedulerConfig,
    rotation: NodeRotation,
    pub(crate) cycle: Mutex<CycleContext>,
}

impl Scheduler {
    /// Create a scheduler with the default profile registered under
    /// [`DEFAULT_SCHEDULER_NAME`].
    pub fn new(cache: Arc<CapacityCache>, config: SchedulerConfig) -> Self {
        let profile: Arc<dyn Framework> =
            Arc::new(default_profile(DEFAULT_SCHEDULER_NAME, config.parallelism));
        Self {
            cache,
            profiles: HashMap::from([(DEFAULT_SCHEDULER_NAME.to_string(), profile)]),
            config,
            rotation: NodeRotation::new(),
            cycle: Mutex::new(CycleContext {
                snapshot: Snapshot::new(),
                rng: StdRng::from_entropy(),
            }),
        }
    }

    /// Register a profile under its own name, replacing any existing one.
    pub fn with_profile(mut self, profile: Arc<dyn Framework>) -> Self {
        self.profiles
            .insert(profile.profile_name().to_string(), profile);
        self
    }

    /// Make tie-breaking reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.cycle.get_mut().rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn cache(&self) -> &Arc<CapacityCache> {
        &self.cache
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Schedule and assume a single unit outside of any batch.
    pub async fn schedule_one(
        &self,
        unit: PlacementUnit,
        requested_size: usize,
    ) -> SchedulerResult<(PlacementUnit, ScheduleResult)> {
        let mut cycle = self.cycle.lock().await;
        self.schedule_one_unit(&mut cycle, unit, requested_size)
            .await
    }

    /// Run one full cycle for `unit` and assume it on the chosen host.
    /// Returns the assumed unit, which carries the host in `node_name`.
    pub(crate) async fn schedule_one_unit(
        &self,
        cycle: &mut CycleContext,
        unit: PlacementUnit,
        requested_size: usize,
    ) -> SchedulerResult<(PlacementUnit, ScheduleResult)> {
        let fwk = self
            .profiles
            .get(&unit.scheduler_name)
            .cloned()
            .ok_or_else(|| {
                SchedulerError::InvalidRequest(format!(
                    "profile not found for scheduler name {:?}",
                    unit.scheduler_name
                ))
            })?;

        let mut state = CycleState::new();
        let result = match self
            .schedule_unit(fwk.as_ref(), cycle, &mut state, &unit, requested_size)
            .await
        {
            Ok(result) => result,
            Err(SchedulerError::Fit(fit)) => {
                let (nominated, status) =
                    fwk.run_post_filter_plugins(&state, &unit, &fit.diagnosis.node_to_status);
                match nominated {
                    Some(node) => info!(unit = %unit.key(), %node, "post-filter nominated a node"),
                    None => debug!(unit = %unit.key(), %status, "post-filter found no node"),
                }
                info!(unit = %unit.key(), error = %fit, "unit is unschedulable");
                return Err(fit.into());
            }
            Err(err) => return Err(err),
        };

        let host = result.suggested_host.clone();
        let assumed = PlacementUnit {
            node_name: Some(host.clone()),
            ..unit
        };
        self.cache.assume_unit(assumed.clone()).await?;

        let status = fwk.run_reserve_plugins_reserve(&mut state, &assumed, &host);
        if !status.is_success() {
            fwk.run_reserve_plugins_unreserve(&mut state, &assumed, &host);
            if let Err(err) = self.cache.forget_unit(&assumed).await {
                error!(unit = %assumed.key(), error = %err, "failed to forget unit after reserve failure");
            }
            return Err(status.into_error());
        }
        self.cache.finish_binding(&assumed.key()).await;

        info!(
            unit = %assumed.key(),
            node = %host,
            evaluated_nodes = result.evaluated_nodes,
            feasible_nodes = result.feasible_nodes,
            "unit assumed"
        );
        Ok((assumed, result))
    }

    /// Release units assumed earlier in a batch.
    pub async fn unassume_units(&self, units: &[PlacementUnit]) {
        for unit in units {
            match self.cache.forget_unit(unit).await {
                Ok(()) => debug!(unit = %unit.key(), "unit unassumed"),
                Err(err) => warn!(unit = %unit.key(), error = %err, "failed to unassume unit"),
            }
        }
    }

    async fn schedule_unit(
        &self,
        fwk: &dyn Framework,
        cycle: &mut CycleContext,
        state: &mut CycleState,
        unit: &PlacementUnit,
        requested_size: usize,
    ) -> SchedulerResult<ScheduleResult> {
        self.cache.update_snapshot(&mut cycle.snapshot).await;
        let CycleContext { snapshot, rng } = cycle;

        let nodes = snapshot.list();
        if nodes.is_empty() {
            return Err(SchedulerError::NoNodesAvailable);
        }
        let num_all_nodes = nodes.len();

        let (mut feasible, mut diagnosis) = self.find_nodes_that_fit(fwk, state, unit, &nodes)?;
        let feasible_nodes = feasible.len();
        let fit_error = |diagnosis: Diagnosis| -> SchedulerError {
            FitError {
                unit: unit.key(),
                num_all_nodes,
                diagnosis,
            }
            .into()
        };
        if feasible.is_empty() {
            return Err(fit_error(diagnosis));
        }

        if self.config.enable_binpack {
            let candidates: Vec<Arc<Node>> =
                feasible.iter().filter_map(|info| info.shared_node()).collect();
            let packed = binpack(unit, candidates, requested_size, rng);
            if packed.is_empty() {
                for info in &feasible {
                    if let Some(node) = info.node() {
                        diagnosis.record(
                            node.name.clone(),
                            Status::unschedulable("node(s) didn't belong to a group large enough for the batch")
                                .with_plugin("Binpack"),
                        );
                    }
                }
                return Err(fit_error(diagnosis));
            }
            let keep: HashSet<&str> = packed.iter().map(|n| n.name.as_str()).collect();
            feasible.retain(|info| info.node().is_some_and(|n| keep.contains(n.name.as_str())));
        }

        let evaluated_nodes = feasible_nodes + diagnosis.node_to_status.len();
        let host = if let [only] = feasible.as_slice() {
            *only
        } else {
            let scores = fwk
                .run_score_plugins(state, unit, &feasible)
                .map_err(Status::into_error)?;
            let name = select_host(&scores, rng)?;
            feasible
                .iter()
                .copied()
                .find(|info| info.node().is_some_and(|n| n.name == name))
                .ok_or(SchedulerError::NoNodesAvailable)?
        };
        let node = host.node().ok_or(SchedulerError::NoNodesAvailable)?;

        let partition = if unit.topology_spread.is_empty() {
            None
        } else {
            node.traits().partition.clone()
        };
        Ok(ScheduleResult {
            suggested_host: node.name.clone(),
            suggested_host_labels: node.labels().clone(),
            partition,
            evaluated_nodes,
            feasible_nodes,
        })
    }

    fn find_nodes_that_fit<'a>(
        &self,
        fwk: &dyn Framework,
        state: &mut CycleState,
        unit: &PlacementUnit,
        nodes: &[&'a NodeInfo],
    ) -> SchedulerResult<(Vec<&'a NodeInfo>, Diagnosis)> {
        let mut diagnosis = Diagnosis::default();

        let (pre_filter, status) = fwk.run_pre_filter_plugins(state, unit, nodes);
        if !status.is_success() {
            if !status.is_unschedulable() {
                return Err(status.into_error());
            }
            diagnosis.pre_filter_message = Some(status.message());
            for info in nodes {
                if let Some(node) = info.node() {
                    diagnosis.record(node.name.clone(), status.clone());
                }
            }
            return Ok((Vec::new(), diagnosis));
        }

        if let Some(nominated) = unit.nominated_node_name.as_deref() {
            let info = nodes
                .iter()
                .copied()
                .find(|info| info.node().is_some_and(|n| n.name == nominated));
            if let Some(info) = info {
                let status = fwk.run_filter_plugins_with_nominated_units(state, unit, info);
                if status.code() == Code::Error {
                    return Err(status.into_error());
                }
                if status.is_success() {
                    return Ok((vec![info], diagnosis));
                }
                debug!(unit = %unit.key(), node = %nominated, %status, "nominated node no longer fits");
            }
        }

        let candidates: Vec<&NodeInfo> = match &pre_filter.node_names {
            Some(names) => nodes
                .iter()
                .copied()
                .filter(|info| info.node().is_some_and(|n| names.contains(&n.name)))
                .collect(),
            None => nodes.to_vec(),
        };
        let feasible = self.find_nodes_that_pass_filters(fwk, state, unit, &candidates, &mut diagnosis)?;
        Ok((feasible, diagnosis))
    }

    fn find_nodes_that_pass_filters<'a>(
        &self,
        fwk: &dyn Framework,
        state: &CycleState,
        unit: &PlacementUnit,
        nodes: &[&'a NodeInfo],
        diagnosis: &mut Diagnosis,
    ) -> SchedulerResult<Vec<&'a NodeInfo>> {
        let num_all = nodes.len();
        let Some(start) = self.rotation.start(num_all) else {
            return Ok(Vec::new());
        };
        let to_find = self.num_feasible_nodes_to_find(num_all);

        if !fwk.has_filter_plugins() {
            let feasible: Vec<&NodeInfo> = (0..to_find).map(|i| nodes[(start + i) % num_all]).collect();
            self.rotation.advance(feasible.len(), num_all);
            return Ok(feasible);
        }

        let verdicts: Vec<OnceLock<Status>> = (0..num_all).map(|_| OnceLock::new()).collect();
        let found = AtomicUsize::new(0);
        let cancel = AtomicBool::new(false);
        run_blocking(|| {
            parallelize_until(fwk.parallelism(), num_all, &cancel, |i| {
                let info = nodes[(start + i) % num_all];
                let status = fwk.run_filter_plugins_with_nominated_units(state, unit, info);
                if status.code() == Code::Error {
                    cancel.store(true, Ordering::Release);
                } else if status.is_success()
                    && found.fetch_add(1, Ordering::AcqRel) + 1 >= to_find
                {
                    cancel.store(true, Ordering::Release);
                }
                let _ = verdicts[i].set(status);
            })
        });

        let mut feasible = Vec::with_capacity(to_find.min(num_all));
        let mut processed = 0;
        for (i, verdict) in verdicts.into_iter().enumerate() {
            let Some(status) = verdict.into_inner() else {
                continue;
            };
            if status.code() == Code::Error {
                return Err(status.into_error());
            }
            if feasible.len() >= to_find {
                break;
            }
            processed += 1;
            let info = nodes[(start + i) % num_all];
            if status.is_success() {
                feasible.push(info);
            } else if let Some(node) = info.node() {
                diagnosis.record(node.name.clone(), status);
            }
        }
        self.rotation.advance(processed, num_all);
        debug!(unit = %unit.key(), nodes = num_all, processed, feasible = feasible.len(), "filtered nodes");
        Ok(feasible)
    }

    /// How many feasible nodes are enough to stop filtering early.
    pub fn num_feasible_nodes_to_find(&self, num_all_nodes: usize) -> usize {
        let percentage = i64::from(self.config.percentage_of_nodes_to_score);
        if num_all_nodes < MIN_FEASIBLE_NODES_TO_FIND || percentage >= 100 {
            return num_all_nodes;
        }
        let adaptive = if percentage <= 0 {
            (50 - num_all_nodes as i64 / 125).max(MIN_FEASIBLE_NODES_PERCENTAGE_TO_FIND)
        } else {
            percentage
        };
        let to_find = (num_all_nodes as i64 * adaptive / 100) as usize;
        to_find.max(MIN_FEASIBLE_NODES_TO_FIND)
    }
}

/// Highest total score wins; ties are broken uniformly at random.
pub fn select_host<R: Rng + ?Sized>(
    scores: &[NodePluginScores],
    rng: &mut R,
) -> SchedulerResult<String> {
    let mut iter = scores.iter();
    let Some(first) = iter.next() else {
        return Err(SchedulerError::NoNodesAvailable);
    };
    let mut selected = first;
    let mut ties = 1u32;
    for candidate in iter {
        if candidate.total_score > selected.total_score {
            selected = candidate;
            ties = 1;
        } else if candidate.total_score == selected.total_score {
            ties += 1;
            if rng.gen_range(0..ties) == 0 {
                selected = candidate;
            }
        }
    }
    Ok(selected.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fleetsched_core::{InstanceCategory, Resources, labels};

    use crate::framework::{Plugin, Profile, ReservePlugin};
    use crate::plugins::NodeResourcesFit;

    const GI: i64 = 1 << 30;

    fn make_cache() -> Arc<CapacityCache> {
        Arc::new(CapacityCache::new(Duration::from_secs(30), Duration::from_secs(1)))
    }

    fn make_node(name: &str, cpu: i64, mem_gi: i64, extra: &[(&str, &str)]) -> Node {
        let node_labels = extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Node::new(name, node_labels, Resources::new(cpu * 1000, mem_gi * GI, 0, 110))
    }

    fn make_host(name: &str, group: &str) -> Node {
        make_node(
            name,
            64,
            512,
            &[
                (labels::VERIFIED, "true"),
                (labels::CLUSTER_GROUP_ID, group),
            ],
        )
    }

    fn make_unit(name: &str, cpu: i64, mem_gi: i64) -> PlacementUnit {
        PlacementUnit::new("acct", name)
            .with_requests(Resources::new(cpu * 1000, mem_gi * GI, 0, 0))
            .with_scheduler_name(DEFAULT_SCHEDULER_NAME)
    }

    fn make_scheduler(cache: Arc<CapacityCache>, config: SchedulerConfig) -> Scheduler {
        Scheduler::new(cache, config).with_rng_seed(7)
    }

    fn with_percentage(percentage: i32) -> Scheduler {
        let config = SchedulerConfig {
            percentage_of_nodes_to_score: percentage,
            ..Default::default()
        };
        make_scheduler(make_cache(), config)
    }

    struct RejectReserve;

    impl Plugin for RejectReserve {
        fn name(&self) -> &'static str {
            "RejectReserve"
        }
    }

    impl ReservePlugin for RejectReserve {
        fn reserve(&self, _state: &mut CycleState, _unit: &PlacementUnit, _node_name: &str) -> Status {
            Status::unschedulable("volume binding failed")
        }

        fn unreserve(&self, _state: &mut CycleState, _unit: &PlacementUnit, _node_name: &str) {}
    }

    #[test]
    fn feasible_node_count_adapts_to_cluster_size() {
        let adaptive = with_percentage(0);
        assert_eq!(adaptive.num_feasible_nodes_to_find(50), 50);
        assert_eq!(adaptive.num_feasible_nodes_to_find(1000), 420);
        assert_eq!(adaptive.num_feasible_nodes_to_find(10_000), 500);
        assert_eq!(with_percentage(10).num_feasible_nodes_to_find(5000), 500);
        assert_eq!(with_percentage(1).num_feasible_nodes_to_find(200), 100);
        assert_eq!(with_percentage(100).num_feasible_nodes_to_find(5000), 5000);
    }

    #[test]
    fn select_host_prefers_highest_score() {
        let mut rng = StdRng::seed_from_u64(1);
        let scores = vec![
            NodePluginScores { name: "c/a".into(), total_score: 10 },
            NodePluginScores { name: "c/b".into(), total_score: 40 },
            NodePluginScores { name: "c/c".into(), total_score: 20 },
        ];
        assert_eq!(select_host(&scores, &mut rng).unwrap(), "c/b");
        assert!(matches!(
            select_host(&[], &mut rng),
            Err(SchedulerError::NoNodesAvailable)
        ));
    }

    #[test]
    fn select_host_spreads_ties() {
        let mut rng = StdRng::seed_from_u64(1);
        let scores = vec![
            NodePluginScores { name: "c/a".into(), total_score: 5 },
            NodePluginScores { name: "c/b".into(), total_score: 5 },
        ];
        let picks: HashSet<String> = (0..64)
            .map(|_| select_host(&scores, &mut rng).unwrap())
            .collect();
        assert_eq!(picks.len(), 2);
    }

    #[tokio::test]
    async fn empty_cache_has_no_nodes() {
        let scheduler = make_scheduler(make_cache(), SchedulerConfig::default());
        let err = scheduler.schedule_one(make_unit("a", 1, 1), 1).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoNodesAvailable));
    }

    #[tokio::test]
    async fn unit_is_assumed_on_fitting_node() {
        let cache = make_cache();
        cache.add_node(make_node("vm1/small", 2, 4, &[])).await;
        cache.add_node(make_node("vm1/large", 32, 128, &[])).await;
        let scheduler = make_scheduler(cache.clone(), SchedulerConfig::default());

        let (assumed, result) = scheduler.schedule_one(make_unit("a", 8, 16), 1).await.unwrap();
        assert_eq!(result.suggested_host, "vm1/large");
        assert_eq!(result.feasible_nodes, 1);
        assert_eq!(result.evaluated_nodes, 2);
        assert_eq!(assumed.node_name.as_deref(), Some("vm1/large"));
        assert!(cache.is_assumed("acct/a").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn filters_on_multi_thread_runtime() {
        let cache = make_cache();
        for i in 0..20 {
            cache.add_node(make_node(&format!("vm1/n{i}"), 2, 4, &[])).await;
        }
        cache.add_node(make_node("vm1/large", 32, 128, &[])).await;
        let scheduler = make_scheduler(cache.clone(), SchedulerConfig::default());

        let (_, result) = scheduler.schedule_one(make_unit("a", 8, 16), 1).await.unwrap();
        assert_eq!(result.suggested_host, "vm1/large");
        assert_eq!(result.evaluated_nodes, 21);
    }

    #[tokio::test]
    async fn insufficient_capacity_is_a_fit_error() {
        let cache = make_cache();
        cache.add_node(make_node("vm1/n1", 2, 4, &[])).await;
        cache.add_node(make_node("vm1/n2", 2, 64, &[])).await;
        let scheduler = make_scheduler(cache.clone(), SchedulerConfig::default());

        let err = scheduler.schedule_one(make_unit("a", 8, 16), 1).await.unwrap_err();
        let SchedulerError::Fit(fit) = &err else {
            panic!("expected fit error, got {err}");
        };
        assert_eq!(fit.num_all_nodes, 2);
        assert!(fit.diagnosis.unschedulable_plugins.contains("NodeResourcesFit"));
        let message = err.to_string();
        assert!(message.starts_with("0/2 nodes are available"), "{message}");
        assert!(message.contains("2 Insufficient cpu"), "{message}");
        assert_eq!(cache.unit_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_profile_is_rejected() {
        let cache = make_cache();
        cache.add_node(make_node("vm1/n1", 8, 8, &[])).await;
        let scheduler = make_scheduler(cache, SchedulerConfig::default());
        let unit = make_unit("a", 1, 1).with_scheduler_name("other");
        let err = scheduler.schedule_one(unit, 1).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn reserve_failure_forgets_the_unit() {
        let cache = make_cache();
        cache.add_node(make_node("vm1/n1", 8, 8, &[])).await;
        let profile = Profile::new("strict", 4)
            .with_filter(Arc::new(NodeResourcesFit))
            .with_reserve(Arc::new(RejectReserve));
        let scheduler =
            make_scheduler(cache.clone(), SchedulerConfig::default()).with_profile(Arc::new(profile));

        let unit = make_unit("a", 1, 1).with_scheduler_name("strict");
        let err = scheduler.schedule_one(unit, 1).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Plugin { ref plugin, .. } if plugin == "RejectReserve"));
        assert!(!cache.is_assumed("acct/a").await);
        assert_eq!(cache.unit_count().await, 0);
    }

    #[tokio::test]
    async fn assumed_capacity_is_seen_by_next_cycle() {
        let cache = make_cache();
        cache.add_node(make_node("vm1/n1", 8, 32, &[])).await;
        let scheduler = make_scheduler(cache.clone(), SchedulerConfig::default());

        scheduler.schedule_one(make_unit("a", 6, 8), 1).await.unwrap();
        let err = scheduler.schedule_one(make_unit("b", 6, 8), 1).await.unwrap_err();
        assert!(err.is_unschedulable());

        scheduler
            .unassume_units(&[make_unit("a", 6, 8).with_node_name("vm1/n1")])
            .await;
        scheduler.schedule_one(make_unit("b", 6, 8), 1).await.unwrap();
    }

    #[tokio::test]
    async fn binpack_keeps_batch_inside_one_group() {
        let cache = make_cache();
        for name in ["bm/a1", "bm/a2"] {
            cache.add_node(make_host(name, "a")).await;
        }
        for name in ["bm/b1", "bm/b2", "bm/b3"] {
            cache.add_node(make_host(name, "b")).await;
        }
        let scheduler = make_scheduler(cache, SchedulerConfig::default());
        let unit = PlacementUnit {
            category: Some(InstanceCategory::BareMetalHost),
            ..make_unit("bm-0", 8, 16)
        };

        let (_, result) = scheduler.schedule_one(unit.clone(), 3).await.unwrap();
        assert!(result.suggested_host.starts_with("bm/b"), "{}", result.suggested_host);

        let next = PlacementUnit {
            name: "bm-1".into(),
            ..unit
        };
        let err = scheduler.schedule_one(next, 4).await.unwrap_err();
        let SchedulerError::Fit(fit) = err else {
            panic!("expected fit error");
        };
        assert!(fit.diagnosis.unschedulable_plugins.contains("Binpack"));
    }

    #[tokio::test]
    async fn spread_units_report_partition() {
        let cache = make_cache();
        cache
            .add_node(make_node("vm1/n1", 8, 32, &[(labels::PARTITION, "p1")]))
            .await;
        let scheduler = make_scheduler(cache, SchedulerConfig::default());
        let mut unit = make_unit("a", 1, 1);
        unit.topology_spread = vec![fleetsched_core::TopologySpreadConstraint {
            topology_key: labels::PARTITION.into(),
            max_skew: 1,
            match_labels: BTreeMap::new(),
        }];
        let (_, result) = scheduler.schedule_one(unit, 1).await.unwrap();
        assert_eq!(result.partition.as_deref(), Some("p1"));
    }
}
