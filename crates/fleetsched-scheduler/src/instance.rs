//! Instance requests in scheduler terms.
//!
//! Converts instance requests into placement units, derives the network
//! placement of a batch, and resolves which supercompute and cluster groups
//! a wide-fabric batch should land in.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use fleetsched_cache::NodeInfo;
use fleetsched_core::instance::{InstanceSpec, InstanceTypeSpec, split_ids};
use fleetsched_core::{
    InstanceCategory, InstanceRequest, NetworkInfo, NetworkMode, Node, NodeSelector,
    NodeSelectorTerm, PlacementUnit, Requirement, Resources, SchedulerConfig,
    TopologySpreadConstraint, labels,
};
use fleetsched_placement::{
    ClusterGroup, ClusterGroupInfos, GroupOptions, GroupType, min_current_cap_filter,
    network_mode_filter, supercompute_group_identifier,
};

use crate::error::{SchedulerError, SchedulerResult};

/// Scheduler name every converted unit carries.
pub const DEFAULT_SCHEDULER_NAME: &str = "fleetsched";

fn incomplete() -> SchedulerError {
    SchedulerError::InvalidRequest("incomplete instance".into())
}

fn spec_of(instance: &InstanceRequest) -> SchedulerResult<&InstanceSpec> {
    instance.spec.as_ref().ok_or_else(incomplete)
}

/// The resource shape of an instance: inline, or looked up by instance
/// type name in the configured catalog.
pub fn resolve_type_spec<'a>(
    instance: &'a InstanceRequest,
    config: &'a SchedulerConfig,
) -> SchedulerResult<&'a InstanceTypeSpec> {
    let spec = spec_of(instance)?;
    spec.instance_type_spec
        .as_ref()
        .or_else(|| {
            config
                .instance_types
                .iter()
                .find(|t| t.name == spec.instance_type)
        })
        .ok_or_else(incomplete)
}

/// Milli-CPU a unit of `cores` requests after overcommit.
pub fn milli_cpu_request(cores: i64, overcommit_percent: u32) -> i64 {
    cores * 1000 * 100 / i64::from(overcommit_percent.max(1))
}

// ── Conversion ─────────────────────────────────────────────────

/// Convert one instance of a batch into the unit the pipeline places.
pub fn instance_to_unit(
    instance: &InstanceRequest,
    net: &NetworkInfo,
    config: &SchedulerConfig,
) -> SchedulerResult<PlacementUnit> {
    if instance.resource_id.is_empty() || instance.cloud_account_id.is_empty() {
        return Err(incomplete());
    }
    let spec = spec_of(instance)?;
    let type_spec = resolve_type_spec(instance, config)?;
    let (Some(cpu), Some(memory)) = (&type_spec.cpu, &type_spec.memory) else {
        return Err(incomplete());
    };
    let bare_metal = type_spec.category == InstanceCategory::BareMetalHost;
    let gpu_count = type_spec.gpu_count();

    let mut net = net.clone();
    let mut cluster_group_id = spec.cluster_group_id.trim().to_string();
    let mut unit_labels = instance.labels.clone();
    if bare_metal {
        if let Some(mode) = &net.network_mode {
            unit_labels.insert(labels::NETWORK_MODE.into(), mode.to_string());
        }
        if !cluster_group_id.is_empty() {
            if cluster_group_id.contains(',') {
                cluster_group_id.clear();
            }
            if net.network_mode != Some(NetworkMode::Xbx) && !cluster_group_id.is_empty() {
                net.cluster_group_ids = BTreeSet::from([cluster_group_id.clone()]);
            }
        }
    }
    unit_labels.insert(labels::RESOURCE_ID.into(), instance.resource_id.clone());
    unit_labels.insert(
        labels::INSTANCE_CATEGORY.into(),
        type_spec.category.as_str().into(),
    );
    unit_labels.insert(
        labels::instance_type_label(&type_spec.name.to_lowercase()),
        labels::TRUE.into(),
    );
    if !spec.instance_group.is_empty() {
        unit_labels.insert(labels::INSTANCE_GROUP.into(), spec.instance_group.clone());
    }
    if !cluster_group_id.is_empty() {
        unit_labels.insert(labels::CLUSTER_GROUP_ID.into(), cluster_group_id);
    }

    let mut memory_bytes = memory.size.value();
    if !bare_metal && gpu_count == 0 {
        memory_bytes += config.vm_overhead_memory.value();
    }
    let requests = Resources {
        milli_cpu: milli_cpu_request(cpu.cores, config.cpu_overcommit_percent),
        memory: memory_bytes,
        gpu: if bare_metal { 0 } else { gpu_count },
        pods: 0,
    };

    let name = if bare_metal {
        instance.resource_id.clone()
    } else {
        format!("virt-launcher-{}-abcde", instance.resource_id)
    };

    Ok(PlacementUnit {
        labels: unit_labels,
        requests,
        scheduler_name: DEFAULT_SCHEDULER_NAME.into(),
        category: Some(type_spec.category),
        network_mode: if bare_metal { net.network_mode.clone() } else { None },
        required_affinity: Some(required_affinity(instance, type_spec, &net)),
        topology_spread: spec
            .topology_spread
            .iter()
            .map(|s| TopologySpreadConstraint {
                topology_key: labels::PARTITION.into(),
                max_skew: 1,
                match_labels: s.match_labels.clone(),
            })
            .collect(),
        ..PlacementUnit::new(instance.cloud_account_id.clone(), name)
    })
}

// ── Selectors ──────────────────────────────────────────────────

/// Selector terms for nodes able to host the instance: the instance type,
/// supported firmware, assigned supercompute groups, and one term per
/// allowed compute node pool.
pub fn node_selector_terms(
    instance: &InstanceRequest,
    type_spec: &InstanceTypeSpec,
    net: &NetworkInfo,
) -> Vec<NodeSelectorTerm> {
    let mut requirements = Vec::new();
    if !type_spec.name.is_empty() {
        requirements.push(Requirement::is_in(
            labels::instance_type_label(&type_spec.name.to_lowercase()),
            [labels::TRUE],
        ));
    }
    if let Some(versions) = instance
        .labels
        .get(labels::FIRMWARE_VERSION)
        .filter(|v| !v.is_empty())
    {
        requirements.push(Requirement::is_in(
            labels::FIRMWARE_VERSION,
            versions.split('_'),
        ));
    }
    if !net.supercompute_group_ids.is_empty() {
        requirements.push(Requirement::is_in(
            labels::SUPERCOMPUTE_GROUP_ID,
            net.supercompute_group_ids.iter().cloned(),
        ));
    }

    let pools: Vec<Requirement> = instance
        .spec
        .iter()
        .flat_map(|s| &s.compute_node_pools)
        .map(|pool| Requirement::is_in(labels::compute_node_pool_label(pool), [labels::TRUE]))
        .collect();
    distribute_requirements(&pools, vec![NodeSelectorTerm::new(requirements)])
}

/// Distribute alternative requirements over `terms`: every term is copied
/// once per requirement with that requirement added.
pub fn distribute_requirements(
    requirements: &[Requirement],
    terms: Vec<NodeSelectorTerm>,
) -> Vec<NodeSelectorTerm> {
    if requirements.is_empty() || terms.is_empty() {
        return terms;
    }
    let mut distributed = Vec::with_capacity(requirements.len() * terms.len());
    for requirement in requirements {
        for term in &terms {
            let mut term = term.clone();
            term.match_expressions.push(requirement.clone());
            distributed.push(term);
        }
    }
    distributed
}

fn required_affinity(
    instance: &InstanceRequest,
    type_spec: &InstanceTypeSpec,
    net: &NetworkInfo,
) -> NodeSelector {
    let mut selector = NodeSelector::new(node_selector_terms(instance, type_spec, net));
    if !net.cluster_group_ids.is_empty() {
        selector.require(Requirement::is_in(
            labels::CLUSTER_GROUP_ID,
            net.cluster_group_ids.iter().cloned(),
        ));
    }
    if net.network_mode == Some(NetworkMode::Xbx) {
        selector.require(Requirement::is_in(
            labels::NETWORK_MODE,
            [NetworkMode::Xbx.as_str()],
        ));
    }
    selector
}

// ── Network placement ──────────────────────────────────────────

/// Network placement a batch asked for. Every instance must share one
/// instance type and one network mode.
pub fn assigned_network_info(
    instances: &[InstanceRequest],
    config: &SchedulerConfig,
) -> SchedulerResult<NetworkInfo> {
    let mut instance_types = BTreeSet::new();
    let mut network_modes = BTreeSet::new();
    let mut net = NetworkInfo::default();
    for instance in instances {
        let spec = spec_of(instance)?;
        instance_types.insert(resolve_type_spec(instance, config)?.name.clone());
        network_modes.insert(spec.network_mode.trim().to_string());
        net.cluster_group_ids.extend(split_ids(&spec.cluster_group_id));
        net.supercompute_group_ids
            .extend(split_ids(&spec.supercompute_group_id));
    }
    if instance_types.len() != 1 {
        return Err(SchedulerError::InvalidRequest(
            "instance type must be the same for the instance group".into(),
        ));
    }
    if network_modes.len() != 1 {
        return Err(SchedulerError::InvalidRequest(
            "network mode must be the same for the instance group".into(),
        ));
    }
    net.network_mode = network_modes
        .into_iter()
        .next()
        .filter(|m| !m.is_empty())
        .map(NetworkMode::from);
    Ok(net)
}

/// Derive the target network placement of a batch. Wide-fabric batches
/// also get their candidate groups resolved from `nodes`.
pub fn network_info<R: Rng + ?Sized>(
    instances: &[InstanceRequest],
    nodes: &[&NodeInfo],
    config: &SchedulerConfig,
    rng: &mut R,
) -> SchedulerResult<NetworkInfo> {
    let Some(first) = instances.first() else {
        return Ok(NetworkInfo::default());
    };
    if resolve_type_spec(first, config)?.category != InstanceCategory::BareMetalHost {
        return Ok(NetworkInfo::default());
    }

    let mut net = assigned_network_info(instances, config)?;
    debug!(?net, "assigned network");

    let spec = spec_of(first)?;
    if !spec.instance_group.is_empty() {
        if !net.supercompute_group_ids.is_empty() {
            info!(instance_group = %spec.instance_group, "scheduling supercompute instance group");
            net.network_mode = Some(NetworkMode::Xbx);
        } else if net.cluster_group_ids.is_empty() {
            let threshold = config.wide_fabric_instance_count_threshold;
            info!(instance_group = %spec.instance_group, size = spec.instance_group_size, threshold, "scheduling new instance group");
            net.network_mode = if threshold > 0 && spec.instance_group_size >= threshold {
                Some(NetworkMode::Xbx)
            } else {
                Some(NetworkMode::Vvv)
            };
        }
    } else {
        net.network_mode = Some(NetworkMode::Vvv);
    }

    if net.network_mode == Some(NetworkMode::Xbx) {
        let (supercompute, cluster) = feasible_groups(nodes, instances, &net, config)?;
        let (sc_ids, cluster_ids) =
            suggest_group_ids(&supercompute, &cluster, instances.len(), &net, rng)?;
        net.supercompute_group_ids = sc_ids;
        net.cluster_group_ids = cluster_ids;
    }
    info!(
        network_mode = ?net.network_mode.as_ref().map(NetworkMode::as_str),
        supercompute_group_ids = ?net.supercompute_group_ids,
        cluster_group_ids = ?net.cluster_group_ids,
        "target network"
    );
    Ok(net)
}

/// Supercompute and cluster groups able to take the whole batch.
pub fn feasible_groups(
    nodes: &[&NodeInfo],
    instances: &[InstanceRequest],
    net: &NetworkInfo,
    config: &SchedulerConfig,
) -> SchedulerResult<(ClusterGroupInfos, ClusterGroupInfos)> {
    let first = instances.first().ok_or_else(incomplete)?;
    let type_spec = resolve_type_spec(first, config)?;
    let assigned_sc = &net.supercompute_group_ids;
    let assigned_groups = &net.cluster_group_ids;

    let all_nodes: Vec<Arc<Node>> = nodes
        .iter()
        .filter_map(|info| {
            let node = info.node()?;
            if info.units.is_empty() {
                return info.shared_node();
            }
            let mut node = node.clone();
            node.set_label(labels::NODE_ASSIGNED, labels::TRUE);
            Some(Arc::new(node))
        })
        .collect();

    let selector = NodeSelector::new(node_selector_terms(first, type_spec, net));
    let mut options = GroupOptions::new()
        .with_identifier(supercompute_group_identifier)
        .with_node_selector(selector);
    if let Some(mode) = &net.network_mode {
        options = options.with_filter(network_mode_filter(mode.clone()));
    }
    if !assigned_sc.is_empty() {
        options = options.with_filter(min_current_cap_filter(instances.len()));
    }
    let fits_batch = min_current_cap_filter(instances.len());

    let mut all = ClusterGroupInfos::build(all_nodes, options);
    let mut supercompute: Vec<ClusterGroup> = Vec::new();
    let mut cluster: Vec<ClusterGroup> = Vec::new();

    for id in all.ids() {
        let Some(group) = all.get(&id) else {
            continue;
        };
        debug!(group = %id, current_cap = group.current_cap, max_cap = group.max_cap, assigned = group.assigned, "evaluating group");
        if group.current_cap == 0 {
            continue;
        }
        match group.group_type() {
            GroupType::SuperCompute => {
                if assigned_sc.is_empty() && !assigned_groups.is_empty() {
                    continue;
                }
                if !assigned_sc.contains(&id) && !fits_batch(group) {
                    continue;
                }
                let taken: Vec<String> = group
                    .children()
                    .into_iter()
                    .flat_map(|c| c.values())
                    .filter(|sub| sub.assigned && !assigned_groups.contains(&sub.id))
                    .map(|sub| sub.id.clone())
                    .collect();
                for child in taken {
                    all.delete_sub_group(&id, &child);
                }
                if let Some(group) = all.get(&id).filter(|g| g.current_cap > 0) {
                    supercompute.push(group.clone());
                }
            }
            GroupType::Cluster => {
                if group.parent.is_some() {
                    continue;
                }
                if assigned_groups.contains(&id) || !group.assigned {
                    cluster.push(group.clone());
                }
            }
        }
    }

    if supercompute.is_empty() && cluster.is_empty() {
        return Err(SchedulerError::NoFeasibleGroups);
    }
    for group in supercompute.iter().chain(&cluster) {
        debug!(group = %group.id, current_cap = group.current_cap, "feasible group");
    }
    Ok((
        ClusterGroupInfos::from_groups(supercompute),
        ClusterGroupInfos::from_groups(cluster),
    ))
}

/// Pick the groups a wide-fabric batch of `batch_size` should use.
/// Supercompute groups win when any are assigned or feasible.
pub fn suggest_group_ids<R: Rng + ?Sized>(
    supercompute: &ClusterGroupInfos,
    cluster: &ClusterGroupInfos,
    batch_size: usize,
    net: &NetworkInfo,
    rng: &mut R,
) -> SchedulerResult<(BTreeSet<String>, BTreeSet<String>)> {
    let preferred_sc: Vec<String> = net.supercompute_group_ids.iter().cloned().collect();
    let preferred_groups: Vec<String> = net.cluster_group_ids.iter().cloned().collect();
    let mut sc_ids = BTreeSet::new();
    let mut cluster_ids = BTreeSet::new();

    if !preferred_sc.is_empty() || !supercompute.is_empty() {
        let chosen = supercompute.find_group_with_least_cap(&preferred_sc, rng)?;
        sc_ids.insert(chosen.id.clone());
        cluster_ids.extend(
            supercompute
                .sub_groups(&chosen.id)
                .find_groups(batch_size, &preferred_groups)?,
        );
    } else if !preferred_groups.is_empty() || !cluster.is_empty() {
        cluster_ids.extend(cluster.find_groups(batch_size, &preferred_groups)?);
    }

    if sc_ids.is_empty() && cluster_ids.is_empty() {
        return Err(SchedulerError::NoSuggestedGroups);
    }
    info!(supercompute_group_ids = ?sc_ids, cluster_group_ids = ?cluster_ids, "suggested groups");
    Ok((sc_ids, cluster_ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use fleetsched_core::Quantity;
    use fleetsched_core::instance::{CpuSpec, GpuSpec, MemorySpec, SpreadSpec};
    use fleetsched_placement::CapacityError;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const BM_TYPE: &str = "bm-spr-pvc";

    fn make_type(category: InstanceCategory, gpus: i64) -> InstanceTypeSpec {
        InstanceTypeSpec {
            name: BM_TYPE.into(),
            category,
            cpu: Some(CpuSpec { cores: 8 }),
            memory: Some(MemorySpec {
                size: "16Gi".parse().unwrap(),
            }),
            gpu: (gpus > 0).then(|| GpuSpec {
                model_name: "pvc".into(),
                count: gpus,
            }),
        }
    }

    fn make_instance(id: &str, category: InstanceCategory) -> InstanceRequest {
        InstanceRequest {
            resource_id: id.into(),
            cloud_account_id: "acct-1".into(),
            labels: BTreeMap::new(),
            spec: Some(InstanceSpec {
                instance_type: BM_TYPE.into(),
                instance_type_spec: Some(make_type(category, 0)),
                ..Default::default()
            }),
        }
    }

    fn make_group(n: usize, f: impl Fn(&mut InstanceSpec)) -> Vec<InstanceRequest> {
        (0..n)
            .map(|i| {
                let mut instance = make_instance(&format!("inst-{i}"), InstanceCategory::BareMetalHost);
                let spec = instance.spec.as_mut().unwrap();
                spec.instance_group = "ig-1".into();
                spec.instance_group_size = n as u32;
                f(spec);
                instance
            })
            .collect()
    }

    fn make_host(name: &str, group: &str, sc: Option<&str>, mode: &str) -> NodeInfo {
        let mut host_labels: BTreeMap<String, String> = [
            (labels::VERIFIED, "true"),
            (labels::CLUSTER_GROUP_ID, group),
            (labels::NETWORK_MODE, mode),
            (labels::MEMORY_SIZE, "512Gi"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        host_labels.insert(labels::instance_type_label(BM_TYPE), "true".into());
        if let Some(sc) = sc {
            host_labels.insert(labels::SUPERCOMPUTE_GROUP_ID.into(), sc.into());
        }
        NodeInfo::new(Node::new(name, host_labels, Resources::new(8000, 1 << 40, 0, 1)))
    }

    fn occupy(info: &mut NodeInfo) {
        let name = info.node().unwrap().name.clone();
        info.add_unit(PlacementUnit::new("acct-0", format!("tenant-{name}")).with_node_name(name));
    }

    #[test]
    fn incomplete_instances_are_rejected() {
        let config = SchedulerConfig::default();
        let net = NetworkInfo::default();

        let mut instance = make_instance("i", InstanceCategory::VirtualMachine);
        instance.cloud_account_id.clear();
        assert!(matches!(
            instance_to_unit(&instance, &net, &config),
            Err(SchedulerError::InvalidRequest(_))
        ));

        let mut instance = make_instance("i", InstanceCategory::VirtualMachine);
        instance.spec.as_mut().unwrap().instance_type_spec.as_mut().unwrap().memory = None;
        assert!(instance_to_unit(&instance, &net, &config).is_err());

        let mut instance = make_instance("i", InstanceCategory::VirtualMachine);
        instance.spec = None;
        assert!(instance_to_unit(&instance, &net, &config).is_err());
    }

    #[test]
    fn type_spec_falls_back_to_catalog() {
        let mut config = SchedulerConfig::default();
        config.instance_types.push(make_type(InstanceCategory::VirtualMachine, 0));
        let mut instance = make_instance("i", InstanceCategory::VirtualMachine);
        instance.spec.as_mut().unwrap().instance_type_spec = None;
        assert_eq!(resolve_type_spec(&instance, &config).unwrap().name, BM_TYPE);
    }

    #[test]
    fn vm_unit_requests_include_overcommit_and_overhead() {
        let config = SchedulerConfig {
            cpu_overcommit_percent: 200,
            vm_overhead_memory: Quantity::from_value(1 << 30),
            ..Default::default()
        };
        let instance = make_instance("vm-1", InstanceCategory::VirtualMachine);
        let unit = instance_to_unit(&instance, &NetworkInfo::default(), &config).unwrap();
        assert_eq!(unit.namespace, "acct-1");
        assert_eq!(unit.name, "virt-launcher-vm-1-abcde");
        assert_eq!(unit.requests.milli_cpu, 4000);
        assert_eq!(unit.requests.memory, 17 << 30);
        assert_eq!(unit.labels[labels::RESOURCE_ID], "vm-1");
        assert_eq!(unit.scheduler_name, DEFAULT_SCHEDULER_NAME);
        assert!(unit.network_mode.is_none());
    }

    #[test]
    fn vm_gpu_instances_request_gpus_without_overhead() {
        let config = SchedulerConfig {
            vm_overhead_memory: Quantity::from_value(1 << 30),
            ..Default::default()
        };
        let mut instance = make_instance("vm-1", InstanceCategory::VirtualMachine);
        instance.spec.as_mut().unwrap().instance_type_spec =
            Some(make_type(InstanceCategory::VirtualMachine, 4));
        let unit = instance_to_unit(&instance, &NetworkInfo::default(), &config).unwrap();
        assert_eq!(unit.requests.gpu, 4);
        assert_eq!(unit.requests.memory, 16 << 30);
    }

    #[test]
    fn bare_metal_unit_pins_single_cluster_group() {
        let mut instance = make_instance("bm-1", InstanceCategory::BareMetalHost);
        instance.spec.as_mut().unwrap().cluster_group_id = "cg-7".into();
        let net = NetworkInfo {
            network_mode: Some(NetworkMode::Vvv),
            ..Default::default()
        };
        let unit = instance_to_unit(&instance, &net, &SchedulerConfig::default()).unwrap();
        assert_eq!(unit.name, "bm-1");
        assert_eq!(unit.labels[labels::CLUSTER_GROUP_ID], "cg-7");
        assert_eq!(unit.labels[labels::NETWORK_MODE], "VVV");
        assert_eq!(unit.network_mode, Some(NetworkMode::Vvv));

        let selector = unit.required_affinity.unwrap();
        let mut host: BTreeMap<String, String> = [
            (labels::instance_type_label(BM_TYPE), "true".to_string()),
            (labels::CLUSTER_GROUP_ID.to_string(), "cg-7".to_string()),
        ]
        .into();
        assert!(selector.matches(&host));
        host.insert(labels::CLUSTER_GROUP_ID.into(), "cg-8".into());
        assert!(!selector.matches(&host));
    }

    #[test]
    fn bare_metal_candidate_list_is_cleared() {
        let mut instance = make_instance("bm-1", InstanceCategory::BareMetalHost);
        instance.spec.as_mut().unwrap().cluster_group_id = "cg-1,cg-2".into();
        let net = NetworkInfo {
            network_mode: Some(NetworkMode::Xbx),
            cluster_group_ids: BTreeSet::from(["cg-2".to_string()]),
            ..Default::default()
        };
        let unit = instance_to_unit(&instance, &net, &SchedulerConfig::default()).unwrap();
        assert!(!unit.labels.contains_key(labels::CLUSTER_GROUP_ID));
        let terms = &unit.required_affinity.unwrap().terms;
        assert!(terms[0]
            .match_expressions
            .contains(&Requirement::is_in(labels::CLUSTER_GROUP_ID, ["cg-2"])));
        assert!(terms[0]
            .match_expressions
            .contains(&Requirement::is_in(labels::NETWORK_MODE, ["XBX"])));
    }

    #[test]
    fn selector_terms_cover_firmware_and_pools() {
        let mut instance = make_instance("bm-1", InstanceCategory::BareMetalHost);
        instance
            .labels
            .insert(labels::FIRMWARE_VERSION.into(), "1.2_1.3".into());
        let spec = instance.spec.as_mut().unwrap();
        spec.compute_node_pools = vec!["general".into(), "reserved".into()];
        spec.topology_spread = vec![SpreadSpec::default()];

        let type_spec = make_type(InstanceCategory::BareMetalHost, 0);
        let terms = node_selector_terms(&instance, &type_spec, &NetworkInfo::default());
        assert_eq!(terms.len(), 2);
        for (term, pool) in terms.iter().zip(["general", "reserved"]) {
            assert_eq!(term.match_expressions.len(), 3);
            assert_eq!(
                term.match_expressions[1],
                Requirement::is_in(labels::FIRMWARE_VERSION, ["1.2", "1.3"])
            );
            assert_eq!(
                term.match_expressions[2],
                Requirement::is_in(labels::compute_node_pool_label(pool), ["true"])
            );
        }

        let unit = instance_to_unit(&instance, &NetworkInfo::default(), &SchedulerConfig::default())
            .unwrap();
        assert_eq!(unit.topology_spread.len(), 1);
        assert_eq!(unit.topology_spread[0].topology_key, labels::PARTITION);
    }

    #[test]
    fn distribute_without_alternatives_keeps_terms() {
        let terms = vec![NodeSelectorTerm::new(vec![Requirement::is_in("a", ["1"])])];
        assert_eq!(distribute_requirements(&[], terms.clone()), terms);
    }

    #[test]
    fn mixed_batches_are_rejected() {
        let config = SchedulerConfig::default();
        let mut batch = make_group(2, |_| {});
        batch[1].spec.as_mut().unwrap().network_mode = "XBX".into();
        let err = assigned_network_info(&batch, &config).unwrap_err();
        assert!(err.to_string().contains("network mode must be the same"));

        let mut batch = make_group(2, |_| {});
        batch[1]
            .spec
            .as_mut()
            .unwrap()
            .instance_type_spec
            .as_mut()
            .unwrap()
            .name = "other".into();
        let err = assigned_network_info(&batch, &config).unwrap_err();
        assert!(err.to_string().contains("instance type must be the same"));
    }

    #[test]
    fn network_mode_derivation() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = SchedulerConfig::default();

        let vm = vec![make_instance("vm", InstanceCategory::VirtualMachine)];
        assert_eq!(network_info(&vm, &[], &config, &mut rng).unwrap(), NetworkInfo::default());

        let single = vec![make_instance("bm", InstanceCategory::BareMetalHost)];
        let net = network_info(&single, &[], &config, &mut rng).unwrap();
        assert_eq!(net.network_mode, Some(NetworkMode::Vvv));

        let group = make_group(4, |_| {});
        let net = network_info(&group, &[], &config, &mut rng).unwrap();
        assert_eq!(net.network_mode, Some(NetworkMode::Vvv));

        let assigned = make_group(2, |s| {
            s.cluster_group_id = "cg-1".into();
            s.network_mode = "VVV".into();
        });
        let net = network_info(&assigned, &[], &config, &mut rng).unwrap();
        assert_eq!(net.network_mode, Some(NetworkMode::Vvv));
        assert_eq!(net.cluster_group_ids, BTreeSet::from(["cg-1".to_string()]));
    }

    #[test]
    fn large_new_group_goes_wide_fabric() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = SchedulerConfig {
            wide_fabric_instance_count_threshold: 2,
            ..Default::default()
        };
        let hosts = [
            make_host("ns/a1", "a", None, "XBX"),
            make_host("ns/a2", "a", None, "XBX"),
            make_host("ns/b1", "b", None, "XBX"),
            make_host("ns/b2", "b", None, "XBX"),
            make_host("ns/b3", "b", None, "XBX"),
            make_host("ns/v1", "v", None, "VVV"),
            make_host("ns/v2", "v", None, "VVV"),
        ];
        let nodes: Vec<&NodeInfo> = hosts.iter().collect();
        let group = make_group(3, |_| {});
        let net = network_info(&group, &nodes, &config, &mut rng).unwrap();
        assert_eq!(net.network_mode, Some(NetworkMode::Xbx));
        assert_eq!(net.cluster_group_ids, BTreeSet::from(["b".to_string()]));
        assert!(net.supercompute_group_ids.is_empty());
    }

    #[test]
    fn supercompute_group_prefers_unassigned_children() {
        let mut rng = StdRng::seed_from_u64(5);
        let config = SchedulerConfig::default();
        let mut hosts = vec![
            make_host("ns/a1", "a", Some("sc-1"), "XBX"),
            make_host("ns/a2", "a", Some("sc-1"), "XBX"),
            make_host("ns/b1", "b", Some("sc-1"), "XBX"),
            make_host("ns/b2", "b", Some("sc-1"), "XBX"),
            make_host("ns/c1", "c", Some("sc-1"), "XBX"),
        ];
        // A tenant already holds one host of cluster group "a".
        occupy(&mut hosts[0]);
        let nodes: Vec<&NodeInfo> = hosts.iter().collect();

        let batch = make_group(2, |s| s.supercompute_group_id = "sc-1".into());
        let net = network_info(&batch, &nodes, &config, &mut rng).unwrap();
        assert_eq!(net.network_mode, Some(NetworkMode::Xbx));
        assert_eq!(net.supercompute_group_ids, BTreeSet::from(["sc-1".to_string()]));
        assert_eq!(net.cluster_group_ids, BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn feasible_groups_skip_assigned_cluster_groups() {
        let config = SchedulerConfig::default();
        let mut hosts = vec![
            make_host("ns/a1", "a", None, "XBX"),
            make_host("ns/a2", "a", None, "XBX"),
            make_host("ns/b1", "b", None, "XBX"),
        ];
        occupy(&mut hosts[0]);
        let nodes: Vec<&NodeInfo> = hosts.iter().collect();
        let batch = make_group(1, |_| {});
        let net = NetworkInfo {
            network_mode: Some(NetworkMode::Xbx),
            ..Default::default()
        };
        let (sc, cluster) = feasible_groups(&nodes, &batch, &net, &config).unwrap();
        assert!(sc.is_empty());
        assert_eq!(cluster.ids(), vec!["b"]);

        let net = NetworkInfo {
            network_mode: Some(NetworkMode::Xbx),
            cluster_group_ids: BTreeSet::from(["a".to_string()]),
            ..Default::default()
        };
        let (_, cluster) = feasible_groups(&nodes, &batch, &net, &config).unwrap();
        assert_eq!(cluster.ids(), vec!["a", "b"]);
    }

    #[test]
    fn no_feasible_groups_is_unschedulable() {
        let config = SchedulerConfig::default();
        let hosts = [make_host("ns/v1", "v", None, "VVV")];
        let nodes: Vec<&NodeInfo> = hosts.iter().collect();
        let net = NetworkInfo {
            network_mode: Some(NetworkMode::Xbx),
            ..Default::default()
        };
        let err = feasible_groups(&nodes, &make_group(1, |_| {}), &net, &config).unwrap_err();
        assert!(matches!(err, SchedulerError::NoFeasibleGroups));
        assert!(err.is_unschedulable());
    }

    #[test]
    fn suggestion_fails_when_batch_exceeds_groups() {
        let mut rng = StdRng::seed_from_u64(1);
        let hosts = [
            make_host("ns/a1", "a", None, "XBX"),
            make_host("ns/b1", "b", None, "XBX"),
        ];
        let nodes: Vec<&NodeInfo> = hosts.iter().collect();
        let net = NetworkInfo {
            network_mode: Some(NetworkMode::Xbx),
            ..Default::default()
        };
        let config = SchedulerConfig::default();
        let batch = make_group(3, |_| {});
        let (sc, cluster) = feasible_groups(&nodes, &batch, &net, &config).unwrap();
        let err = suggest_group_ids(&sc, &cluster, 3, &net, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Capacity(CapacityError::InsufficientCapacity(3))
        ));

        let empty = ClusterGroupInfos::from_groups(Vec::new());
        let err = suggest_group_ids(&empty, &empty, 1, &NetworkInfo::default(), &mut rng).unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuggestedGroups));
    }
}
