//! Built-in plugins and the default profile.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleetsched_cache::NodeInfo;
use fleetsched_core::{PlacementUnit, Resources, TopologySpreadConstraint};
use fleetsched_placement::{ScoringWeights, score_node};

use crate::framework::{
    Code, CycleState, FilterPlugin, Plugin, PreFilterPlugin, PreFilterResult, Profile, ScorePlugin,
    Status,
};

/// Requests of `unit` including the pod slot it occupies.
fn unit_footprint(unit: &PlacementUnit) -> Resources {
    Resources {
        pods: 1,
        ..unit.requests
    }
}

fn node_missing() -> Status {
    Status::unresolvable("node not found")
}

// ── NodeResourcesFit ───────────────────────────────────────────

/// Rejects nodes without room for the unit's CPU, memory, GPUs and pod
/// slot.
pub struct NodeResourcesFit;

impl Plugin for NodeResourcesFit {
    fn name(&self) -> &'static str {
        "NodeResourcesFit"
    }
}

impl FilterPlugin for NodeResourcesFit {
    fn filter(&self, _state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Status {
        if node.node().is_none() {
            return node_missing();
        }
        let projected = node.requested + unit_footprint(unit);
        let insufficient = projected.exceeds(&node.allocatable());
        if insufficient.is_empty() {
            return Status::success();
        }
        let reasons = insufficient
            .into_iter()
            .map(|resource| match resource {
                "pods" => "Too many pods".to_string(),
                other => format!("Insufficient {other}"),
            })
            .collect();
        Status::new(Code::Unschedulable, reasons)
    }
}

// ── NodeAffinity ───────────────────────────────────────────────

/// Required affinity as a filter, preferred affinity as a score.
pub struct NodeAffinity;

impl Plugin for NodeAffinity {
    fn name(&self) -> &'static str {
        "NodeAffinity"
    }
}

impl FilterPlugin for NodeAffinity {
    fn filter(&self, _state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Status {
        let Some(node) = node.node() else {
            return node_missing();
        };
        match &unit.required_affinity {
            Some(selector) if !selector.matches(node.labels()) => {
                Status::unresolvable("node(s) didn't match node affinity")
            }
            _ => Status::success(),
        }
    }
}

impl ScorePlugin for NodeAffinity {
    fn score(&self, _state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Result<i64, Status> {
        let node = node.node().ok_or_else(node_missing)?;
        Ok(unit
            .preferred_affinity
            .iter()
            .filter(|term| term.preference.matches(node.labels()))
            .map(|term| term.weight)
            .sum())
    }
}

// ── PodTopologySpread ──────────────────────────────────────────

const TOPOLOGY_SPREAD_STATE: &str = "PreFilterPodTopologySpread";

/// Matching unit counts per topology value, one map per constraint.
struct SpreadCounts {
    constraints: Vec<(TopologySpreadConstraint, BTreeMap<String, i64>)>,
}

/// Keeps matching units within `max_skew` of the least-loaded topology
/// domain.
pub struct PodTopologySpread;

impl Plugin for PodTopologySpread {
    fn name(&self) -> &'static str {
        "PodTopologySpread"
    }
}

impl PreFilterPlugin for PodTopologySpread {
    fn pre_filter(
        &self,
        state: &mut CycleState,
        unit: &PlacementUnit,
        nodes: &[&NodeInfo],
    ) -> (PreFilterResult, Status) {
        if unit.topology_spread.is_empty() {
            return (PreFilterResult::all(), Status::skip());
        }

        let constraints = unit
            .topology_spread
            .iter()
            .map(|constraint| {
                let mut counts: BTreeMap<String, i64> = BTreeMap::new();
                for info in nodes {
                    let Some(node) = info.node() else {
                        continue;
                    };
                    if unit
                        .required_affinity
                        .as_ref()
                        .is_some_and(|s| !s.matches(node.labels()))
                    {
                        continue;
                    }
                    let Some(domain) = node.labels().get(&constraint.topology_key) else {
                        continue;
                    };
                    let matching = info
                        .units
                        .iter()
                        .filter(|u| u.namespace == unit.namespace && constraint.selects(&u.labels))
                        .count() as i64;
                    *counts.entry(domain.clone()).or_default() += matching;
                }
                (constraint.clone(), counts)
            })
            .collect();

        state.write(TOPOLOGY_SPREAD_STATE, SpreadCounts { constraints });
        (PreFilterResult::all(), Status::success())
    }
}

impl FilterPlugin for PodTopologySpread {
    fn filter(&self, state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Status {
        let Some(spread) = state.read::<SpreadCounts>(TOPOLOGY_SPREAD_STATE) else {
            return Status::success();
        };
        let Some(node) = node.node() else {
            return node_missing();
        };

        for (constraint, counts) in &spread.constraints {
            let Some(domain) = node.labels().get(&constraint.topology_key) else {
                return Status::unresolvable(
                    "node(s) didn't match pod topology spread constraints (missing required label)",
                );
            };
            let min = counts.values().copied().min().unwrap_or(0);
            let current = counts.get(domain).copied().unwrap_or(0);
            let self_match = i64::from(constraint.selects(&unit.labels));
            if current + self_match - min > constraint.max_skew {
                return Status::unschedulable("node(s) didn't match pod topology spread constraints");
            }
        }
        Status::success()
    }
}

// ── NodeResourcesAllocation ────────────────────────────────────

/// Scores nodes by how tightly the unit packs onto them.
#[derive(Default)]
pub struct NodeResourcesAllocation {
    weights: ScoringWeights,
}

impl NodeResourcesAllocation {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }
}

impl Plugin for NodeResourcesAllocation {
    fn name(&self) -> &'static str {
        "NodeResourcesAllocation"
    }
}

impl ScorePlugin for NodeResourcesAllocation {
    fn score(&self, _state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Result<i64, Status> {
        if node.node().is_none() {
            return Err(node_missing());
        }
        Ok(score_node(
            &node.allocatable(),
            &node.requested,
            &unit_footprint(unit),
            &self.weights,
        )
        .map_or(0, |s| s.score))
    }
}

/// The profile every unit uses unless it names another scheduler.
pub fn default_profile(name: &str, parallelism: usize) -> Profile {
    let affinity = Arc::new(NodeAffinity);
    let spread = Arc::new(PodTopologySpread);
    Profile::new(name, parallelism)
        .with_pre_filter(spread.clone())
        .with_filter(Arc::new(NodeResourcesFit))
        .with_filter(affinity.clone())
        .with_filter(spread)
        .with_score(affinity)
        .with_score(Arc::new(NodeResourcesAllocation::default()))
}
