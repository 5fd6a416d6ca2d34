//! Plugin framework seam.
//!
//! The scheduling pipeline never inspects plugin internals; it runs the
//! extension points of a [`Framework`] and acts on the returned
//! [`Status`] verdicts. [`Profile`] is the stock implementation holding
//! boxed plugins per extension point.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use fleetsched_cache::NodeInfo;
use fleetsched_core::PlacementUnit;

use crate::error::SchedulerError;

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Success,
    Error,
    Unschedulable,
    /// Unschedulable, and no preemption on this node could change that.
    UnschedulableAndUnresolvable,
    Skip,
}

/// Verdict of one plugin, or of one extension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    reasons: Vec<String>,
    plugin: Option<String>,
}

impl Status {
    pub fn new(code: Code, reasons: Vec<String>) -> Self {
        Self {
            code,
            reasons,
            plugin: None,
        }
    }

    pub fn success() -> Self {
        Self::new(Code::Success, Vec::new())
    }

    pub fn skip() -> Self {
        Self::new(Code::Skip, Vec::new())
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(Code::Error, vec![reason.into()])
    }

    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self::new(Code::Unschedulable, vec![reason.into()])
    }

    pub fn unresolvable(reason: impl Into<String>) -> Self {
        Self::new(Code::UnschedulableAndUnresolvable, vec![reason.into()])
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    pub fn is_skip(&self) -> bool {
        self.code == Code::Skip
    }

    pub fn is_unschedulable(&self) -> bool {
        matches!(
            self.code,
            Code::Unschedulable | Code::UnschedulableAndUnresolvable
        )
    }

    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }

    pub fn into_error(self) -> SchedulerError {
        SchedulerError::Plugin {
            plugin: self.plugin.clone().unwrap_or_default(),
            reason: self.message(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{:?} ({plugin}): {}", self.code, self.message()),
            None => write!(f, "{:?}: {}", self.code, self.message()),
        }
    }
}

/// Filter verdicts of every node that did not pass, keyed by node name.
pub type NodeToStatusMap = BTreeMap<String, Status>;

/// Why a unit could not be placed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnosis {
    pub node_to_status: NodeToStatusMap,
    pub unschedulable_plugins: BTreeSet<String>,
    pub pre_filter_message: Option<String>,
}

impl Diagnosis {
    pub fn record(&mut self, node_name: impl Into<String>, status: Status) {
        if let Some(plugin) = status.plugin() {
            self.unschedulable_plugins.insert(plugin.to_string());
        }
        self.node_to_status.insert(node_name.into(), status);
    }

    /// Reason histogram, e.g. `2 Insufficient cpu, 1 node(s) didn't match
    /// node affinity`.
    pub fn summary(&self) -> String {
        if let Some(message) = &self.pre_filter_message {
            return message.clone();
        }
        let mut histogram: BTreeMap<&str, usize> = BTreeMap::new();
        for status in self.node_to_status.values() {
            for reason in status.reasons() {
                *histogram.entry(reason.as_str()).or_default() += 1;
            }
        }
        histogram
            .iter()
            .map(|(reason, count)| format!("{count} {reason}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// No node is feasible for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("0/{} nodes are available for {}: {}", .num_all_nodes, .unit, .diagnosis.summary())]
pub struct FitError {
    pub unit: String,
    pub num_all_nodes: usize,
    pub diagnosis: Diagnosis,
}

// ── Cycle state ────────────────────────────────────────────────

/// Scratch space shared by the plugins of one scheduling cycle.
#[derive(Default)]
pub struct CycleState {
    data: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.data.insert(key, Box::new(value));
    }

    pub fn read<T: Any + Send + Sync>(&self, key: &'static str) -> Option<&T> {
        self.data.get(key)?.downcast_ref::<T>()
    }
}

/// Nodes a pre-filter plugin narrowed the search to; `None` is all nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreFilterResult {
    pub node_names: Option<BTreeSet<String>>,
}

impl PreFilterResult {
    pub fn all() -> Self {
        Self::default()
    }

    fn merge(self, other: PreFilterResult) -> PreFilterResult {
        let node_names = match (self.node_names, other.node_names) {
            (None, names) | (names, None) => names,
            (Some(a), Some(b)) => Some(a.intersection(&b).cloned().collect()),
        };
        PreFilterResult { node_names }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePluginScores {
    pub name: String,
    pub total_score: i64,
}

// ── Plugins ────────────────────────────────────────────────────

pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;
}

pub trait PreFilterPlugin: Plugin {
    fn pre_filter(
        &self,
        state: &mut CycleState,
        unit: &PlacementUnit,
        nodes: &[&NodeInfo],
    ) -> (PreFilterResult, Status);
}

pub trait FilterPlugin: Plugin {
    fn filter(&self, state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Status;
}

pub trait ScorePlugin: Plugin {
    fn score(&self, state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Result<i64, Status>;

    fn weight(&self) -> i64 {
        1
    }
}

pub trait ReservePlugin: Plugin {
    fn reserve(&self, state: &mut CycleState, unit: &PlacementUnit, node_name: &str) -> Status;

    fn unreserve(&self, state: &mut CycleState, unit: &PlacementUnit, node_name: &str);
}

pub trait PostFilterPlugin: Plugin {
    /// May nominate a node on which the unit could fit later.
    fn post_filter(
        &self,
        state: &CycleState,
        unit: &PlacementUnit,
        statuses: &NodeToStatusMap,
    ) -> (Option<String>, Status);
}

// ── Framework ──────────────────────────────────────────────────

/// The extension points a scheduling cycle runs.
pub trait Framework: Send + Sync {
    fn profile_name(&self) -> &str;

    /// Upper bound on concurrent filter evaluations.
    fn parallelism(&self) -> usize;

    fn has_filter_plugins(&self) -> bool;

    fn has_score_plugins(&self) -> bool;

    fn run_pre_filter_plugins(
        &self,
        state: &mut CycleState,
        unit: &PlacementUnit,
        nodes: &[&NodeInfo],
    ) -> (PreFilterResult, Status);

    fn run_filter_plugins(&self, state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Status;

    /// Units nominated to a node are assumed into the cache before they
    /// bind, so the node info already accounts for them.
    fn run_filter_plugins_with_nominated_units(
        &self,
        state: &CycleState,
        unit: &PlacementUnit,
        node: &NodeInfo,
    ) -> Status {
        self.run_filter_plugins(state, unit, node)
    }

    fn run_score_plugins(
        &self,
        state: &CycleState,
        unit: &PlacementUnit,
        nodes: &[&NodeInfo],
    ) -> Result<Vec<NodePluginScores>, Status>;

    fn run_reserve_plugins_reserve(
        &self,
        state: &mut CycleState,
        unit: &PlacementUnit,
        node_name: &str,
    ) -> Status;

    fn run_reserve_plugins_unreserve(&self, state: &mut CycleState, unit: &PlacementUnit, node_name: &str);

    fn run_post_filter_plugins(
        &self,
        state: &CycleState,
        unit: &PlacementUnit,
        statuses: &NodeToStatusMap,
    ) -> (Option<String>, Status);
}

/// A named set of plugins per extension point.
pub struct Profile {
    name: String,
    parallelism: usize,
    pre_filter: Vec<Arc<dyn PreFilterPlugin>>,
    filter: Vec<Arc<dyn FilterPlugin>>,
    score: Vec<Arc<dyn ScorePlugin>>,
    reserve: Vec<Arc<dyn ReservePlugin>>,
    post_filter: Vec<Arc<dyn PostFilterPlugin>>,
}

impl Profile {
    pub fn new(name: impl Into<String>, parallelism: usize) -> Self {
        Self {
            name: name.into(),
            parallelism: parallelism.max(1),
            pre_filter: Vec::new(),
            filter: Vec::new(),
            score: Vec::new(),
            reserve: Vec::new(),
            post_filter: Vec::new(),
        }
    }

    pub fn with_pre_filter(mut self, plugin: Arc<dyn PreFilterPlugin>) -> Self {
        self.pre_filter.push(plugin);
        self
    }

    pub fn with_filter(mut self, plugin: Arc<dyn FilterPlugin>) -> Self {
        self.filter.push(plugin);
        self
    }

    pub fn with_score(mut self, plugin: Arc<dyn ScorePlugin>) -> Self {
        self.score.push(plugin);
        self
    }

    pub fn with_reserve(mut self, plugin: Arc<dyn ReservePlugin>) -> Self {
        self.reserve.push(plugin);
        self
    }

    pub fn with_post_filter(mut self, plugin: Arc<dyn PostFilterPlugin>) -> Self {
        self.post_filter.push(plugin);
        self
    }
}

impl Framework for Profile {
    fn profile_name(&self) -> &str {
        &self.name
    }

    fn parallelism(&self) -> usize {
        self.parallelism
    }

    fn has_filter_plugins(&self) -> bool {
        !self.filter.is_empty()
    }

    fn has_score_plugins(&self) -> bool {
        !self.score.is_empty()
    }

    fn run_pre_filter_plugins(
        &self,
        state: &mut CycleState,
        unit: &PlacementUnit,
        nodes: &[&NodeInfo],
    ) -> (PreFilterResult, Status) {
        let mut merged = PreFilterResult::all();
        for plugin in &self.pre_filter {
            let (result, status) = plugin.pre_filter(state, unit, nodes);
            if status.is_skip() {
                continue;
            }
            if !status.is_success() {
                return (PreFilterResult::all(), status.with_plugin(plugin.name()));
            }
            merged = merged.merge(result);
            if merged.node_names.as_ref().is_some_and(BTreeSet::is_empty) {
                return (
                    merged,
                    Status::unresolvable("node(s) didn't satisfy plugin(s) pre-filter")
                        .with_plugin(plugin.name()),
                );
            }
        }
        (merged, Status::success())
    }

    fn run_filter_plugins(&self, state: &CycleState, unit: &PlacementUnit, node: &NodeInfo) -> Status {
        for plugin in &self.filter {
            let status = plugin.filter(state, unit, node);
            if !status.is_success() && !status.is_skip() {
                return status.with_plugin(plugin.name());
            }
        }
        Status::success()
    }

    fn run_score_plugins(
        &self,
        state: &CycleState,
        unit: &PlacementUnit,
        nodes: &[&NodeInfo],
    ) -> Result<Vec<NodePluginScores>, Status> {
        let mut totals: Vec<NodePluginScores> = nodes
            .iter()
            .map(|info| NodePluginScores {
                name: info.node().map(|n| n.name.clone()).unwrap_or_default(),
                total_score: 0,
            })
            .collect();
        for plugin in &self.score {
            for (info, total) in nodes.iter().zip(totals.iter_mut()) {
                let score = plugin
                    .score(state, unit, info)
                    .map_err(|status| status.with_plugin(plugin.name()))?;
                total.total_score += score * plugin.weight();
            }
        }
        Ok(totals)
    }

    fn run_reserve_plugins_reserve(
        &self,
        state: &mut CycleState,
        unit: &PlacementUnit,
        node_name: &str,
    ) -> Status {
        for plugin in &self.reserve {
            let status = plugin.reserve(state, unit, node_name);
            if !status.is_success() {
                return status.with_plugin(plugin.name());
            }
        }
        Status::success()
    }

    fn run_reserve_plugins_unreserve(&self, state: &mut CycleState, unit: &PlacementUnit, node_name: &str) {
        for plugin in self.reserve.iter().rev() {
            plugin.unreserve(state, unit, node_name);
        }
    }

    fn run_post_filter_plugins(
        &self,
        state: &CycleState,
        unit: &PlacementUnit,
        statuses: &NodeToStatusMap,
    ) -> (Option<String>, Status) {
        let mut last = Status::unschedulable("no post-filter plugin could make the unit schedulable");
        for plugin in &self.post_filter {
            let (nominated, status) = plugin.post_filter(state, unit, statuses);
            if status.is_success() {
                return (nominated, status);
            }
            debug!(unit = %unit.key(), plugin = plugin.name(), %status, "post-filter failed");
            last = status.with_plugin(plugin.name());
        }
        (None, last)
    }
}
