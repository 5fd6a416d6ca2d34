//! Group capacity model.
//!
//! Nodes are aggregated into single-tenant cluster groups, and cluster
//! groups into multi-tenant supercompute groups (one nesting level). Each
//! group tracks how many member nodes exist (`max_cap`) and how many are
//! usable right now (`current_cap`). Counters move incrementally as nodes
//! are added and removed.
//!
//! An index is rebuilt from a fresh snapshot for every decision that needs
//! group semantics; it is owned by that decision and never shared.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::debug;

use fleetsched_core::{NetworkMode, Node, NodeSelector};

use crate::error::CapacityError;

// ── Membership ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    Cluster,
    SuperCompute,
}

/// One group a node belongs to, as resolved by a [`GroupIdentifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub id: String,
    pub group_type: GroupType,
    /// Supercompute group nesting this cluster group.
    pub parent: Option<String>,
}

/// Resolves the groups a node belongs to.
pub type GroupIdentifier = fn(&Node) -> Vec<Membership>;

/// Groups nodes by cluster group only.
pub fn cluster_group_identifier(node: &Node) -> Vec<Membership> {
    node.traits()
        .cluster_group_id
        .iter()
        .map(|id| Membership {
            id: id.clone(),
            group_type: GroupType::Cluster,
            parent: None,
        })
        .collect()
}

/// Groups nodes by cluster group and by the supercompute group nesting it.
pub fn supercompute_group_identifier(node: &Node) -> Vec<Membership> {
    let traits = node.traits();
    let mut memberships = Vec::with_capacity(2);
    if let Some(id) = &traits.cluster_group_id {
        memberships.push(Membership {
            id: id.clone(),
            group_type: GroupType::Cluster,
            parent: traits.supercompute_group_id.clone(),
        });
    }
    if let Some(id) = &traits.supercompute_group_id {
        memberships.push(Membership {
            id: id.clone(),
            group_type: GroupType::SuperCompute,
            parent: None,
        });
    }
    memberships
}

// ── Unavailability ─────────────────────────────────────────────

/// Per-reason counts of member nodes that cannot take a new tenant.
/// `unavailable` counts nodes, not reasons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnavailableCounts {
    pub cordoned: usize,
    pub unverified: usize,
    pub assigned: usize,
    pub filtered: usize,
    pub unavailable: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Reasons {
    cordoned: bool,
    unverified: bool,
    assigned: bool,
    filtered: bool,
}

impl Reasons {
    fn of(node: &Node, selector: Option<&NodeSelector>) -> Self {
        let traits = node.traits();
        Reasons {
            cordoned: traits.unschedulable,
            unverified: !traits.verified,
            assigned: traits.assigned,
            filtered: selector.is_some_and(|s| !s.matches(node.labels())),
        }
    }

    fn any(&self) -> bool {
        self.cordoned || self.unverified || self.assigned || self.filtered
    }
}

impl UnavailableCounts {
    fn record(&mut self, reasons: Reasons) {
        self.cordoned += usize::from(reasons.cordoned);
        self.unverified += usize::from(reasons.unverified);
        self.assigned += usize::from(reasons.assigned);
        self.filtered += usize::from(reasons.filtered);
        self.unavailable += usize::from(reasons.any());
    }

    fn release(&mut self, reasons: Reasons) {
        self.cordoned -= usize::from(reasons.cordoned);
        self.unverified -= usize::from(reasons.unverified);
        self.assigned -= usize::from(reasons.assigned);
        self.filtered -= usize::from(reasons.filtered);
        self.unavailable -= usize::from(reasons.any());
    }

    fn subtract(&mut self, other: &UnavailableCounts) {
        self.cordoned = self.cordoned.saturating_sub(other.cordoned);
        self.unverified = self.unverified.saturating_sub(other.unverified);
        self.assigned = self.assigned.saturating_sub(other.assigned);
        self.filtered = self.filtered.saturating_sub(other.filtered);
        self.unavailable = self.unavailable.saturating_sub(other.unavailable);
    }
}

// ── Groups ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum GroupKind {
    Cluster,
    /// Child cluster groups, keyed by id.
    SuperCompute {
        children: BTreeMap<String, ClusterGroup>,
    },
}

#[derive(Debug, Clone)]
pub struct ClusterGroup {
    pub id: String,
    pub kind: GroupKind,
    pub network_mode: Option<NetworkMode>,
    pub max_cap: usize,
    pub current_cap: usize,
    pub unavailable: UnavailableCounts,
    /// At least one member node is tenant-assigned.
    pub assigned: bool,
    /// Member nodes disagree on network mode.
    pub invalid: bool,
    pub parent: Option<String>,
    nodes: BTreeMap<String, Arc<Node>>,
}

impl ClusterGroup {
    pub fn new(id: impl Into<String>, group_type: GroupType) -> Self {
        let kind = match group_type {
            GroupType::Cluster => GroupKind::Cluster,
            GroupType::SuperCompute => GroupKind::SuperCompute {
                children: BTreeMap::new(),
            },
        };
        Self {
            id: id.into(),
            kind,
            network_mode: None,
            max_cap: 0,
            current_cap: 0,
            unavailable: UnavailableCounts::default(),
            assigned: false,
            invalid: false,
            parent: None,
            nodes: BTreeMap::new(),
        }
    }

    pub fn group_type(&self) -> GroupType {
        match self.kind {
            GroupKind::Cluster => GroupType::Cluster,
            GroupKind::SuperCompute { .. } => GroupType::SuperCompute,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, ClusterGroup>> {
        match &self.kind {
            GroupKind::SuperCompute { children } => Some(children),
            GroupKind::Cluster => None,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values()
    }

    pub fn node_names(&self) -> BTreeSet<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, node_name: &str) -> bool {
        self.nodes.contains_key(node_name)
    }

    fn add_node(&mut self, node: Arc<Node>, selector: Option<&NodeSelector>) {
        if self.nodes.contains_key(&node.name) {
            return;
        }
        // Unlabelled nodes take no part in the network mode check.
        if let Some(node_mode) = &node.traits().network_mode {
            match &self.network_mode {
                None => self.network_mode = Some(node_mode.clone()),
                Some(mode) if mode != node_mode => {
                    debug!(group = %self.id, node = %node.name, "conflicting network mode");
                    self.invalid = true;
                }
                Some(_) => {}
            }
        }

        let reasons = Reasons::of(&node, selector);
        self.unavailable.record(reasons);
        self.max_cap += 1;
        if !reasons.any() {
            self.current_cap += 1;
        }
        self.assigned = self.unavailable.assigned > 0;
        self.nodes.insert(node.name.clone(), node);
    }

    fn remove_node(&mut self, node_name: &str, selector: Option<&NodeSelector>) -> bool {
        let Some(node) = self.nodes.remove(node_name) else {
            return false;
        };
        let reasons = Reasons::of(&node, selector);
        self.unavailable.release(reasons);
        self.max_cap -= 1;
        if !reasons.any() {
            self.current_cap -= 1;
        }
        self.assigned = self.unavailable.assigned > 0;
        true
    }

    /// Take a child's nodes and counters out of this group.
    fn subtract(&mut self, child: &ClusterGroup) {
        self.max_cap = self.max_cap.saturating_sub(child.max_cap);
        self.current_cap = self.current_cap.saturating_sub(child.current_cap);
        self.unavailable.subtract(&child.unavailable);
        self.assigned = self.unavailable.assigned > 0;
        for name in child.nodes.keys() {
            self.nodes.remove(name);
        }
    }
}

// ── Filters ────────────────────────────────────────────────────

/// Keeps a group when it returns true.
pub type GroupFilter = Box<dyn Fn(&ClusterGroup) -> bool + Send + Sync>;

pub fn network_mode_filter(mode: NetworkMode) -> GroupFilter {
    Box::new(move |group| group.network_mode.as_ref() == Some(&mode))
}

pub fn min_current_cap_filter(min: usize) -> GroupFilter {
    Box::new(move |group| group.current_cap >= min)
}

/// Construction options for [`ClusterGroupInfos::build`].
pub struct GroupOptions {
    identifier: GroupIdentifier,
    selector: Option<NodeSelector>,
    filters: Vec<GroupFilter>,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            identifier: cluster_group_identifier,
            selector: None,
            filters: Vec::new(),
        }
    }
}

impl GroupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identifier(mut self, identifier: GroupIdentifier) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_node_selector(mut self, selector: NodeSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_filter(mut self, filter: GroupFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

// ── Index ──────────────────────────────────────────────────────

/// Index of groups built from a node list.
#[derive(Debug)]
pub struct ClusterGroupInfos {
    groups: BTreeMap<String, ClusterGroup>,
    identifier: GroupIdentifier,
    selector: Option<NodeSelector>,
}

impl ClusterGroupInfos {
    /// Index `nodes`, then drop invalid groups and groups rejected by any
    /// filter.
    pub fn build(nodes: impl IntoIterator<Item = Arc<Node>>, options: GroupOptions) -> Self {
        let GroupOptions {
            identifier,
            selector,
            filters,
        } = options;
        let mut infos = Self {
            groups: BTreeMap::new(),
            identifier,
            selector,
        };
        for node in nodes {
            infos.add_node(node);
        }
        infos.groups.retain(|id, group| {
            if group.invalid {
                debug!(group = %id, "dropping group with conflicting network modes");
                return false;
            }
            let keep = filters.iter().all(|f| f(group));
            if !keep {
                debug!(group = %id, current_cap = group.current_cap, "group filtered out");
            }
            keep
        });
        infos
    }

    /// An index holding exactly `groups`.
    pub fn from_groups(groups: impl IntoIterator<Item = ClusterGroup>) -> Self {
        Self {
            groups: groups.into_iter().map(|g| (g.id.clone(), g)).collect(),
            identifier: cluster_group_identifier,
            selector: None,
        }
    }

    pub fn add_node(&mut self, node: Arc<Node>) {
        let memberships = (self.identifier)(&node);
        let selector = self.selector.as_ref();

        for m in &memberships {
            let group = self
                .groups
                .entry(m.id.clone())
                .or_insert_with(|| ClusterGroup::new(m.id.clone(), m.group_type));
            if m.parent.is_some() {
                group.parent = m.parent.clone();
            }
            group.add_node(node.clone(), selector);
        }

        for m in &memberships {
            let Some(parent_id) = &m.parent else {
                continue;
            };
            let Some(GroupKind::SuperCompute { children }) =
                self.groups.get_mut(parent_id).map(|p| &mut p.kind)
            else {
                continue;
            };
            let child = children.entry(m.id.clone()).or_insert_with(|| {
                let mut child = ClusterGroup::new(m.id.clone(), GroupType::Cluster);
                child.parent = Some(parent_id.clone());
                child
            });
            child.add_node(node.clone(), selector);
        }
    }

    /// Remove a node from every group; groups left empty are dropped.
    pub fn remove_node(&mut self, node_name: &str) {
        let selector = self.selector.as_ref();
        for group in self.groups.values_mut() {
            group.remove_node(node_name, selector);
            if let GroupKind::SuperCompute { children } = &mut group.kind {
                for child in children.values_mut() {
                    child.remove_node(node_name, selector);
                }
                children.retain(|_, c| c.max_cap > 0);
            }
        }
        self.groups.retain(|_, g| g.max_cap > 0);
    }

    /// Detach a child from a supercompute group, removing its capacity.
    pub fn delete_sub_group(&mut self, parent_id: &str, child_id: &str) {
        let Some(parent) = self.groups.get_mut(parent_id) else {
            return;
        };
        let GroupKind::SuperCompute { children } = &mut parent.kind else {
            return;
        };
        if let Some(child) = children.remove(child_id) {
            parent.subtract(&child);
            debug!(parent = %parent_id, child = %child_id, current_cap = parent.current_cap, "sub-group removed");
        }
    }

    /// The children of a supercompute group as an index of their own.
    pub fn sub_groups(&self, parent_id: &str) -> ClusterGroupInfos {
        let children = self
            .groups
            .get(parent_id)
            .and_then(ClusterGroup::children)
            .map(|c| c.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        ClusterGroupInfos::from_groups(children)
    }

    pub fn insert(&mut self, group: ClusterGroup) {
        self.groups.insert(group.id.clone(), group);
    }

    pub fn get(&self, id: &str) -> Option<&ClusterGroup> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &ClusterGroup> {
        self.groups.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn usable_by_cap(&self, descending: bool) -> Vec<&ClusterGroup> {
        let mut groups: Vec<&ClusterGroup> =
            self.groups.values().filter(|g| g.current_cap > 0).collect();
        if descending {
            groups.sort_by(|a, b| b.current_cap.cmp(&a.current_cap).then_with(|| a.id.cmp(&b.id)));
        } else {
            groups.sort_by(|a, b| a.current_cap.cmp(&b.current_cap).then_with(|| a.id.cmp(&b.id)));
        }
        groups
    }

    /// Choose groups whose combined current capacity covers
    /// `requested_size` while wasting as few nodes as the greedy search
    /// allows.
    ///
    /// Preferred groups are taken whole, in the given order. Remaining
    /// groups are taken largest first while they fit the remainder; if the
    /// remainder is still open, the smallest group that was too large closes
    /// it, possibly replacing the whole selection or its last member when
    /// that wastes fewer nodes.
    pub fn find_groups(
        &self,
        requested_size: usize,
        preferred: &[String],
    ) -> Result<Vec<String>, CapacityError> {
        if requested_size == 0 {
            return Ok(Vec::new());
        }
        let requested = requested_size as i64;
        let groups = self.usable_by_cap(true);
        let cap = |g: &ClusterGroup| g.current_cap as i64;
        let ids = |selected: &[&ClusterGroup]| selected.iter().map(|g| g.id.clone()).collect();

        let mut remaining = requested;
        let mut selected: Vec<&ClusterGroup> = Vec::new();

        for id in preferred {
            if let Some(group) = groups.iter().find(|g| g.id == *id) {
                selected.push(group);
                remaining -= cap(group);
                if remaining < 0 {
                    return Ok(ids(&selected));
                }
            }
            if remaining == 0 {
                return Ok(ids(&selected));
            }
        }

        let mut unfit: Vec<&ClusterGroup> = Vec::new();
        for group in groups.iter().filter(|g| !preferred.contains(&g.id)) {
            if cap(group) <= remaining {
                selected.push(group);
                remaining -= cap(group);
            } else {
                unfit.push(group);
            }
            if remaining == 0 {
                return Ok(ids(&selected));
            }
        }

        if remaining > 0 {
            if let Some(&last_unfit) = unfit.last() {
                let unfit_cap = cap(last_unfit);
                if remaining <= unfit_cap {
                    let unused = unfit_cap - remaining;

                    // The single unfit group alone.
                    let alone = unfit_cap - requested;
                    if alone >= 0 && alone < unused {
                        return Ok(vec![last_unfit.id.clone()]);
                    }

                    // Give back the last selected group.
                    if let Some(&last_selected) = selected.last() {
                        let swapped = unfit_cap - (remaining + cap(last_selected));
                        if swapped >= 0 && swapped < unused {
                            selected.pop();
                            remaining += cap(last_selected);
                        }
                    }

                    selected.push(last_unfit);
                    remaining -= unfit_cap;
                    if remaining <= 0 {
                        return Ok(ids(&selected));
                    }
                }
            }
            return Err(CapacityError::InsufficientCapacity(requested_size));
        }
        Ok(ids(&selected))
    }

    /// The usable group with the least current capacity, restricted to
    /// `preferred` when any of them exist. Ties are broken at random.
    pub fn find_group_with_least_cap<R: Rng + ?Sized>(
        &self,
        preferred: &[String],
        rng: &mut R,
    ) -> Result<&ClusterGroup, CapacityError> {
        if self.groups.is_empty() {
            return Err(CapacityError::NoGroups);
        }
        let mut candidates = self.usable_by_cap(false);
        let preferred_candidates: Vec<&ClusterGroup> = candidates
            .iter()
            .filter(|g| preferred.contains(&g.id))
            .copied()
            .collect();
        if !preferred_candidates.is_empty() {
            candidates = preferred_candidates;
        }

        let Some(least) = candidates.first().map(|g| g.current_cap) else {
            return Err(CapacityError::NoGroups);
        };
        let ties: Vec<&ClusterGroup> = candidates
            .into_iter()
            .take_while(|g| g.current_cap == least)
            .collect();
        ties.choose(rng).copied().ok_or(CapacityError::NoGroups)
    }
}
