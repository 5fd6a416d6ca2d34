//! CapacityCache: the shared view of nodes and placement units.
//!
//! Units enter the cache either as observed bindings (`add_unit`) or as
//! optimistic reservations (`assume_unit`). An assumed unit stays visible
//! to every later snapshot until it is confirmed by `add_unit`, released by
//! `forget_unit`, or expires `ttl` after `finish_binding`.
//!
//! Removing an absent node or unit is a no-op.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use fleetsched_core::{Node, PlacementUnit};

use crate::error::{CacheError, CacheResult};
use crate::snapshot::{NodeInfo, Snapshot};

struct UnitState {
    unit: PlacementUnit,
    binding_finished: bool,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct CacheState {
    nodes: BTreeMap<String, NodeInfo>,
    units: HashMap<String, UnitState>,
    assumed: HashSet<String>,
    generation: u64,
}

impl CacheState {
    fn bump(&mut self, node_name: &str) {
        self.generation += 1;
        let generation = self.generation;
        if let Some(info) = self.nodes.get_mut(node_name) {
            info.generation = generation;
        }
    }

    fn add_unit_to_node(&mut self, node_name: &str, unit: PlacementUnit) {
        self.nodes
            .entry(node_name.to_string())
            .or_default()
            .add_unit(unit);
        self.bump(node_name);
    }

    fn remove_unit_from_node(&mut self, node_name: &str, key: &str) {
        let Some(info) = self.nodes.get_mut(node_name) else {
            return;
        };
        if !info.remove_unit(key) {
            warn!(unit = %key, node = %node_name, "unit not recorded on node");
        }
        if info.is_empty() {
            self.nodes.remove(node_name);
            self.generation += 1;
        } else {
            self.bump(node_name);
        }
    }
}

fn bound_node(unit: &PlacementUnit) -> CacheResult<&str> {
    unit.node_name
        .as_deref()
        .ok_or_else(|| CacheError::Unbound(unit.key()))
}

/// Thread-safe in-memory capacity cache.
pub struct CapacityCache {
    ttl: Duration,
    period: Duration,
    state: RwLock<CacheState>,
}

impl CapacityCache {
    /// Create a cache whose finished-binding reservations expire after `ttl`
    /// and are swept every `period`.
    pub fn new(ttl: Duration, period: Duration) -> Self {
        Self {
            ttl,
            period,
            state: RwLock::new(CacheState::default()),
        }
    }

    // ── Nodes ──────────────────────────────────────────────────

    pub async fn add_node(&self, node: Node) {
        let mut state = self.state.write().await;
        let name = node.name.clone();
        state.nodes.entry(name.clone()).or_default().set_node(node);
        state.bump(&name);
        debug!(node = %name, "node added");
    }

    pub async fn update_node(&self, node: Node) {
        let mut state = self.state.write().await;
        let name = node.name.clone();
        state.nodes.entry(name.clone()).or_default().set_node(node);
        state.bump(&name);
        debug!(node = %name, "node updated");
    }

    /// Remove a node. Units still recorded against it keep a ghost entry
    /// until the last of them is removed.
    pub async fn remove_node(&self, node_name: &str) {
        let mut state = self.state.write().await;
        let Some(info) = state.nodes.get_mut(node_name) else {
            debug!(node = %node_name, "remove of absent node ignored");
            return;
        };
        info.clear_node();
        if info.units.is_empty() {
            state.nodes.remove(node_name);
            state.generation += 1;
        } else {
            state.bump(node_name);
        }
        debug!(node = %node_name, "node removed");
    }

    // ── Optimistic reservations ────────────────────────────────

    /// Record `unit` as bound to its `node_name` before the real binding
    /// is observed.
    pub async fn assume_unit(&self, unit: PlacementUnit) -> CacheResult<()> {
        let key = unit.key();
        let node_name = bound_node(&unit)?.to_string();
        let mut state = self.state.write().await;
        if state.units.contains_key(&key) {
            return Err(CacheError::AlreadyPresent(key));
        }
        state.add_unit_to_node(&node_name, unit.clone());
        state.units.insert(
            key.clone(),
            UnitState {
                unit,
                binding_finished: false,
                deadline: None,
            },
        );
        state.assumed.insert(key.clone());
        debug!(unit = %key, node = %node_name, "unit assumed");
        Ok(())
    }

    /// Start the expiry clock of an assumed unit.
    pub async fn finish_binding(&self, key: &str) {
        self.finish_binding_at(key, Instant::now()).await;
    }

    async fn finish_binding_at(&self, key: &str, now: Instant) {
        let mut state = self.state.write().await;
        if !state.assumed.contains(key) {
            debug!(unit = %key, "finish binding for unit that is not assumed");
            return;
        }
        let deadline = now + self.ttl;
        if let Some(entry) = state.units.get_mut(key) {
            entry.binding_finished = true;
            entry.deadline = Some(deadline);
        }
    }

    /// Release an assumed unit. `unit.node_name` must match the node it
    /// was assumed on.
    pub async fn forget_unit(&self, unit: &PlacementUnit) -> CacheResult<()> {
        let key = unit.key();
        let mut state = self.state.write().await;
        let Some(entry) = state.units.get(&key) else {
            return Err(CacheError::NotAssumed(key));
        };
        let cached = entry.unit.node_name.clone().unwrap_or_default();
        if unit.node_name.as_deref() != Some(cached.as_str()) {
            return Err(CacheError::NodeMismatch {
                key,
                cached,
                requested: unit.node_name.clone().unwrap_or_default(),
            });
        }
        if !state.assumed.contains(&key) {
            return Err(CacheError::NotAssumed(key));
        }
        state.remove_unit_from_node(&cached, &key);
        state.units.remove(&key);
        state.assumed.remove(&key);
        debug!(unit = %key, node = %cached, "assumed unit forgotten");
        Ok(())
    }

    // ── Observed units ─────────────────────────────────────────

    /// Record an observed binding, confirming a matching reservation or
    /// re-adding one that already expired.
    pub async fn add_unit(&self, unit: PlacementUnit) -> CacheResult<()> {
        let key = unit.key();
        let node_name = bound_node(&unit)?.to_string();
        let mut state = self.state.write().await;

        let assumed = state.assumed.contains(&key);
        match state.units.get(&key) {
            Some(_) if !assumed => return Err(CacheError::AlreadyPresent(key)),
            Some(entry) => {
                let cached = entry.unit.node_name.clone().unwrap_or_default();
                if cached != node_name {
                    warn!(unit = %key, assumed = %cached, actual = %node_name, "unit bound to a different node than assumed");
                }
                state.remove_unit_from_node(&cached, &key);
                state.assumed.remove(&key);
                debug!(unit = %key, node = %node_name, "assumed unit confirmed");
            }
            None => debug!(unit = %key, node = %node_name, "unit added"),
        }

        state.add_unit_to_node(&node_name, unit.clone());
        state.units.insert(
            key,
            UnitState {
                unit,
                binding_finished: false,
                deadline: None,
            },
        );
        Ok(())
    }

    /// Replace an observed unit. The unit must not move between nodes.
    pub async fn update_unit(&self, old: &PlacementUnit, new: PlacementUnit) -> CacheResult<()> {
        let key = old.key();
        let new_node = bound_node(&new)?.to_string();
        let mut state = self.state.write().await;
        let cached = match state.units.get(&key) {
            Some(entry) if !state.assumed.contains(&key) => {
                entry.unit.node_name.clone().unwrap_or_default()
            }
            _ => return Err(CacheError::NotFound(key)),
        };
        if cached != new_node {
            return Err(CacheError::Corrupted {
                key,
                from: cached,
                to: new_node,
            });
        }
        state.remove_unit_from_node(&cached, &key);
        state.add_unit_to_node(&new_node, new.clone());
        if let Some(entry) = state.units.get_mut(&key) {
            entry.unit = new;
        }
        debug!(unit = %key, node = %new_node, "unit updated");
        Ok(())
    }

    pub async fn remove_unit(&self, unit: &PlacementUnit) -> CacheResult<()> {
        let key = unit.key();
        let mut state = self.state.write().await;
        let Some(entry) = state.units.get(&key) else {
            debug!(unit = %key, "remove of absent unit ignored");
            return Ok(());
        };
        let cached = entry.unit.node_name.clone().unwrap_or_default();
        if let Some(requested) = unit.node_name.as_deref().filter(|n| *n != cached) {
            return Err(CacheError::Corrupted {
                key,
                from: cached,
                to: requested.to_string(),
            });
        }
        state.remove_unit_from_node(&cached, &key);
        state.units.remove(&key);
        state.assumed.remove(&key);
        debug!(unit = %key, node = %cached, "unit removed");
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────

    pub async fn is_assumed(&self, key: &str) -> bool {
        self.state.read().await.assumed.contains(key)
    }

    pub async fn get_unit(&self, key: &str) -> Option<PlacementUnit> {
        self.state
            .read()
            .await
            .units
            .get(key)
            .map(|e| e.unit.clone())
    }

    /// Number of live (non-ghost) nodes.
    pub async fn node_count(&self) -> usize {
        self.state
            .read()
            .await
            .nodes
            .values()
            .filter(|i| i.node().is_some())
            .count()
    }

    pub async fn unit_count(&self) -> usize {
        self.state.read().await.units.len()
    }

    /// Bring `snapshot` up to date, copying only node entries whose
    /// generation advanced since the previous refresh.
    pub async fn update_snapshot(&self, snapshot: &mut Snapshot) {
        let state = self.state.read().await;
        if snapshot.generation == state.generation && snapshot.generation > 0 {
            return;
        }

        let mut membership_changed = false;
        for (name, info) in &state.nodes {
            if info.generation <= snapshot.generation && snapshot.node_infos.contains_key(name) {
                continue;
            }
            if info.node().is_some() {
                membership_changed |= snapshot
                    .node_infos
                    .insert(name.clone(), info.clone())
                    .is_none();
            } else {
                membership_changed |= snapshot.node_infos.remove(name).is_some();
            }
        }

        let before = snapshot.node_infos.len();
        snapshot
            .node_infos
            .retain(|name, _| state.nodes.get(name).is_some_and(|i| i.node().is_some()));
        membership_changed |= before != snapshot.node_infos.len();

        if membership_changed || snapshot.node_list.len() != snapshot.node_infos.len() {
            snapshot.node_list = state
                .nodes
                .iter()
                .filter(|(_, i)| i.node().is_some())
                .map(|(name, _)| name.clone())
                .collect();
        }
        snapshot.generation = state.generation;
    }

    // ── Expiry ─────────────────────────────────────────────────

    /// Drop finished-binding reservations whose deadline passed before
    /// `now`. Returns the number expired.
    pub async fn cleanup_assumed_units(&self, now: Instant) -> usize {
        let mut state = self.state.write().await;
        let expired: Vec<(String, String)> = state
            .assumed
            .iter()
            .filter_map(|key| {
                let entry = state.units.get(key)?;
                let due = entry.binding_finished && entry.deadline.is_some_and(|d| now > d);
                due.then(|| (key.clone(), entry.unit.node_name.clone().unwrap_or_default()))
            })
            .collect();

        for (key, node_name) in &expired {
            warn!(unit = %key, node = %node_name, "assumed unit expired");
            state.remove_unit_from_node(node_name, key);
            state.units.remove(key);
            state.assumed.remove(key);
        }
        expired.len()
    }

    /// Sweep expired reservations every `period` until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            ttl_secs = self.ttl.as_secs(),
            period_ms = self.period.as_millis() as u64,
            "assumed unit expiry started"
        );
        let mut interval = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let expired = self.cleanup_assumed_units(Instant::now()).await;
                    if expired > 0 {
                        debug!(expired, "expired assumed units");
                    }
                }
                _ = shutdown.changed() => {
                    info!("assumed unit expiry shutting down");
                    break;
                }
            }
        }
    }

    /// Log every node with its units, then every assumed unit.
    pub async fn dump(&self) {
        let state = self.state.read().await;
        info!(
            nodes = state.nodes.len(),
            units = state.units.len(),
            assumed = state.assumed.len(),
            "cache dump"
        );
        for (name, info) in &state.nodes {
            let units: Vec<String> = info.units.iter().map(PlacementUnit::key).collect();
            info!(
                node = %name,
                ghost = info.node().is_none(),
                milli_cpu = info.requested.milli_cpu,
                memory = info.requested.memory,
                gpu = info.requested.gpu,
                units = ?units,
                "cache node"
            );
        }
        for key in &state.assumed {
            if let Some(entry) = state.units.get(key) {
                info!(
                    unit = %key,
                    node = entry.unit.node_name.as_deref().unwrap_or_default(),
                    binding_finished = entry.binding_finished,
                    "assumed unit"
                );
            }
        }
    }
}
