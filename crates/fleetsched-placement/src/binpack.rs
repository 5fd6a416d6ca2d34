//! Bin-packing narrowing of feasible bare-metal hosts.
//!
//! Ungrouped hosts are consumed before grouped ones, and among groups big
//! enough for the remaining request the one with the least capacity wins,
//! so large groups stay whole for large requests.

use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use fleetsched_core::{NetworkMode, Node, PlacementUnit};

use crate::group::{ClusterGroupInfos, GroupOptions, min_current_cap_filter};

/// Narrow `feasible` for `unit`, which is followed by `requested_size - 1`
/// more units of the same batch. May return an empty list when no group is
/// large enough.
pub fn binpack<R: Rng + ?Sized>(
    unit: &PlacementUnit,
    feasible: Vec<Arc<Node>>,
    requested_size: usize,
    rng: &mut R,
) -> Vec<Arc<Node>> {
    if !unit.is_bare_metal() || unit.network_mode == Some(NetworkMode::Xbx) {
        return feasible;
    }

    let singles: Vec<Arc<Node>> = feasible
        .iter()
        .filter(|n| n.traits().cluster_group_id.is_none())
        .cloned()
        .collect();
    if !singles.is_empty() {
        debug!(unit = %unit.key(), singles = singles.len(), "bin-packing onto ungrouped hosts");
        return singles;
    }

    let infos = ClusterGroupInfos::build(
        feasible,
        GroupOptions::new().with_filter(min_current_cap_filter(requested_size)),
    );
    match infos.find_group_with_least_cap(&[], rng) {
        Ok(group) => {
            debug!(unit = %unit.key(), group = %group.id, current_cap = group.current_cap, "bin-packing onto group");
            group.nodes().cloned().collect()
        }
        Err(err) => {
            debug!(unit = %unit.key(), requested_size, error = %err, "no group fits batch");
            Vec::new()
        }
    }
}
