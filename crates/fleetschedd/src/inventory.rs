//! Cluster inventories: recorded watch streams replayed into the cache.
//!
//! An inventory file lists every cluster with the events its watchers
//! would deliver. Each cluster gets its own [`ClusterSource`], so loading
//! goes through the same registry, sync barrier and bridge as live
//! watchers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use fleetsched_cache::CapacityCache;
use fleetsched_core::{ClusterKind, SchedulerConfig};
use fleetsched_informer::{CacheBridge, ClusterRegistry, ResourceKind, WatchEvent};

const EVENT_BUFFER: usize = 1024;
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub clusters: Vec<ClusterInventory>,
}

#[derive(Debug, Deserialize)]
pub struct ClusterInventory {
    pub id: String,
    /// Falls back to the kind configured for the cluster.
    #[serde(default)]
    pub kind: Option<ClusterKind>,
    #[serde(default)]
    pub events: Vec<InventoryEvent>,
}

#[derive(Debug, Deserialize)]
pub struct InventoryEvent {
    pub resource: ResourceKind,
    #[serde(flatten)]
    pub event: WatchEvent,
}

impl Inventory {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading inventory {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing inventory {}", path.display()))
    }

    /// Replay every cluster into `cache` and wait until the bridge has
    /// applied all events.
    pub async fn load(self, config: &SchedulerConfig, cache: Arc<CapacityCache>) -> anyhow::Result<()> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let bridge = tokio::spawn(async move {
            CacheBridge::new(cache).run(events_rx, shutdown_rx).await
        });

        let mut registry = ClusterRegistry::new(events_tx);
        let mut sources = Vec::with_capacity(self.clusters.len());
        for cluster in self.clusters {
            let kind = cluster
                .kind
                .or_else(|| {
                    config
                        .clusters
                        .iter()
                        .find(|c| c.id == cluster.id)
                        .map(|c| c.kind)
                })
                .with_context(|| format!("cluster {} has no kind", cluster.id))?;
            let source = registry.register(&cluster.id, kind)?;
            source.mark_started();

            let count = cluster.events.len();
            let mut failed = false;
            for InventoryEvent { resource, event } in cluster.events {
                if !source.resources().contains(&resource) {
                    source.mark_failed(format!("{kind:?} cluster cannot publish {resource:?}"));
                    failed = true;
                    break;
                }
                source.send(resource, event).await?;
            }
            if !failed {
                source.mark_synced();
                debug!(cluster = %cluster.id, events = count, "inventory replayed");
            }
            sources.push(source);
        }

        let synced = registry.wait_for_sync(SYNC_TIMEOUT).await;
        drop(sources);
        drop(registry);
        bridge.await.context("cache bridge task panicked")??;
        synced?;
        info!("inventory loaded");
        Ok(())
    }
}
