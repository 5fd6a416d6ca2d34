//! Cluster registry and startup sync barrier.
//!
//! Each registered cluster gets a [`ClusterSource`] handle through which
//! its watcher publishes events and reports progress. Startup waits until
//! every cluster's informers have started and synced; one failed cluster
//! fails the whole wait.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use fleetsched_core::ClusterKind;

use crate::error::{BridgeError, BridgeResult};
use crate::events::{ClusterEvent, ResourceKind, WatchEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Pending,
    Started,
    Synced,
    Failed(String),
}

struct RegisteredCluster {
    kind: ClusterKind,
    state: watch::Receiver<SyncState>,
}

pub struct ClusterRegistry {
    events: mpsc::Sender<ClusterEvent>,
    clusters: BTreeMap<String, RegisteredCluster>,
}

impl ClusterRegistry {
    pub fn new(events: mpsc::Sender<ClusterEvent>) -> Self {
        Self {
            events,
            clusters: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, cluster_id: &str, kind: ClusterKind) -> BridgeResult<ClusterSource> {
        if self.clusters.contains_key(cluster_id) {
            return Err(BridgeError::DuplicateCluster(cluster_id.to_string()));
        }
        let (state_tx, state_rx) = watch::channel(SyncState::Pending);
        self.clusters.insert(
            cluster_id.to_string(),
            RegisteredCluster {
                kind,
                state: state_rx,
            },
        );
        info!(cluster = %cluster_id, ?kind, "cluster registered");
        Ok(ClusterSource {
            cluster_id: cluster_id.to_string(),
            kind,
            events: self.events.clone(),
            state: state_tx,
        })
    }

    pub fn cluster_ids(&self) -> Vec<String> {
        self.clusters.keys().cloned().collect()
    }

    pub fn kind(&self, cluster_id: &str) -> Option<ClusterKind> {
        self.clusters.get(cluster_id).map(|c| c.kind)
    }

    /// Block until every cluster has started and synced, or fail on the
    /// first cluster that reports failure, closes its source, or exceeds
    /// `timeout`.
    pub async fn wait_for_sync(&self, timeout: Duration) -> BridgeResult<()> {
        for (cluster_id, cluster) in &self.clusters {
            let mut state = cluster.state.clone();
            let fail = |reason: String| BridgeError::SyncFailed {
                cluster: cluster_id.clone(),
                reason,
            };

            let wait = async {
                state
                    .wait_for(|s| *s != SyncState::Pending)
                    .await
                    .map_err(|_| fail("event source closed".into()))?;
                debug!(cluster = %cluster_id, "informers started");
                let reached = state
                    .wait_for(|s| matches!(s, SyncState::Synced | SyncState::Failed(_)))
                    .await
                    .map_err(|_| fail("event source closed".into()))?;
                match &*reached {
                    SyncState::Failed(reason) => Err(fail(reason.clone())),
                    _ => Ok(()),
                }
            };

            tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| fail(format!("timed out after {}s", timeout.as_secs())))??;
            info!(cluster = %cluster_id, "cluster cache synced");
        }
        Ok(())
    }
}

/// Publishing handle for one cluster's watcher.
pub struct ClusterSource {
    cluster_id: String,
    kind: ClusterKind,
    events: mpsc::Sender<ClusterEvent>,
    state: watch::Sender<SyncState>,
}

impl ClusterSource {
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    /// Resource collections this cluster is watched for.
    pub fn resources(&self) -> &'static [ResourceKind] {
        match self.kind {
            ClusterKind::Vm => &[ResourceKind::Nodes, ResourceKind::Pods],
            ClusterKind::Baremetal => &[ResourceKind::BareMetalHosts],
        }
    }

    pub async fn send(&self, resource: ResourceKind, event: WatchEvent) -> BridgeResult<()> {
        self.events
            .send(ClusterEvent::new(&self.cluster_id, resource, event))
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    pub fn mark_started(&self) {
        self.state.send_replace(SyncState::Started);
    }

    pub fn mark_synced(&self) {
        self.state.send_replace(SyncState::Synced);
    }

    pub fn mark_failed(&self, reason: impl Into<String>) {
        self.state.send_replace(SyncState::Failed(reason.into()));
    }
}
