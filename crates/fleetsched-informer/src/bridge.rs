//! CacheBridge: the single task that applies cluster events to the cache.
//!
//! Events from every registered cluster arrive on one channel and are
//! applied in order. A payload that fails to decode, or a host whose
//! capacity labels cannot be parsed, costs only that event. A cache
//! corruption report stops the bridge.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use fleetsched_cache::{CacheError, CapacityCache};

use crate::baremetal::BareMetalHost;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{ClusterEvent, ResourceKind, WatchEvent};
use crate::objects::{NodeObject, PodObject};

pub struct CacheBridge {
    cache: Arc<CapacityCache>,
}

impl CacheBridge {
    pub fn new(cache: Arc<CapacityCache>) -> Self {
        Self { cache }
    }

    /// Apply events until the channel closes or shutdown is signalled.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ClusterEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BridgeResult<()> {
        info!("cache bridge started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("cache bridge event channel closed");
                        return Ok(());
                    };
                    if let Err(e) = self.handle(event).await {
                        error!(error = %e, "cache bridge stopping");
                        return Err(e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("cache bridge shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Apply one event. Only a corrupted cache is reported as an error.
    pub async fn handle(&self, event: ClusterEvent) -> BridgeResult<()> {
        let ClusterEvent {
            cluster_id,
            resource,
            event,
        } = event;
        let result = match resource {
            ResourceKind::Nodes => self.handle_node(&cluster_id, event).await,
            ResourceKind::Pods => self.handle_pod(&cluster_id, event).await,
            ResourceKind::BareMetalHosts => self.handle_host(&cluster_id, event).await,
        };
        match result {
            Err(BridgeError::Cache(e @ CacheError::Corrupted { .. })) => Err(BridgeError::Cache(e)),
            Err(e) => {
                warn!(cluster = %cluster_id, %resource, error = %e, "event dropped");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    // ── VM cells ───────────────────────────────────────────────

    async fn handle_node(&self, cluster_id: &str, event: WatchEvent) -> BridgeResult<()> {
        match event {
            WatchEvent::Added { object } => {
                let Some(obj) = decode::<NodeObject>(cluster_id, ResourceKind::Nodes, object) else {
                    return Ok(());
                };
                self.cache.add_node(obj.into_node(cluster_id)).await;
            }
            WatchEvent::Modified { object, .. } => {
                let Some(obj) = decode::<NodeObject>(cluster_id, ResourceKind::Nodes, object) else {
                    return Ok(());
                };
                self.cache.update_node(obj.into_node(cluster_id)).await;
            }
            WatchEvent::Deleted { object } => {
                let Some(obj) = decode::<NodeObject>(cluster_id, ResourceKind::Nodes, object) else {
                    return Ok(());
                };
                let node = obj.into_node(cluster_id);
                self.cache.remove_node(&node.name).await;
            }
        }
        Ok(())
    }

    async fn handle_pod(&self, cluster_id: &str, event: WatchEvent) -> BridgeResult<()> {
        let decode_pod = |v: Value| decode::<PodObject>(cluster_id, ResourceKind::Pods, v);
        let observed = |pod: &PodObject| pod.is_assigned() && !pod.is_terminal();

        match event {
            WatchEvent::Added { object } => {
                let Some(pod) = decode_pod(object) else {
                    return Ok(());
                };
                if observed(&pod) {
                    self.cache.add_unit(pod.into_unit(cluster_id)).await?;
                }
            }
            WatchEvent::Modified { old, object } => {
                let (Some(old), Some(new)) = (decode_pod(old), decode_pod(object)) else {
                    return Ok(());
                };
                match (observed(&old), observed(&new)) {
                    (true, true) => {
                        let old = old.into_unit(cluster_id);
                        self.cache
                            .update_unit(&old, new.into_unit(cluster_id))
                            .await?;
                    }
                    (false, true) => self.cache.add_unit(new.into_unit(cluster_id)).await?,
                    (true, false) => self.cache.remove_unit(&old.into_unit(cluster_id)).await?,
                    (false, false) => {}
                }
            }
            WatchEvent::Deleted { object } => {
                let Some(pod) = decode_pod(object) else {
                    return Ok(());
                };
                // The final state may be stale; clean up regardless.
                self.cache.remove_unit(&pod.into_unit(cluster_id)).await?;
            }
        }
        Ok(())
    }

    // ── Bare-metal cell ────────────────────────────────────────

    async fn handle_host(&self, cluster_id: &str, event: WatchEvent) -> BridgeResult<()> {
        let decode_host =
            |v: Value| decode::<BareMetalHost>(cluster_id, ResourceKind::BareMetalHosts, v);
        match event {
            WatchEvent::Added { object } => {
                if let Some(host) = decode_host(object) {
                    self.add_host(cluster_id, &host).await?;
                }
            }
            WatchEvent::Modified { old, object } => {
                let (Some(old), Some(new)) = (decode_host(old), decode_host(object)) else {
                    return Ok(());
                };
                self.delete_host(cluster_id, &old).await?;
                self.add_host(cluster_id, &new).await?;
            }
            WatchEvent::Deleted { object } => {
                if let Some(host) = decode_host(object) {
                    self.delete_host(cluster_id, &host).await?;
                }
            }
        }
        Ok(())
    }

    async fn add_host(&self, cluster_id: &str, host: &BareMetalHost) -> BridgeResult<()> {
        let node = host.to_node(cluster_id)?;
        let node_name = node.name.clone();

        if host.is_enrolled() {
            let reservation = host.reservation_unit(cluster_id);
            if host.is_available() {
                self.cache.remove_unit(&reservation).await?;
            } else {
                match self.cache.add_unit(reservation).await {
                    Err(CacheError::AlreadyPresent(key)) => {
                        debug!(unit = %key, "host reservation already present");
                    }
                    other => other?,
                }
            }
        }
        self.cache.add_node(node).await;
        debug!(node = %node_name, available = host.is_available(), "host added");
        Ok(())
    }

    async fn delete_host(&self, cluster_id: &str, host: &BareMetalHost) -> BridgeResult<()> {
        let reservation = host.reservation_unit(cluster_id);
        self.cache.remove_unit(&reservation).await?;
        self.cache.remove_node(&host.node_name(cluster_id)).await;
        debug!(node = %host.node_name(cluster_id), "host deleted");
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(cluster_id: &str, resource: ResourceKind, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(obj) => Some(obj),
        Err(e) => {
            warn!(cluster = %cluster_id, %resource, error = %e, "cannot decode event payload");
            None
        }
    }
}
