//! Typed watch events flowing from cluster sources into the bridge task.
//!
//! Payloads stay as raw JSON until the bridge decodes them, so a payload
//! of the wrong shape is detected in one place and dropped there.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The resource collection an event was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Nodes,
    Pods,
    BareMetalHosts,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Nodes => "nodes",
            ResourceKind::Pods => "pods",
            ResourceKind::BareMetalHosts => "baremetalhosts",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEvent {
    Added { object: Value },
    Modified { old: Value, object: Value },
    Deleted { object: Value },
}

/// A watch event tagged with the cluster it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    pub cluster_id: String,
    pub resource: ResourceKind,
    pub event: WatchEvent,
}

impl ClusterEvent {
    pub fn new(cluster_id: impl Into<String>, resource: ResourceKind, event: WatchEvent) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            resource,
            event,
        }
    }
}
