//! fleetsched-informer: per-cluster change streams into the capacity cache.
//!
//! VM cells publish node and pod events; the bare-metal cell publishes
//! BareMetalHost events, translated here into synthetic nodes and
//! reservation units. All names are cluster-qualified before they reach
//! the cache.
//!
//! # Architecture
//!
//! ```text
//! ClusterSource (per cluster) ──┐
//! ClusterSource (per cluster) ──┼── mpsc<ClusterEvent> ──► CacheBridge ──► CapacityCache
//! ClusterSource (per cluster) ──┘
//!
//! ClusterRegistry::wait_for_sync: started + synced for every cluster
//! ```

pub mod baremetal;
pub mod bridge;
pub mod error;
pub mod events;
pub mod objects;
pub mod registry;

pub use baremetal::BareMetalHost;
pub use bridge::CacheBridge;
pub use error::{BridgeError, BridgeResult};
pub use events::{ClusterEvent, ResourceKind, WatchEvent};
pub use objects::{NodeObject, PodObject};
pub use registry::{ClusterRegistry, ClusterSource, SyncState};
