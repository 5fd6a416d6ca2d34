//! fleetsched-cache: the shared capacity cache.
//!
//! Holds every cluster-qualified node and the placement units bound or
//! optimistically assumed on it. The scheduler reads it only through
//! [`Snapshot`]s refreshed once per scheduling cycle.
//!
//! # Architecture
//!
//! ```text
//! CapacityCache
//!   ├── nodes: qualified name → NodeInfo (node, units, requested)
//!   ├── units: key → unit state (binding finished, deadline)
//!   ├── assumed: keys of optimistic reservations
//!   └── run(): periodic expiry of finished-binding reservations
//! ```

pub mod cache;
pub mod error;
pub mod snapshot;

pub use cache::CapacityCache;
pub use error::{CacheError, CacheResult};
pub use snapshot::{NodeInfo, Snapshot};
