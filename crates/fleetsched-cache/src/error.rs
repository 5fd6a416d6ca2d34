//! Capacity cache error types.

use thiserror::Error;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Contract violations reported by the capacity cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("unit {0} is already in the cache")]
    AlreadyPresent(String),

    #[error("unit {0} is not in the cache")]
    NotFound(String),

    #[error("unit {0} is not assumed")]
    NotAssumed(String),

    #[error("unit {0} has no node name")]
    Unbound(String),

    #[error("unit {key} was assumed on node {cached} but {requested} was given")]
    NodeMismatch {
        key: String,
        cached: String,
        requested: String,
    },

    #[error("unit {key} moved from node {from} to {to}; cache is corrupted")]
    Corrupted { key: String, from: String, to: String },
}
