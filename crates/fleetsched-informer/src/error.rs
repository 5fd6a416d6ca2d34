//! Bridge error types.

use thiserror::Error;

use fleetsched_cache::CacheError;
use fleetsched_core::QuantityError;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cluster {0} is already registered")]
    DuplicateCluster(String),

    #[error("cluster {cluster} failed to sync: {reason}")]
    SyncFailed { cluster: String, reason: String },

    #[error("event channel closed")]
    ChannelClosed,

    #[error("invalid {label} label {value:?}")]
    InvalidLabel { label: &'static str, value: String },

    #[error("invalid quantity: {0}")]
    Quantity(#[from] QuantityError),

    #[error("capacity cache: {0}")]
    Cache(#[from] CacheError),
}
