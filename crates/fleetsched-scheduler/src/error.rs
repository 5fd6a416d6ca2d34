//! Scheduler error types.

use thiserror::Error;

use fleetsched_cache::CacheError;
use fleetsched_core::IdentityError;
use fleetsched_placement::CapacityError;

use crate::framework::FitError;

/// Errors that can occur while placing instances.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    MalformedNodeName(#[from] IdentityError),

    #[error("no nodes available to schedule units")]
    NoNodesAvailable,

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error("no feasible groups found")]
    NoFeasibleGroups,

    #[error("no suggested groups found")]
    NoSuggestedGroups,

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error("plugin {plugin} failed: {reason}")]
    Plugin { plugin: String, reason: String },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("instance type catalog error: {0}")]
    Catalog(#[from] anyhow::Error),

    #[error("scheduling instance {index} of {total}: {source}")]
    Batch {
        index: usize,
        total: usize,
        #[source]
        source: Box<SchedulerError>,
    },
}

impl SchedulerError {
    /// The request cannot be placed with the capacity that exists now.
    /// Everything else is either a malformed request or a transient fault.
    pub fn is_unschedulable(&self) -> bool {
        match self {
            SchedulerError::NoNodesAvailable
            | SchedulerError::Fit(_)
            | SchedulerError::NoFeasibleGroups
            | SchedulerError::NoSuggestedGroups
            | SchedulerError::Capacity(_) => true,
            SchedulerError::Batch { source, .. } => source.is_unschedulable(),
            _ => false,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
