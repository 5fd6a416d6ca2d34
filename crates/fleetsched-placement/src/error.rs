//! Group capacity errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("the requested size {0} exceeds or does not fit the available group capacity")]
    InsufficientCapacity(usize),

    #[error("no groups found")]
    NoGroups,
}
