//! Cluster-qualified names.
//!
//! Every node and placement unit that enters the shared capacity cache is
//! named `clusterId/localName`. This lets one scheduling cycle treat nodes
//! from several independent cells as a single candidate pool, and lets the
//! caller recover the owning cell from the chosen host afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the cluster id and the local name.
pub const SEPARATOR: char = '/';

/// Errors produced while decoding a qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("malformed node name {0:?}: expected clusterId/localName")]
    MalformedNodeName(String),
}

/// Prefix `local_name` with `cluster_id`.
///
/// Names that already contain the separator are returned unchanged, so
/// qualifying twice is harmless.
pub fn qualify(cluster_id: &str, local_name: &str) -> String {
    if local_name.contains(SEPARATOR) {
        return local_name.to_string();
    }
    format!("{cluster_id}{SEPARATOR}{local_name}")
}

/// Split a qualified name at the first separator.
pub fn split(qualified: &str) -> Result<(&str, &str), IdentityError> {
    qualified
        .split_once(SEPARATOR)
        .ok_or_else(|| IdentityError::MalformedNodeName(qualified.to_string()))
}

/// An owned, already-validated qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub cluster_id: String,
    pub local_name: String,
}

impl QualifiedName {
    pub fn new(cluster_id: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            local_name: local_name.into(),
        }
    }

    pub fn parse(qualified: &str) -> Result<Self, IdentityError> {
        let (cluster_id, local_name) = split(qualified)?;
        Ok(Self::new(cluster_id, local_name))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.cluster_id, self.local_name)
    }
}
