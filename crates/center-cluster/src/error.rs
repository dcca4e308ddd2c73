//! Cluster error types.
//!
//! Structural errors (missing group/meta, bad arguments, blocked
//! workflows) abort an operation and surface to the caller. Per-container
//! agent failures never appear here — they are captured as values inside
//! the result envelopes.

use thiserror::Error;

use crate::agent::AgentError;
use center_catalog::CatalogError;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster discovery invalid")]
    DiscoveryInvalid,

    #[error("cluster group not found")]
    GroupNotFound,

    #[error("cluster metadata not found")]
    MetaDataNotFound,

    #[error("cluster container not found")]
    ContainerNotFound,

    #[error("cluster no engine available")]
    NoEngineAvailable,

    #[error("cluster create container name conflict")]
    CreateContainerNameConflict,

    #[error("cluster create container failure")]
    CreateContainerFailure,

    #[error("cluster containers instances invalid")]
    ContainersInstancesInvalid,

    #[error("cluster containers setting")]
    ContainersSetting,

    #[error("cluster containers upgrading")]
    ContainersUpgrading,

    #[error("cluster containers migrating")]
    ContainersMigrating,

    #[error("invalid cluster option: {0}")]
    InvalidOption(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
}
