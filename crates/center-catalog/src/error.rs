//! Error types for the meta-configuration catalog.

use thiserror::Error;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog root unavailable: {0}")]
    Root(String),

    #[error("meta data not found: {0}")]
    NotFound(String),

    #[error("meta data {0} still holds base configs")]
    NotEmpty(String),

    #[error("instance index {index} already bound for meta {meta_id}")]
    IndexConflict { meta_id: String, index: i32 },

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
