//! Error types for fabric-core.

use fabric_state::StateError;

/// Errors produced by retrieval, assembly and the fabric facade.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// The query has no searchable tokens.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for fabric-core operations.
pub type FabricResult<T> = std::result::Result<T, FabricError>;
