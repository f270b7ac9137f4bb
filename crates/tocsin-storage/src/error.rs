/// Errors that can occur within the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// JSON serialization or deserialization failure in a backend that
    /// stores entities as JSON.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend is unreachable; the caller retries on its next tick.
    #[error("Storage: backend unavailable: {0}")]
    Unavailable(String),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
