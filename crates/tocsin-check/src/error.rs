use tocsin_storage::error::StorageError;

/// Errors that can occur while checking a trigger.
///
/// Storage and deadline errors abort the check with no state mutation;
/// target and expression failures are converted into a single EXCEPTION
/// state by the engine and the check still persists.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// Transient store failure; retried on the next tick.
    #[error("Check: storage error: {0}")]
    Storage(#[from] StorageError),

    /// The trigger definition is malformed; it is skipped and logged.
    #[error("Check: invalid trigger: {0}")]
    InvalidTrigger(#[from] tocsin_common::error::ValidationError),

    /// A target could not be evaluated against the time-series store.
    #[error("Check: target t{index} evaluation failed: {message}")]
    TargetEvaluation { index: usize, message: String },

    /// The per-check deadline elapsed before results could be persisted.
    #[error("Check: deadline exceeded")]
    DeadlineExceeded,
}

/// Convenience `Result` alias for check operations.
pub type Result<T> = std::result::Result<T, CheckError>;
