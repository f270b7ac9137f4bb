use tocsin_storage::error::StorageError;

/// Errors that can occur within the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Transient store failure; the event or notification is retried.
    #[error("Notify: storage error: {0}")]
    Storage(#[from] StorageError),

    /// No sender is registered for the contact's type; the notification
    /// is dropped.
    #[error("Notify: unknown contact type '{0}'")]
    UnknownContactType(String),

    /// Generic notification error for cases not covered by other variants.
    #[error("Notify: {0}")]
    Other(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
