/// Validation errors for user-defined entities.
///
/// Malformed entities are rejected at the API ingress; the core calls
/// [`crate::types::Trigger::validate`] defensively before evaluating and
/// skips (with a log line) anything that fails.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A trigger must name at least one target expression.
    #[error("Validation: trigger '{0}' has no targets")]
    NoTargets(String),

    /// A trigger must carry at least one tag.
    #[error("Validation: trigger '{0}' has no tags")]
    NoTags(String),

    /// Rising/falling triggers need both threshold values.
    #[error("Validation: trigger '{0}' is missing warn_value or error_value")]
    MissingThresholds(String),

    /// Rising/falling thresholds must be distinct.
    #[error("Validation: trigger '{0}' has equal warn_value and error_value")]
    EqualThresholds(String),

    /// Expression triggers need a non-empty expression.
    #[error("Validation: trigger '{0}' has no expression")]
    MissingExpression(String),

    /// `python_expression` is a deprecated alias and may not be combined
    /// with `expression`.
    #[error("Validation: trigger '{0}' sets both expression and python_expression")]
    AmbiguousExpression(String),
}

/// Convenience `Result` alias for validation.
pub type Result<T> = std::result::Result<T, ValidationError>;
