//! Attack errors.

/// Errors produced while configuring or running an attack.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttackError {
    /// The requested numeric path does not exist.
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// Parameters are missing or inconsistent.
    #[error("misconfigured attack: {0}")]
    Misconfigured(String),
    /// The attack hardcodes its objective and rejects a custom loss.
    #[error("unsupported loss: {0}")]
    UnsupportedLoss(String),
    /// Inputs, labels or outputs have incompatible shapes.
    #[error("shape error: {0}")]
    Shape(String),
    /// Labels cannot be interpreted as classes.
    #[error("invalid labels: {0}")]
    InvalidLabels(String),
}

/// Result alias for attack operations.
pub type AttackResult<T> = Result<T, AttackError>;
