//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, user-visible failures (validation,
/// conflicts, missing references, unusable providers). Storage failures belong
/// to the repository layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input or configuration failed validation. Carries every problem found.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A uniqueness or reference constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced provider/template/flow/job does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resolved provider is inactive, misconfigured or capped.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// No active provider qualifies for sending.
    #[error("no active provider")]
    NoActiveProvider,

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn provider_unavailable(msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Stable machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::NoActiveProvider => "no_active_provider",
            Self::InvalidId(_) => "invalid_id",
        }
    }
}
