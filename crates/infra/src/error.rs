//! Error type for services that combine repositories with domain rules.

use mailroom_core::DomainError;

use crate::store::StoreError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Stable machine-readable code, shared with the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Domain(err) => err.code(),
            PipelineError::Store(StoreError::NotFound(_)) => "not_found",
            PipelineError::Store(StoreError::Conflict(_)) => "conflict",
            PipelineError::Store(StoreError::Storage(_)) => "store_error",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
