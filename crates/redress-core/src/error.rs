use thiserror::Error;

/// Redress operation errors.
#[derive(Debug, Error)]
pub enum RedressError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("domain {0} does not exist")]
    InvalidDomain(i64),

    #[error("complaint already belongs to domain {0}")]
    SameDomainTransfer(i64),

    #[error("authentication required")]
    Authentication,

    #[error("role does not permit this operation")]
    PermissionDenied,

    #[error("resource not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RedressError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}
