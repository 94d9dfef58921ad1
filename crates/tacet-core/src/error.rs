use tacet_storage::StoreError;
use thiserror::Error;

use crate::envelope::EnvelopeError;

/// Service-boundary error taxonomy.
///
/// Every cryptographic failure (bad tag, wrong key, passkey mismatch) is the
/// same [`CoreError::AuthenticationFailure`] so callers cannot distinguish
/// which part of a decryption attempt went wrong.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CoreError::NotFound,
            StoreError::AlreadyExists => CoreError::Conflict("already exists".into()),
            StoreError::Conflict => CoreError::Conflict("conflicting concurrent update".into()),
            StoreError::Backend(msg) => CoreError::Internal(msg),
        }
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        CoreError::Internal(format!("blocking task failed: {e}"))
    }
}

impl From<EnvelopeError> for CoreError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Wrap => CoreError::Internal("key wrapping failed".into()),
            // Unwrap-side failures are indistinguishable on purpose.
            _ => CoreError::AuthenticationFailure,
        }
    }
}
