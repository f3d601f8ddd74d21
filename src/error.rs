//! Error types for the lockstep CLI.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.

use crate::exit_codes;
use crate::service::ServiceError;
use thiserror::Error;

/// Main error type for lockstep operations.
///
/// Each variant maps to a specific exit code. Transient lock-request
/// conflicts never appear here: they are absorbed inside the barrier
/// waiter's retry loop and only surface as a `SyncError` once the retry
/// ceiling is exhausted.
#[derive(Error, Debug)]
pub enum LockstepError {
    /// User provided invalid arguments or the sync root is in an invalid state.
    #[error("{0}")]
    UserError(String),

    /// A worker's barrier pass failed fatally.
    #[error("Synchronization failed: {0}")]
    SyncError(String),

    /// The lock service backend failed outside a barrier pass.
    #[error("Lock service failure: {0}")]
    ServiceError(String),
}

impl LockstepError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockstepError::UserError(_) => exit_codes::USER_ERROR,
            LockstepError::SyncError(_) => exit_codes::SYNC_FAILURE,
            LockstepError::ServiceError(_) => exit_codes::SERVICE_FAILURE,
        }
    }
}

impl From<ServiceError> for LockstepError {
    fn from(err: ServiceError) -> Self {
        LockstepError::ServiceError(err.to_string())
    }
}

/// Result type alias for lockstep operations.
pub type Result<T> = std::result::Result<T, LockstepError>;
