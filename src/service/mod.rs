//! Lock service contracts for lockstep.
//!
//! The lock service is the shared external store every worker coordinates
//! through. Workers never talk to each other: each one registers a lock
//! request for a barrier, and the service eventually publishes a release
//! record carrying the action timestamp at which all registrants may
//! proceed.
//!
//! This module defines the client-side contract (`LockService`), the error
//! taxonomy the barrier waiter's retry policy relies on (`ServiceError`),
//! and the record types. Two backends implement the contract:
//!
//! - [`dir::DirLockService`] — a shared directory, usable across processes
//! - [`memory::MemoryLockService`] — in-process, used by tests and
//!   single-process experiments

pub mod dir;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a run, user, or lock identifier.
///
/// Matches the 50-character schema limit of the original store.
pub const MAX_ID_LEN: usize = 50;

/// Errors returned by lock service backends.
///
/// The distinction between the two variants is the contract the barrier
/// waiter's retry policy is built on: `Conflict` is transient contention
/// between concurrently-committing requests and is worth retrying with
/// backoff; `Fatal` is everything else and must not be retried.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Transient contention (e.g. the request journal is locked by another
    /// worker). Recoverable by backing off and retrying.
    #[error("transient conflict: {0}")]
    Conflict(String),

    /// Any non-transient failure: malformed request, duplicate request,
    /// unreadable store, schema mismatch.
    #[error("{0}")]
    Fatal(String),
}

impl ServiceError {
    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Conflict(_))
    }
}

/// A worker's registration of intent to be released from a barrier.
///
/// Write-once per `(run_id, user_id, lock_id)`: the client never updates
/// or deletes it, and the service rejects duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Worker identifier, unique within the run.
    pub user_id: String,

    /// Run this request belongs to.
    pub run_id: String,

    /// Barrier the worker wants to be released from.
    pub lock_id: String,

    /// Submitting host identity (`user@HOST`), for correlating with logs.
    pub owner: String,

    /// Process ID of the submitter (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// When the request was submitted (RFC3339).
    pub requested_at: DateTime<Utc>,
}

impl RequestRecord {
    /// Create a request record for the current process at the current time.
    pub fn new(run_id: &str, user_id: &str, lock_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            run_id: run_id.to_string(),
            lock_id: lock_id.to_string(),
            owner: owner_string(),
            pid: Some(std::process::id()),
            requested_at: Utc::now(),
        }
    }
}

/// The record the lock service publishes once a barrier may be crossed.
///
/// Keyed by `(run_id, lock_id)`; write-once from the client's point of
/// view — the action timestamp never changes after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRecord {
    /// Run this release belongs to.
    pub run_id: String,

    /// Barrier being released.
    pub lock_id: String,

    /// The instant at/after which registered workers may proceed.
    pub action_at: DateTime<Utc>,

    /// When the record was published.
    pub published_at: DateTime<Utc>,

    /// Publishing host identity (`user@HOST`).
    pub publisher: String,

    /// How many lock requests the publisher had observed for this barrier.
    pub requests_observed: u32,
}

/// Client contract against the external lock service.
///
/// Implementations must be safe for concurrent use by hundreds of callers
/// issuing requests for the same `lock_id`; conflict classification exists
/// precisely because that contention is routine.
pub trait LockService {
    /// Register a lock request for `(run_id, user_id, lock_id)`.
    ///
    /// Idempotency is not guaranteed: callers must not re-issue after a
    /// confirmed success. A duplicate triple is `Fatal`; transient
    /// contention is `Conflict` and may be retried.
    fn request_lock(&self, run_id: &str, user_id: &str, lock_id: &str)
    -> Result<(), ServiceError>;

    /// Read the release record for `(run_id, lock_id)`, if published.
    ///
    /// Safe to call before any request has been made; returns `Ok(None)`
    /// until the service publishes a record.
    fn fetch_release_record(
        &self,
        run_id: &str,
        lock_id: &str,
    ) -> Result<Option<ReleaseRecord>, ServiceError>;
}

/// Validate a single identifier against the store's schema limits.
///
/// Identifiers are used as file names by the directory backend, so path
/// separators and dot names are rejected outright.
pub fn validate_id(kind: &str, value: &str) -> Result<(), ServiceError> {
    if value.is_empty() {
        return Err(ServiceError::Fatal(format!("{} must not be empty", kind)));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ServiceError::Fatal(format!(
            "{} '{}' exceeds {} characters",
            kind, value, MAX_ID_LEN
        )));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(ServiceError::Fatal(format!(
            "{} '{}' contains path characters",
            kind, value
        )));
    }
    Ok(())
}

/// Validate a full request key.
pub fn validate_key(run_id: &str, user_id: &str, lock_id: &str) -> Result<(), ServiceError> {
    validate_id("run id", run_id)?;
    validate_id("user id", user_id)?;
    validate_id("lock id", lock_id)?;
    Ok(())
}

/// Get the `user@HOST` identity string for record metadata.
pub(crate) fn owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
