//! Shared-directory lock service backend.
//!
//! Coordination state lives as plain JSON files under a sync root (§ layout
//! in [`crate::context`]), so any number of threads and processes can
//! participate as long as they see the same directory.
//!
//! # Write-once records
//!
//! Request records and release records are created with **create_new**
//! semantics (exclusive create): a duplicate request is rejected, and a
//! release record's action timestamp can never change after publication —
//! the first publisher wins.
//!
//! # Journal lock and conflicts
//!
//! Each barrier has a journal lock file (`requests/<LOCK_ID>.lock`) that a
//! worker must create exclusively before submitting its request. A held
//! journal lock is exactly the transient contention the barrier waiter's
//! backoff-and-retry loop exists for, so it surfaces as
//! [`ServiceError::Conflict`]. Locks abandoned by crashed workers are
//! broken once older than a staleness threshold.

use crate::context::SyncContext;
use crate::service::{
    LockService, ReleaseRecord, RequestRecord, ServiceError, owner_string, validate_id,
    validate_key,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// When the backend publishes a barrier's release record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Never publish automatically; an operator publishes via
    /// `lockstep release`.
    Manual,
    /// Publish once `quorum` requests have accumulated, with the action
    /// timestamp set `release_delay_ms` after the publishing request.
    OnQuorum {
        /// Number of distinct requests that completes the barrier.
        quorum: u32,
        /// Gap between publication and the action timestamp, giving every
        /// waiter time to observe the record before it fires.
        release_delay_ms: u64,
    },
}

/// Metadata stored in a barrier's journal lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalLockMetadata {
    /// Owner of the lock (e.g. `user@HOST`).
    pub owner: String,

    /// Process ID of the lock holder (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Timestamp when the lock was created (RFC3339).
    pub created_at: DateTime<Utc>,
}

impl JournalLockMetadata {
    fn new() -> Self {
        Self {
            owner: owner_string(),
            pid: Some(std::process::id()),
            created_at: Utc::now(),
        }
    }

    /// Parse journal lock metadata from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ServiceError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ServiceError::Fatal(format!(
                "failed to read journal lock '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            ServiceError::Fatal(format!(
                "failed to parse journal lock '{}': {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Age of the lock in milliseconds.
    pub fn age_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.created_at)
            .num_milliseconds()
    }
}

/// RAII guard for a held journal lock.
///
/// The lock file is deleted when the guard drops. If deletion fails, a
/// warning is printed; the staleness threshold cleans up the leftover.
#[derive(Debug)]
struct JournalLockGuard {
    path: PathBuf,
}

impl Drop for JournalLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            eprintln!(
                "Warning: failed to release journal lock '{}': {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Lock service backed by a shared sync-root directory.
#[derive(Debug, Clone)]
pub struct DirLockService {
    ctx: SyncContext,
    policy: ReleasePolicy,
    journal_stale_ms: u64,
}

impl DirLockService {
    /// Create a service over `ctx` with the given release policy.
    pub fn new(ctx: SyncContext, policy: ReleasePolicy, journal_stale_ms: u64) -> Self {
        Self {
            ctx,
            policy,
            journal_stale_ms,
        }
    }

    /// Acquire a barrier's journal lock exclusively.
    ///
    /// A fresh lock held by another worker is a `Conflict`. A lock older
    /// than the staleness threshold is broken (removed), and the call still
    /// returns `Conflict` so the caller re-enters through its retry loop.
    fn acquire_journal_lock(
        &self,
        run_id: &str,
        lock_id: &str,
    ) -> Result<JournalLockGuard, ServiceError> {
        let lock_path = self.ctx.journal_lock_path(run_id, lock_id);
        ensure_dir(lock_path.parent())?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(self.classify_held_lock(&lock_path));
            }
            Err(e) => {
                return Err(ServiceError::Fatal(format!(
                    "failed to acquire journal lock '{}': {}",
                    lock_path.display(),
                    e
                )));
            }
        };

        let json = serde_json::to_string_pretty(&JournalLockMetadata::new()).map_err(|e| {
            ServiceError::Fatal(format!("failed to serialize journal lock metadata: {}", e))
        })?;

        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&lock_path);
                ServiceError::Fatal(format!("failed to write journal lock metadata: {}", e))
            })?;

        Ok(JournalLockGuard { path: lock_path })
    }

    /// Decide what an already-existing journal lock means for the caller.
    fn classify_held_lock(&self, lock_path: &Path) -> ServiceError {
        match JournalLockMetadata::from_file(lock_path) {
            Ok(meta) if meta.age_ms() > self.journal_stale_ms as i64 => {
                // Abandoned by a crashed worker; break it and let the
                // caller retry into a clean acquisition.
                let _ = fs::remove_file(lock_path);
                ServiceError::Conflict(format!(
                    "broke stale journal lock '{}' (held by {} for {}ms)",
                    lock_path.display(),
                    meta.owner,
                    meta.age_ms()
                ))
            }
            Ok(meta) => ServiceError::Conflict(format!(
                "journal lock held by {} ({})",
                meta.owner,
                lock_path.display()
            )),
            // Unreadable usually means another worker is mid-write.
            Err(_) => ServiceError::Conflict(format!(
                "journal lock '{}' is being written by another worker",
                lock_path.display()
            )),
        }
    }

    /// Number of request records on disk for a barrier.
    fn count_requests(&self, run_id: &str, lock_id: &str) -> Result<u32, ServiceError> {
        let dir = self.ctx.requests_dir(run_id, lock_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(ServiceError::Fatal(format!(
                    "failed to read request directory '{}': {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| {
                ServiceError::Fatal(format!("failed to read request directory entry: {}", e))
            })?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Publish a release record unless one already exists.
    ///
    /// Returns whether this call was the publisher. Exclusive create keeps
    /// the action timestamp write-once even when several workers complete
    /// the quorum check simultaneously.
    fn publish_if_absent(&self, record: &ReleaseRecord) -> Result<bool, ServiceError> {
        let path = self.ctx.release_path(&record.run_id, &record.lock_id);
        ensure_dir(path.parent())?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(ServiceError::Fatal(format!(
                    "failed to create release record '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        let json = serde_json::to_string_pretty(record).map_err(|e| {
            ServiceError::Fatal(format!("failed to serialize release record: {}", e))
        })?;

        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&path);
                ServiceError::Fatal(format!("failed to write release record: {}", e))
            })?;

        Ok(true)
    }

    /// Publish a release record with an operator-chosen action timestamp.
    ///
    /// Fails if the barrier already has a record: the action timestamp is
    /// write-once.
    pub fn manual_release(
        &self,
        run_id: &str,
        lock_id: &str,
        action_at: DateTime<Utc>,
    ) -> Result<ReleaseRecord, ServiceError> {
        validate_id("run id", run_id)?;
        validate_id("lock id", lock_id)?;

        let record = ReleaseRecord {
            run_id: run_id.to_string(),
            lock_id: lock_id.to_string(),
            action_at,
            published_at: Utc::now(),
            publisher: owner_string(),
            requests_observed: self.count_requests(run_id, lock_id)?,
        };

        if !self.publish_if_absent(&record)? {
            return Err(ServiceError::Fatal(format!(
                "release record already exists for run '{}' lock '{}'",
                run_id, lock_id
            )));
        }
        Ok(record)
    }

    /// List run IDs present under the sync root, sorted.
    pub fn list_runs(&self) -> Result<Vec<String>, ServiceError> {
        list_subdir_names(&self.ctx.runs_dir())
    }

    /// List barrier names seen for a run (requested or released), sorted.
    pub fn list_barriers(&self, run_id: &str) -> Result<Vec<String>, ServiceError> {
        validate_id("run id", run_id)?;

        let mut names = list_subdir_names(&self.ctx.run_dir(run_id).join("requests"))?;
        for released in list_file_stems(&self.ctx.releases_dir(run_id), "json")? {
            if !names.contains(&released) {
                names.push(released);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read all request records for a barrier, sorted by user ID.
    ///
    /// Records that fail to parse are skipped; a half-written record is a
    /// normal sight while workers are actively registering.
    pub fn list_requests(
        &self,
        run_id: &str,
        lock_id: &str,
    ) -> Result<Vec<RequestRecord>, ServiceError> {
        validate_id("run id", run_id)?;
        validate_id("lock id", lock_id)?;

        let dir = self.ctx.requests_dir(run_id, lock_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ServiceError::Fatal(format!(
                    "failed to read request directory '{}': {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                ServiceError::Fatal(format!("failed to read request directory entry: {}", e))
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(&path)
                && let Ok(record) = serde_json::from_str::<RequestRecord>(&content)
            {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(records)
    }

    /// Read a barrier's journal lock metadata, if a lock file is present
    /// and parsable.
    pub fn journal_lock(&self, run_id: &str, lock_id: &str) -> Option<JournalLockMetadata> {
        JournalLockMetadata::from_file(self.ctx.journal_lock_path(run_id, lock_id)).ok()
    }
}

impl LockService for DirLockService {
    fn request_lock(
        &self,
        run_id: &str,
        user_id: &str,
        lock_id: &str,
    ) -> Result<(), ServiceError> {
        validate_key(run_id, user_id, lock_id)?;

        // Serializes request submission per barrier; held until return.
        let _journal = self.acquire_journal_lock(run_id, lock_id)?;

        let path = self.ctx.request_path(run_id, lock_id, user_id);
        ensure_dir(path.parent())?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ServiceError::Fatal(format!(
                    "duplicate lock request for run '{}' user '{}' lock '{}'",
                    run_id, user_id, lock_id
                )));
            }
            Err(e) => {
                return Err(ServiceError::Fatal(format!(
                    "failed to create request record '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        let record = RequestRecord::new(run_id, user_id, lock_id);
        let json = serde_json::to_string_pretty(&record).map_err(|e| {
            ServiceError::Fatal(format!("failed to serialize request record: {}", e))
        })?;

        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&path);
                ServiceError::Fatal(format!("failed to write request record: {}", e))
            })?;

        if let ReleasePolicy::OnQuorum {
            quorum,
            release_delay_ms,
        } = self.policy
            && quorum > 0
        {
            let observed = self.count_requests(run_id, lock_id)?;
            if observed >= quorum {
                let release = ReleaseRecord {
                    run_id: run_id.to_string(),
                    lock_id: lock_id.to_string(),
                    action_at: Utc::now() + Duration::milliseconds(release_delay_ms as i64),
                    published_at: Utc::now(),
                    publisher: owner_string(),
                    requests_observed: observed,
                };
                self.publish_if_absent(&release)?;
            }
        }

        Ok(())
    }

    fn fetch_release_record(
        &self,
        run_id: &str,
        lock_id: &str,
    ) -> Result<Option<ReleaseRecord>, ServiceError> {
        validate_id("run id", run_id)?;
        validate_id("lock id", lock_id)?;

        let path = self.ctx.release_path(run_id, lock_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ServiceError::Fatal(format!(
                    "failed to read release record '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        let record = serde_json::from_str(&content).map_err(|e| {
            ServiceError::Fatal(format!(
                "failed to parse release record '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(record))
    }
}

/// Ensure a record's parent directory exists.
fn ensure_dir(parent: Option<&Path>) -> Result<(), ServiceError> {
    if let Some(parent) = parent
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            ServiceError::Fatal(format!(
                "failed to create directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Names of subdirectories under `dir`, sorted; empty if `dir` is absent.
fn list_subdir_names(dir: &Path) -> Result<Vec<String>, ServiceError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ServiceError::Fatal(format!(
                "failed to read directory '{}': {}",
                dir.display(),
                e
            )));
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| ServiceError::Fatal(format!("failed to read directory entry: {}", e)))?;
        if entry.path().is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// File stems with the given extension under `dir`, sorted; empty if absent.
fn list_file_stems(dir: &Path, extension: &str) -> Result<Vec<String>, ServiceError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ServiceError::Fatal(format!(
                "failed to read directory '{}': {}",
                dir.display(),
                e
            )));
        }
    };

    let mut stems = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| ServiceError::Fatal(format!("failed to read directory entry: {}", e)))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension)
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    fn service(temp_dir: &TempDir, policy: ReleasePolicy) -> DirLockService {
        DirLockService::new(SyncContext::new(temp_dir.path()), policy, 30_000)
    }

    #[test]
    fn request_creates_record_and_fetch_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);

        service.request_lock("R1", "0", "POINT_1").unwrap();

        let path = SyncContext::new(temp_dir.path()).request_path("R1", "POINT_1", "0");
        assert!(path.exists());

        let content = fs::read_to_string(&path).unwrap();
        let record: RequestRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(record.user_id, "0");
        assert_eq!(record.lock_id, "POINT_1");

        assert!(service.fetch_release_record("R1", "POINT_1").unwrap().is_none());
    }

    #[test]
    fn journal_lock_is_released_after_request() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);

        service.request_lock("R1", "0", "POINT_1").unwrap();
        assert!(
            !SyncContext::new(temp_dir.path())
                .journal_lock_path("R1", "POINT_1")
                .exists()
        );
    }

    #[test]
    fn duplicate_request_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);

        service.request_lock("R1", "0", "POINT_1").unwrap();
        let err = service.request_lock("R1", "0", "POINT_1").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("duplicate lock request"));
    }

    #[test]
    fn held_journal_lock_is_a_retryable_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);
        let ctx = SyncContext::new(temp_dir.path());

        // Simulate another worker holding the journal lock.
        let lock_path = ctx.journal_lock_path("R1", "POINT_1");
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        let meta = JournalLockMetadata {
            owner: "other@host".to_string(),
            pid: Some(12345),
            created_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string(&meta).unwrap()).unwrap();

        let err = service.request_lock("R1", "0", "POINT_1").unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("other@host"));
    }

    #[test]
    fn stale_journal_lock_is_broken() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);
        let ctx = SyncContext::new(temp_dir.path());

        let lock_path = ctx.journal_lock_path("R1", "POINT_1");
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        let meta = JournalLockMetadata {
            owner: "crashed@host".to_string(),
            pid: Some(99),
            created_at: Utc::now() - Duration::minutes(5),
        };
        fs::write(&lock_path, serde_json::to_string(&meta).unwrap()).unwrap();

        // First attempt breaks the stale lock and reports a conflict.
        let err = service.request_lock("R1", "0", "POINT_1").unwrap_err();
        assert!(err.is_retryable());
        assert!(!lock_path.exists());

        // The retry goes through cleanly.
        service.request_lock("R1", "0", "POINT_1").unwrap();
    }

    #[test]
    fn unreadable_journal_lock_is_a_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);
        let ctx = SyncContext::new(temp_dir.path());

        let lock_path = ctx.journal_lock_path("R1", "POINT_1");
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        fs::write(&lock_path, "not json").unwrap();

        let err = service.request_lock("R1", "0", "POINT_1").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn quorum_policy_publishes_on_final_request() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(
            &temp_dir,
            ReleasePolicy::OnQuorum {
                quorum: 3,
                release_delay_ms: 1000,
            },
        );

        service.request_lock("R1", "0", "POINT_1").unwrap();
        service.request_lock("R1", "1", "POINT_1").unwrap();
        assert!(service.fetch_release_record("R1", "POINT_1").unwrap().is_none());

        service.request_lock("R1", "2", "POINT_1").unwrap();
        let record = service.fetch_release_record("R1", "POINT_1").unwrap().unwrap();
        assert_eq!(record.requests_observed, 3);
        assert!(record.action_at > record.published_at);
    }

    #[test]
    fn concurrent_requests_reach_quorum_exactly_once() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(
            &temp_dir,
            ReleasePolicy::OnQuorum {
                quorum: 4,
                release_delay_ms: 0,
            },
        );

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                thread::spawn(move || {
                    let user_id = i.to_string();
                    // Contending workers see journal-lock conflicts; retry
                    // like the waiter would.
                    loop {
                        match service.request_lock("R1", &user_id, "POINT_1") {
                            Ok(()) => return,
                            Err(e) if e.is_retryable() => {
                                thread::sleep(StdDuration::from_millis(2))
                            }
                            Err(e) => panic!("unexpected fatal error: {}", e),
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let record = service.fetch_release_record("R1", "POINT_1").unwrap().unwrap();
        assert_eq!(record.requests_observed, 4);
    }

    #[test]
    fn manual_release_is_write_once() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);

        let action_at = Utc::now() + Duration::milliseconds(500);
        let record = service.manual_release("R1", "POINT_1", action_at).unwrap();
        assert_eq!(record.action_at, action_at);

        let err = service.manual_release("R1", "POINT_1", Utc::now()).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // The original timestamp survives.
        let fetched = service.fetch_release_record("R1", "POINT_1").unwrap().unwrap();
        assert_eq!(fetched.action_at, action_at);
    }

    #[test]
    fn corrupt_release_record_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);
        let ctx = SyncContext::new(temp_dir.path());

        let path = ctx.release_path("R1", "POINT_1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let err = service.fetch_release_record("R1", "POINT_1").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);

        assert!(service.request_lock("", "0", "POINT_1").is_err());
        assert!(service.request_lock("R1", "a/b", "POINT_1").is_err());
        assert!(service.fetch_release_record("R1", "..").is_err());
        assert!(service.manual_release("R1", "a\\b", Utc::now()).is_err());
    }

    #[test]
    fn listing_reflects_store_contents() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);

        assert!(service.list_runs().unwrap().is_empty());

        service.request_lock("R2", "1", "POINT_1").unwrap();
        service.request_lock("R1", "0", "POINT_1").unwrap();
        service.request_lock("R1", "1", "POINT_1").unwrap();
        service.manual_release("R1", "POINT_2", Utc::now()).unwrap();

        assert_eq!(service.list_runs().unwrap(), vec!["R1", "R2"]);
        assert_eq!(
            service.list_barriers("R1").unwrap(),
            vec!["POINT_1", "POINT_2"]
        );

        let requests = service.list_requests("R1", "POINT_1").unwrap();
        let users: Vec<&str> = requests.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(users, vec!["0", "1"]);
    }

    #[test]
    fn journal_lock_metadata_is_inspectable() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, ReleasePolicy::Manual);
        let ctx = SyncContext::new(temp_dir.path());

        assert!(service.journal_lock("R1", "POINT_1").is_none());

        let lock_path = ctx.journal_lock_path("R1", "POINT_1");
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        let meta = JournalLockMetadata {
            owner: "worker@host".to_string(),
            pid: None,
            created_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string(&meta).unwrap()).unwrap();

        let read = service.journal_lock("R1", "POINT_1").unwrap();
        assert_eq!(read.owner, "worker@host");
        assert!(read.age_ms() < 60_000);
    }
}
