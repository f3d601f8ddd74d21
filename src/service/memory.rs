//! In-process lock service backend.
//!
//! Keeps requests, release records, and armed watches behind one mutex.
//! Used by harness and waiter tests, and for single-process experiments
//! where spinning up a shared directory is not worth it. Notification is
//! native push: publishing a release fires every watch armed for that
//! barrier, each exactly once.

use crate::notify::{ReleaseNotifier, ReleaseWatch};
use crate::service::{
    LockService, ReleaseRecord, ServiceError, owner_string, validate_id, validate_key,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

type BarrierKey = (String, String);

#[derive(Default)]
struct State {
    /// Workers registered per `(run_id, lock_id)`.
    requests: BTreeMap<BarrierKey, BTreeSet<String>>,

    /// Published release records, write-once per key.
    releases: HashMap<BarrierKey, ReleaseRecord>,

    /// Armed one-shot watches per key, drained on publish.
    watchers: HashMap<BarrierKey, Vec<Sender<()>>>,
}

/// In-memory lock service and notification channel.
///
/// Cheap to clone; all clones share the same store. With `quorum > 0` the
/// release record is published automatically once that many distinct
/// workers have requested the barrier; with `quorum == 0` publication is
/// manual via [`MemoryLockService::publish`].
#[derive(Clone)]
pub struct MemoryLockService {
    inner: Arc<Mutex<State>>,
    quorum: u32,
    release_delay_ms: u64,
}

impl MemoryLockService {
    /// Create a service with manual release publication.
    pub fn new() -> Self {
        Self::with_quorum(0, 0)
    }

    /// Create a service that publishes a release once `quorum` distinct
    /// workers have requested a barrier, with `action_at` set
    /// `release_delay_ms` after the quorum-completing request.
    pub fn with_quorum(quorum: u32, release_delay_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::default())),
            quorum,
            release_delay_ms,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned mutex only means another worker panicked mid-update;
        // the store itself is still consistent for reads and inserts.
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Manually publish the release record for `(run_id, lock_id)`.
    ///
    /// Fails if a record is already published: the action timestamp is
    /// write-once.
    pub fn publish(
        &self,
        run_id: &str,
        lock_id: &str,
        action_at: DateTime<Utc>,
    ) -> Result<ReleaseRecord, ServiceError> {
        validate_id("run id", run_id)?;
        validate_id("lock id", lock_id)?;

        let key = (run_id.to_string(), lock_id.to_string());
        let mut state = self.state();
        if state.releases.contains_key(&key) {
            return Err(ServiceError::Fatal(format!(
                "release record already exists for run '{}' lock '{}'",
                run_id, lock_id
            )));
        }

        let observed = state.requests.get(&key).map(|s| s.len()).unwrap_or(0) as u32;
        Ok(publish_locked(&mut state, key, action_at, observed))
    }

    /// Number of distinct workers that have requested `(run_id, lock_id)`.
    pub fn request_count(&self, run_id: &str, lock_id: &str) -> usize {
        let key = (run_id.to_string(), lock_id.to_string());
        self.state().requests.get(&key).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for MemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert the release record and fire every armed watch for the key.
fn publish_locked(
    state: &mut State,
    key: BarrierKey,
    action_at: DateTime<Utc>,
    requests_observed: u32,
) -> ReleaseRecord {
    let record = ReleaseRecord {
        run_id: key.0.clone(),
        lock_id: key.1.clone(),
        action_at,
        published_at: Utc::now(),
        publisher: owner_string(),
        requests_observed,
    };
    state.releases.insert(key.clone(), record.clone());

    if let Some(watchers) = state.watchers.remove(&key) {
        for tx in watchers {
            // A watcher whose subscriber is gone is not an error.
            let _ = tx.send(());
        }
    }

    record
}

impl LockService for MemoryLockService {
    fn request_lock(
        &self,
        run_id: &str,
        user_id: &str,
        lock_id: &str,
    ) -> Result<(), ServiceError> {
        validate_key(run_id, user_id, lock_id)?;

        let key = (run_id.to_string(), lock_id.to_string());
        let mut state = self.state();

        let users = state.requests.entry(key.clone()).or_default();
        if !users.insert(user_id.to_string()) {
            return Err(ServiceError::Fatal(format!(
                "duplicate lock request for run '{}' user '{}' lock '{}'",
                run_id, user_id, lock_id
            )));
        }

        let count = users.len() as u32;
        if self.quorum > 0 && count >= self.quorum && !state.releases.contains_key(&key) {
            let action_at = Utc::now() + Duration::milliseconds(self.release_delay_ms as i64);
            publish_locked(&mut state, key, action_at, count);
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

        let key = (run_id.to_string(), lock_id.to_string());
        Ok(self.state().releases.get(&key).cloned())
    }
}

impl ReleaseNotifier for MemoryLockService {
    fn subscribe(&self, run_id: &str, lock_id: &str) -> Result<ReleaseWatch, ServiceError> {
        validate_id("run id", run_id)?;
        validate_id("lock id", lock_id)?;

        let key = (run_id.to_string(), lock_id.to_string());
        let (tx, watch) = ReleaseWatch::channel();

        let mut state = self.state();
        if state.releases.contains_key(&key) {
            // Record already published: fire immediately so there is no
            // missed-signal window at subscribe time.
            let _ = tx.send(());
        } else {
            state.watchers.entry(key).or_default().push(tx);
        }

        Ok(watch)
    }
}
