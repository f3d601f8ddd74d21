//! Barrier waiter: one virtual user's synchronization protocol.
//!
//! A [`VirtualUser`] owns a lock service client and a notifier, and walks
//! one barrier at a time through a fixed sequence of states:
//!
//! ```text
//! IDLE -> SUBSCRIBING -> REQUESTING -> AWAITING_RELEASE_TIME
//!      -> AWAITING_ACTION_TIME -> DONE
//! ```
//!
//! The watch is armed strictly before the lock request goes out; if the
//! service publishes the release between those two steps, the armed watch
//! still catches it. Transient request conflicts are absorbed with a
//! bounded, jittered retry loop; everything else aborts the pass.

use crate::error::{LockstepError, Result};
use crate::notify::{ReleaseNotifier, ReleaseWatch};
use crate::service::{LockService, ReleaseRecord};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// Tuning knobs for one waiter's synchronization behavior.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Attempt budget for lock-request submission under contention.
    pub max_request_retries: u32,

    /// Upper bound for the uniform random backoff between attempts.
    pub backoff_max_ms: u64,

    /// How often to re-check the clock while waiting for the action time.
    /// Precision of the barrier is one poll interval.
    pub poll_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            // Sized for hundreds of workers contending on one barrier.
            max_request_retries: 10_000,
            backoff_max_ms: 5_000,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// One simulated worker, bound to a fixed `(user_id, run_id)` pair.
///
/// Reusable across barriers: each call to [`VirtualUser::wait_for_sync`]
/// performs one full barrier pass and leaves the waiter idle again.
pub struct VirtualUser<S, N> {
    service: S,
    notifier: N,
    user_id: String,
    run_id: String,
    settings: SyncSettings,

    /// Barriers already passed, with the action timestamp observed for
    /// each. Guards against a second request for the same barrier.
    passed: HashMap<String, DateTime<Utc>>,
}

impl<S, N> VirtualUser<S, N>
where
    S: LockService,
    N: ReleaseNotifier,
{
    /// Create a waiter for one worker within one run.
    pub fn new(
        service: S,
        notifier: N,
        user_id: impl Into<String>,
        run_id: impl Into<String>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            service,
            notifier,
            user_id: user_id.into(),
            run_id: run_id.into(),
            settings,
            passed: HashMap::new(),
        }
    }

    /// Worker identifier this waiter is bound to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Run identifier this waiter is bound to.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Block until this worker may cross the named barrier.
    ///
    /// Returns the barrier's action timestamp; the call does not return
    /// before local wall-clock time has reached it. Re-entering with a
    /// barrier already passed returns the recorded timestamp without
    /// touching the service again.
    pub fn wait_for_sync(&mut self, lock_id: &str) -> Result<DateTime<Utc>> {
        if let Some(&action_at) = self.passed.get(lock_id) {
            return Ok(action_at);
        }

        // Arm the watch before the request goes out, so a release
        // published between the two steps cannot be missed.
        let watch = self.subscribe(lock_id)?;

        self.request_with_retry(lock_id)?;

        let record = self.await_release_record(lock_id, watch)?;

        // Coarse poll until the published instant; slack is one interval.
        while Utc::now() < record.action_at {
            thread::sleep(self.settings.poll_interval);
        }

        self.passed.insert(lock_id.to_string(), record.action_at);
        Ok(record.action_at)
    }

    fn subscribe(&self, lock_id: &str) -> Result<ReleaseWatch> {
        self.notifier
            .subscribe(&self.run_id, lock_id)
            .map_err(|e| self.sync_err(lock_id, &format!("failed to arm release watch: {}", e)))
    }

    /// Submit the lock request, absorbing transient conflicts.
    ///
    /// Each conflict is followed by a uniformly random sleep in
    /// `0..=backoff_max_ms` so contending workers spread out instead of
    /// re-colliding. One success ends the loop; any fatal error or an
    /// exhausted attempt budget aborts.
    fn request_with_retry(&self, lock_id: &str) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self
                .service
                .request_lock(&self.run_id, &self.user_id, lock_id)
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    if attempts >= self.settings.max_request_retries {
                        return Err(self.sync_err(
                            lock_id,
                            &format!(
                                "retry ceiling of {} attempts reached: {}",
                                self.settings.max_request_retries, e
                            ),
                        ));
                    }
                    let jitter = rand::rng().random_range(0..=self.settings.backoff_max_ms);
                    thread::sleep(Duration::from_millis(jitter));
                }
                Err(e) => return Err(self.sync_err(lock_id, &e.to_string())),
            }
        }
    }

    /// Block until the release record for this barrier is readable.
    ///
    /// A watch may fire before the record is queryable; such wakes re-arm
    /// a fresh watch (the channel is single-fire) and keep waiting. A
    /// record published in the gap before the new watch is armed still
    /// fires it: subscription checks existing state first.
    fn await_release_record(&self, lock_id: &str, watch: ReleaseWatch) -> Result<ReleaseRecord> {
        let mut watch = watch;
        loop {
            watch
                .wait()
                .map_err(|e| self.sync_err(lock_id, &e.to_string()))?;

            match self.service.fetch_release_record(&self.run_id, lock_id) {
                Ok(Some(record)) => return Ok(record),
                // Spurious or early wake.
                Ok(None) => watch = self.subscribe(lock_id)?,
                Err(e) => return Err(self.sync_err(lock_id, &e.to_string())),
            }
        }
    }

    fn sync_err(&self, lock_id: &str, cause: &str) -> LockstepError {
        LockstepError::SyncError(format!(
            "user {} failed at barrier '{}' (run {}): {}",
            self.user_id, lock_id, self.run_id, cause
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::memory::MemoryLockService;
    use crate::service::ServiceError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn fast_settings(max_request_retries: u32) -> SyncSettings {
        SyncSettings {
            max_request_retries,
            backoff_max_ms: 1,
            poll_interval: Duration::from_millis(5),
        }
    }

    /// Delegates to a memory service, failing the first `conflicts` request
    /// attempts with a retryable conflict.
    #[derive(Clone)]
    struct FlakyService {
        inner: MemoryLockService,
        conflicts: Arc<AtomicU32>,
        attempts: Arc<AtomicU32>,
    }

    impl FlakyService {
        fn new(inner: MemoryLockService, conflicts: u32) -> Self {
            Self {
                inner,
                conflicts: Arc::new(AtomicU32::new(conflicts)),
                attempts: Arc::new(AtomicU32::new(0)),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl LockService for FlakyService {
        fn request_lock(
            &self,
            run_id: &str,
            user_id: &str,
            lock_id: &str,
        ) -> std::result::Result<(), ServiceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(ServiceError::Conflict("simulated deadlock".to_string()));
            }
            self.inner.request_lock(run_id, user_id, lock_id)
        }

        fn fetch_release_record(
            &self,
            run_id: &str,
            lock_id: &str,
        ) -> std::result::Result<Option<crate::service::ReleaseRecord>, ServiceError> {
            self.inner.fetch_release_record(run_id, lock_id)
        }
    }

    /// Always fails fatally on request.
    #[derive(Clone)]
    struct BrokenService {
        attempts: Arc<AtomicU32>,
    }

    impl LockService for BrokenService {
        fn request_lock(
            &self,
            _run_id: &str,
            _user_id: &str,
            _lock_id: &str,
        ) -> std::result::Result<(), ServiceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Fatal("schema mismatch".to_string()))
        }

        fn fetch_release_record(
            &self,
            _run_id: &str,
            _lock_id: &str,
        ) -> std::result::Result<Option<crate::service::ReleaseRecord>, ServiceError> {
            Ok(None)
        }
    }

    /// Always conflicts.
    #[derive(Clone)]
    struct ContendedService {
        attempts: Arc<AtomicU32>,
    }

    impl LockService for ContendedService {
        fn request_lock(
            &self,
            _run_id: &str,
            _user_id: &str,
            _lock_id: &str,
        ) -> std::result::Result<(), ServiceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Conflict("lock wait timeout".to_string()))
        }

        fn fetch_release_record(
            &self,
            _run_id: &str,
            _lock_id: &str,
        ) -> std::result::Result<Option<crate::service::ReleaseRecord>, ServiceError> {
            Ok(None)
        }
    }

    #[test]
    fn returns_only_after_action_time() {
        // Release publishes on the first request, firing 80ms ahead.
        let service = MemoryLockService::with_quorum(1, 80);
        let mut user = VirtualUser::new(
            service.clone(),
            service,
            "0",
            "R1",
            fast_settings(10),
        );

        let started = Instant::now();
        let action_at = user.wait_for_sync("POINT_1").unwrap();

        assert!(Utc::now() >= action_at);
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn subscribes_before_requesting() {
        #[derive(Clone)]
        struct Recording<T> {
            inner: T,
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        impl<T: LockService> LockService for Recording<T> {
            fn request_lock(
                &self,
                run_id: &str,
                user_id: &str,
                lock_id: &str,
            ) -> std::result::Result<(), ServiceError> {
                self.log.lock().unwrap().push("request");
                self.inner.request_lock(run_id, user_id, lock_id)
            }

            fn fetch_release_record(
                &self,
                run_id: &str,
                lock_id: &str,
            ) -> std::result::Result<Option<crate::service::ReleaseRecord>, ServiceError> {
                self.inner.fetch_release_record(run_id, lock_id)
            }
        }

        impl<T: ReleaseNotifier> ReleaseNotifier for Recording<T> {
            fn subscribe(
                &self,
                run_id: &str,
                lock_id: &str,
            ) -> std::result::Result<ReleaseWatch, ServiceError> {
                self.log.lock().unwrap().push("subscribe");
                self.inner.subscribe(run_id, lock_id)
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        // Quorum of one: the release publishes the instant the request
        // lands, which is exactly the window the subscribe-first ordering
        // protects against.
        let memory = MemoryLockService::with_quorum(1, 0);
        let service = Recording {
            inner: memory.clone(),
            log: Arc::clone(&log),
        };
        let notifier = Recording {
            inner: memory,
            log: Arc::clone(&log),
        };

        let mut user = VirtualUser::new(service, notifier, "0", "R1", fast_settings(10));
        user.wait_for_sync("POINT_1").unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log[0], "subscribe");
        assert_eq!(log[1], "request");
    }

    #[test]
    fn absorbs_conflicts_then_succeeds() {
        let memory = MemoryLockService::with_quorum(1, 0);
        let service = FlakyService::new(memory.clone(), 4);
        let mut user = VirtualUser::new(
            service.clone(),
            memory,
            "0",
            "R1",
            fast_settings(100),
        );

        user.wait_for_sync("POINT_1").unwrap();
        assert_eq!(service.attempts(), 5);
    }

    #[test]
    fn fatal_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let service = BrokenService {
            attempts: Arc::clone(&attempts),
        };
        let mut user = VirtualUser::new(
            service,
            MemoryLockService::new(),
            "3",
            "R1",
            fast_settings(100),
        );

        let err = user.wait_for_sync("POINT_1").unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // Enough context to correlate with service-side logs.
        let message = err.to_string();
        assert!(message.contains("user 3"));
        assert!(message.contains("POINT_1"));
        assert!(message.contains("R1"));
        assert!(message.contains("schema mismatch"));
    }

    #[test]
    fn retry_ceiling_fails_after_exact_attempt_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let service = ContendedService {
            attempts: Arc::clone(&attempts),
        };
        let mut user = VirtualUser::new(
            service,
            MemoryLockService::new(),
            "0",
            "R1",
            fast_settings(7),
        );

        let err = user.wait_for_sync("POINT_1").unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 7);
        assert!(err.to_string().contains("retry ceiling of 7"));
    }

    #[test]
    fn passed_barrier_is_not_requested_again() {
        let memory = MemoryLockService::with_quorum(1, 0);
        let service = FlakyService::new(memory.clone(), 0);
        let mut user = VirtualUser::new(
            service.clone(),
            memory.clone(),
            "0",
            "R1",
            fast_settings(10),
        );

        let first = user.wait_for_sync("POINT_1").unwrap();
        user.wait_for_sync("POINT_2").unwrap();
        let again = user.wait_for_sync("POINT_1").unwrap();

        assert_eq!(first, again);
        // One request per barrier, none for the re-entry.
        assert_eq!(service.attempts(), 2);
        assert_eq!(memory.request_count("R1", "POINT_1"), 1);
    }

    #[test]
    fn early_wake_rechecks_and_resubscribes() {
        /// Record becomes readable only on the second fetch.
        #[derive(Clone)]
        struct LaggingService {
            fetches: Arc<AtomicU32>,
        }

        impl LockService for LaggingService {
            fn request_lock(
                &self,
                _run_id: &str,
                _user_id: &str,
                _lock_id: &str,
            ) -> std::result::Result<(), ServiceError> {
                Ok(())
            }

            fn fetch_release_record(
                &self,
                run_id: &str,
                lock_id: &str,
            ) -> std::result::Result<Option<crate::service::ReleaseRecord>, ServiceError> {
                let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    return Ok(None);
                }
                Ok(Some(crate::service::ReleaseRecord {
                    run_id: run_id.to_string(),
                    lock_id: lock_id.to_string(),
                    action_at: Utc::now() - chrono::Duration::milliseconds(50),
                    published_at: Utc::now(),
                    publisher: "test@host".to_string(),
                    requests_observed: 1,
                }))
            }
        }

        /// Fires every watch the moment it is armed.
        #[derive(Clone)]
        struct EagerNotifier {
            subscriptions: Arc<AtomicU32>,
        }

        impl ReleaseNotifier for EagerNotifier {
            fn subscribe(
                &self,
                _run_id: &str,
                _lock_id: &str,
            ) -> std::result::Result<ReleaseWatch, ServiceError> {
                self.subscriptions.fetch_add(1, Ordering::SeqCst);
                let (tx, watch) = ReleaseWatch::channel();
                let _ = tx.send(());
                Ok(watch)
            }
        }

        let fetches = Arc::new(AtomicU32::new(0));
        let subscriptions = Arc::new(AtomicU32::new(0));
        let mut user = VirtualUser::new(
            LaggingService {
                fetches: Arc::clone(&fetches),
            },
            EagerNotifier {
                subscriptions: Arc::clone(&subscriptions),
            },
            "0",
            "R1",
            fast_settings(10),
        );

        user.wait_for_sync("POINT_1").unwrap();

        // First wake found no record and had to re-arm.
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(subscriptions.load(Ordering::SeqCst), 2);
    }
}
