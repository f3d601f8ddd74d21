//! Release notification subscriptions.
//!
//! The notification channel wakes a blocked worker when a barrier's release
//! record changes. Its contract is deliberately weak: at-least-once delivery,
//! single-fire per subscription, no payload — on wake the consumer must
//! re-read the release record rather than trust the signal.
//!
//! The single-fire contract is enforced structurally: [`ReleaseWatch::wait`]
//! consumes the handle, so watching again requires an explicit re-subscribe.

use crate::service::{LockService, ServiceError};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Subscription source for release-record change signals.
pub trait ReleaseNotifier {
    /// Arm a one-shot watch on the release record for `(run_id, lock_id)`.
    ///
    /// The channel guarantees at least one signal on the returned handle if
    /// the watched record is later created or modified. A signal may arrive
    /// before the record is fully queryable; consumers handle that by
    /// re-reading and re-subscribing.
    fn subscribe(&self, run_id: &str, lock_id: &str) -> Result<ReleaseWatch, ServiceError>;
}

/// A one-shot watch handle returned by [`ReleaseNotifier::subscribe`].
#[derive(Debug)]
pub struct ReleaseWatch {
    rx: mpsc::Receiver<()>,
}

impl ReleaseWatch {
    /// Create a watch and the sender that fires it.
    pub(crate) fn channel() -> (mpsc::Sender<()>, ReleaseWatch) {
        let (tx, rx) = mpsc::channel();
        (tx, ReleaseWatch { rx })
    }

    /// Block until the change signal arrives.
    ///
    /// Consumes the handle: a watch fires at most once. Fails if the
    /// notifier dropped the subscription without ever delivering a signal.
    pub fn wait(self) -> Result<(), ServiceError> {
        self.rx.recv().map_err(|_| {
            ServiceError::Fatal(
                "notification channel closed before a signal was delivered".to_string(),
            )
        })
    }
}

/// Polling adapter for lock services without a native push channel.
///
/// `subscribe` spawns a watcher thread that re-reads the release record at
/// a fixed interval and fires the watch once a record exists. The directory
/// backend uses this; the in-memory backend pushes natively instead.
#[derive(Debug, Clone)]
pub struct PollingNotifier<S> {
    service: S,
    poll_interval: Duration,
}

impl<S> PollingNotifier<S> {
    /// Create a notifier polling `service` every `poll_interval`.
    pub fn new(service: S, poll_interval: Duration) -> Self {
        Self {
            service,
            poll_interval,
        }
    }
}

impl<S> ReleaseNotifier for PollingNotifier<S>
where
    S: LockService + Clone + Send + 'static,
{
    fn subscribe(&self, run_id: &str, lock_id: &str) -> Result<ReleaseWatch, ServiceError> {
        let (tx, watch) = ReleaseWatch::channel();
        let service = self.service.clone();
        let run_id = run_id.to_string();
        let lock_id = lock_id.to_string();
        let poll_interval = self.poll_interval;

        thread::Builder::new()
            .name(format!("watch-{}", lock_id))
            .spawn(move || {
                loop {
                    match service.fetch_release_record(&run_id, &lock_id) {
                        Ok(Some(_)) => {
                            // The subscriber may already be gone; nothing to do then.
                            let _ = tx.send(());
                            return;
                        }
                        Ok(None) => thread::sleep(poll_interval),
                        // Dropping the sender surfaces as Fatal at wait().
                        Err(_) => return,
                    }
                }
            })
            .map_err(|e| ServiceError::Fatal(format!("failed to spawn watcher thread: {}", e)))?;

        Ok(watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::memory::MemoryLockService;
    use chrono::Utc;

    #[test]
    fn watch_fires_once_signal_is_sent() {
        let (tx, watch) = ReleaseWatch::channel();
        tx.send(()).unwrap();
        assert!(watch.wait().is_ok());
    }

    #[test]
    fn watch_fails_when_sender_dropped_without_signal() {
        let (tx, watch) = ReleaseWatch::channel();
        drop(tx);
        let err = watch.wait().unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("closed before a signal"));
    }

    #[test]
    fn polling_notifier_fires_after_publication() {
        let service = MemoryLockService::new();
        let notifier = PollingNotifier::new(service.clone(), Duration::from_millis(5));

        let watch = notifier.subscribe("R1", "POINT_1").unwrap();

        // Publish from another thread after a short delay.
        let publisher = service.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish("R1", "POINT_1", Utc::now()).unwrap();
        });

        assert!(watch.wait().is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn polling_notifier_fires_immediately_for_existing_record() {
        let service = MemoryLockService::new();
        service.publish("R1", "POINT_1", Utc::now()).unwrap();

        let notifier = PollingNotifier::new(service, Duration::from_millis(5));
        let watch = notifier.subscribe("R1", "POINT_1").unwrap();
        assert!(watch.wait().is_ok());
    }
}
