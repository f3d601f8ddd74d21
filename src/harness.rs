//! Worker harness: fans a run out across concurrent virtual users.
//!
//! One OS thread per worker, each owning its own [`VirtualUser`]. Workers
//! share nothing in-process; all coordination goes through the lock
//! service. The harness always joins every thread — a worker that fails a
//! barrier (or panics) is reported in the [`ExerciseReport`] without
//! cutting the run short for anyone else.

use crate::notify::ReleaseNotifier;
use crate::service::LockService;
use crate::waiter::VirtualUser;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::thread;

/// One successfully crossed barrier.
#[derive(Debug, Clone, Serialize)]
pub struct BarrierPass {
    /// Barrier name.
    pub lock_id: String,

    /// The published action timestamp the worker was released at.
    pub action_at: DateTime<Utc>,

    /// When the worker actually returned from the barrier.
    pub passed_at: DateTime<Utc>,
}

/// Result of one worker's walk through the barrier list.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerOutcome {
    /// Worker identifier.
    pub user_id: String,

    /// Barriers crossed, in order, up to the first failure.
    pub passes: Vec<BarrierPass>,

    /// Failure message, if the worker did not finish the list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerOutcome {
    /// Whether this worker crossed every barrier.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn failed(user_id: String, passes: Vec<BarrierPass>, error: String) -> Self {
        Self {
            user_id,
            passes,
            error: Some(error),
        }
    }
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct ExerciseReport {
    /// Run identifier.
    pub run_id: String,

    /// One outcome per spawned worker, in worker order.
    pub workers: Vec<WorkerOutcome>,
}

impl ExerciseReport {
    /// Number of workers that failed.
    pub fn failed_count(&self) -> usize {
        self.workers.iter().filter(|w| !w.succeeded()).count()
    }

    /// Whether every worker crossed every barrier.
    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Drive `worker_count` concurrent workers through `barriers` in order.
///
/// `factory` builds one waiter per worker; worker IDs are the decimal
/// indices `0..worker_count`. Blocks until every worker has finished or
/// failed.
pub fn run_exercise<S, N, F>(
    run_id: &str,
    worker_count: u32,
    barriers: &[String],
    factory: F,
) -> ExerciseReport
where
    S: LockService + Send + 'static,
    N: ReleaseNotifier + Send + 'static,
    F: Fn(&str) -> VirtualUser<S, N>,
{
    let mut handles = Vec::new();
    for i in 0..worker_count {
        let user_id = i.to_string();
        let mut user = factory(&user_id);
        let barriers = barriers.to_vec();
        let spawn = thread::Builder::new()
            .name(format!("worker-{}", user_id))
            .spawn(move || run_worker(&mut user, &barriers));
        handles.push((user_id, spawn));
    }

    let mut workers = Vec::new();
    for (user_id, spawn) in handles {
        let outcome = match spawn {
            Ok(handle) => match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => {
                    WorkerOutcome::failed(user_id, Vec::new(), "worker thread panicked".to_string())
                }
            },
            Err(e) => WorkerOutcome::failed(
                user_id,
                Vec::new(),
                format!("failed to spawn worker thread: {}", e),
            ),
        };
        workers.push(outcome);
    }

    ExerciseReport {
        run_id: run_id.to_string(),
        workers,
    }
}

/// A worker never attempts barrier `k+1` before finishing barrier `k`.
fn run_worker<S, N>(user: &mut VirtualUser<S, N>, barriers: &[String]) -> WorkerOutcome
where
    S: LockService,
    N: ReleaseNotifier,
{
    let mut passes = Vec::new();
    for lock_id in barriers {
        match user.wait_for_sync(lock_id) {
            Ok(action_at) => passes.push(BarrierPass {
                lock_id: lock_id.clone(),
                action_at,
                passed_at: Utc::now(),
            }),
            Err(e) => {
                return WorkerOutcome::failed(user.user_id().to_string(), passes, e.to_string());
            }
        }
    }

    WorkerOutcome {
        user_id: user.user_id().to_string(),
        passes,
        error: None,
    }
}
