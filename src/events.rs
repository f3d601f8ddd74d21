//! Event logging subsystem for lockstep.
//!
//! Append-only NDJSON audit log (one JSON object per line) at
//! `<root>/events.ndjson`, for correlating harness activity with
//! lock-service-side logs after a run. Appends are best-effort from the
//! command layer: a failed append warns on stderr but never fails the
//! command that produced it.
//!
//! Each event carries:
//! - `ts`: RFC3339 timestamp
//! - `action`: what happened (init, run_started, barrier_passed, ...)
//! - `actor`: the `user@HOST` that performed it
//! - `run`: optional run ID for run-scoped events
//! - `details`: freeform object with action-specific fields

use crate::context::SyncContext;
use crate::error::{LockstepError, Result};
use crate::service::owner_string;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Sync root initialized
    Init,
    /// Harness started a run
    RunStarted,
    /// A release record was published manually
    ReleasePublished,
    /// A worker crossed a barrier
    BarrierPassed,
    /// A worker failed its barrier pass
    WorkerFailed,
    /// Harness finished a run
    RunCompleted,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Init => write!(f, "init"),
            EventAction::RunStarted => write!(f, "run_started"),
            EventAction::ReleasePublished => write!(f, "release_published"),
            EventAction::BarrierPassed => write!(f, "barrier_passed"),
            EventAction::WorkerFailed => write!(f, "worker_failed"),
            EventAction::RunCompleted => write!(f, "run_completed"),
        }
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The action that was performed.
    pub action: EventAction,

    /// The actor who performed the action (e.g. `user@HOST`).
    pub actor: String,

    /// Optional run ID for run-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Freeform details object with action-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event with the given action, stamped now.
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: owner_string(),
            run: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the run ID for this event.
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run = Some(run_id.into());
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LockstepError::UserError(format!("failed to serialize event: {}", e)))
    }
}

/// Append an event to the sync root's audit log.
pub fn append_event(ctx: &SyncContext, event: &Event) -> Result<()> {
    let path = ctx.events_path();
    let line = event.to_ndjson_line()?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| {
            LockstepError::UserError(format!(
                "failed to open events log '{}': {}",
                path.display(),
                e
            ))
        })?;

    writeln!(file, "{}", line).map_err(|e| {
        LockstepError::UserError(format!(
            "failed to append to events log '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Append an event, warning on stderr instead of failing.
pub fn append_event_best_effort(ctx: &SyncContext, event: &Event) {
    if let Err(e) = append_event(ctx, event) {
        eprintln!("Warning: failed to log {} event: {}", event.action, e);
    }
}
