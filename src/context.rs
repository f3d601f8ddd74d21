//! Sync-root resolution for lockstep.
//!
//! All on-disk coordination state lives under a single sync root directory
//! shared by every participating process (default `.lockstep/`). This
//! module owns that layout so commands and the directory backend never
//! hand-build paths:
//!
//! ```text
//! <root>/
//!   config.yaml                        # written by `lockstep init`
//!   events.ndjson                      # append-only audit log
//!   runs/<RUN_ID>/
//!     report.json                      # written after `lockstep run`
//!     requests/<LOCK_ID>.lock          # transient journal lock
//!     requests/<LOCK_ID>/<USER_ID>.json
//!     releases/<LOCK_ID>.json
//! ```

use crate::error::{LockstepError, Result};
use std::path::{Path, PathBuf};

/// Resolved paths under one sync root.
///
/// All paths are derived from `root`; nothing is touched on disk until a
/// command or the directory backend writes through these helpers.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// The sync root directory shared by all participants.
    pub root: PathBuf,
}

impl SyncContext {
    /// Wrap a sync root path without checking anything on disk.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    /// Path to the append-only audit log.
    pub fn events_path(&self) -> PathBuf {
        self.root.join("events.ndjson")
    }

    /// Directory holding one subdirectory per run.
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Directory for one run's state.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(run_id)
    }

    /// Path to a run's post-exercise report.
    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("report.json")
    }

    /// Directory holding one request record per worker for a barrier.
    pub fn requests_dir(&self, run_id: &str, lock_id: &str) -> PathBuf {
        self.run_dir(run_id).join("requests").join(lock_id)
    }

    /// Path to one worker's request record.
    pub fn request_path(&self, run_id: &str, lock_id: &str, user_id: &str) -> PathBuf {
        self.requests_dir(run_id, lock_id)
            .join(format!("{}.json", user_id))
    }

    /// Path to a barrier's journal lock file.
    ///
    /// Lives next to (not inside) the barrier's request directory so a
    /// request count never mistakes the lock for a request record.
    pub fn journal_lock_path(&self, run_id: &str, lock_id: &str) -> PathBuf {
        self.run_dir(run_id)
            .join("requests")
            .join(format!("{}.lock", lock_id))
    }

    /// Directory holding release records for a run.
    pub fn releases_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("releases")
    }

    /// Path to a barrier's release record.
    pub fn release_path(&self, run_id: &str, lock_id: &str) -> PathBuf {
        self.releases_dir(run_id).join(format!("{}.json", lock_id))
    }

    /// Whether `lockstep init` has been run for this root.
    pub fn is_initialized(&self) -> bool {
        self.config_path().is_file()
    }
}

/// Resolve a sync context, requiring that the root has been initialized.
pub fn require_initialized<P: AsRef<Path>>(root: P) -> Result<SyncContext> {
    let ctx = SyncContext::new(root);
    if !ctx.is_initialized() {
        return Err(LockstepError::UserError(format!(
            "sync root '{}' is not initialized (missing {})\n\n\
             Run `lockstep init` first, or point --dir at an initialized root.",
            ctx.root.display(),
            ctx.config_path().display()
        )));
    }
    Ok(ctx)
}
