//! Configuration model for lockstep.
//!
//! This module defines the Config struct that represents `<root>/config.yaml`.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for every field, and validation of config values.
//!
//! Everything here is static run configuration: it is read once at command
//! startup and never reloaded.

use crate::error::{LockstepError, Result};
use crate::service::validate_id;
use crate::waiter::SyncSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a sync root.
///
/// This struct represents the contents of `<root>/config.yaml`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Exercise shape
    // =========================================================================
    /// Number of concurrent workers the harness spawns.
    pub workers: u32,

    /// Ordered list of barrier names every worker crosses.
    pub barriers: Vec<String>,

    // =========================================================================
    // Waiter settings
    // =========================================================================
    /// Attempt budget for lock-request submission under contention.
    /// Sized for hundreds of workers contending on one barrier.
    pub max_request_retries: u32,

    /// Upper bound (ms) for the random backoff between request attempts.
    pub backoff_max_ms: u64,

    /// Poll interval (ms) while waiting for the action timestamp; barrier
    /// precision is one interval.
    pub poll_interval_ms: u64,

    /// Poll interval (ms) for the directory backend's release watch.
    pub notify_poll_ms: u64,

    // =========================================================================
    // Release settings
    // =========================================================================
    /// Whether the backend publishes a release once every worker has
    /// requested a barrier. With `false`, releases come from
    /// `lockstep release`.
    pub auto_release: bool,

    /// Gap (ms) between publication and the action timestamp.
    pub release_delay_ms: u64,

    // =========================================================================
    // Journal lock settings
    // =========================================================================
    /// Age (ms) after which a barrier's journal lock is considered
    /// abandoned and may be broken.
    pub journal_stale_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            barriers: default_barriers(),
            max_request_retries: default_max_request_retries(),
            backoff_max_ms: default_backoff_max_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            notify_poll_ms: default_notify_poll_ms(),
            auto_release: default_true(),
            release_delay_ms: default_release_delay_ms(),
            journal_stale_ms: default_journal_stale_ms(),
        }
    }
}

// Default value functions for serde
fn default_workers() -> u32 {
    3
}
fn default_barriers() -> Vec<String> {
    vec!["POINT_1".to_string(), "POINT_2".to_string()]
}
fn default_max_request_retries() -> u32 {
    10_000
}
fn default_backoff_max_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_notify_poll_ms() -> u64 {
    200
}
fn default_true() -> bool {
    true
}
fn default_release_delay_ms() -> u64 {
    2_000
}
fn default_journal_stale_ms() -> u64 {
    30_000
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            LockstepError::UserError(format!(
                "failed to read config '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            LockstepError::UserError(format!(
                "failed to parse config '{}': {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Validate config values, returning a user-actionable error.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LockstepError::UserError(
                "config: workers must be at least 1".to_string(),
            ));
        }
        if self.barriers.is_empty() {
            return Err(LockstepError::UserError(
                "config: barriers must name at least one synchronization point".to_string(),
            ));
        }
        for (i, barrier) in self.barriers.iter().enumerate() {
            validate_id("barrier name", barrier)
                .map_err(|e| LockstepError::UserError(format!("config: {}", e)))?;
            if self.barriers[..i].contains(barrier) {
                return Err(LockstepError::UserError(format!(
                    "config: barrier '{}' appears more than once; a barrier is crossed once per run",
                    barrier
                )));
            }
        }
        if self.max_request_retries == 0 {
            return Err(LockstepError::UserError(
                "config: max_request_retries must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 || self.notify_poll_ms == 0 {
            return Err(LockstepError::UserError(
                "config: poll intervals must be at least 1ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Waiter settings derived from this config.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            max_request_retries: self.max_request_retries,
            backoff_max_ms: self.backoff_max_ms,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// The commented config template written by `lockstep init`.
    pub fn default_yaml() -> &'static str {
        DEFAULT_CONFIG_YAML
    }
}

const DEFAULT_CONFIG_YAML: &str = "\
# lockstep sync root configuration.
#
# All values are static: they are read when a command starts and never
# reloaded.

# Number of concurrent workers `lockstep run` spawns.
workers: 3

# Ordered list of barrier names every worker crosses.
barriers:
  - POINT_1
  - POINT_2

# Attempt budget for lock-request submission under contention.
max_request_retries: 10000

# Upper bound (ms) for the random backoff between request attempts.
backoff_max_ms: 5000

# Poll interval (ms) while waiting for a barrier's action timestamp.
poll_interval_ms: 1000

# Poll interval (ms) for the release-record watch.
notify_poll_ms: 200

# Publish the release automatically once every worker has requested a
# barrier. Set to false to publish manually with `lockstep release`.
auto_release: true

# Gap (ms) between release publication and the action timestamp.
release_delay_ms: 2000

# Age (ms) after which an abandoned journal lock may be broken.
journal_stale_ms: 30000
";
