//! CLI argument parsing for lockstep.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lockstep: barrier-synchronization harness for distributed load testing.
///
/// Workers coordinate through a shared sync root directory:
/// - each worker registers a lock request per barrier
/// - the backend publishes a release record with an action timestamp
/// - every worker crosses the barrier at that instant
#[derive(Parser, Debug)]
#[command(name = "lockstep")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Sync root directory shared by all participants.
    #[arg(long, global = true, default_value = ".lockstep")]
    pub dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse CLI arguments from the process environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Available commands for lockstep.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a sync root.
    ///
    /// Creates the directory layout and writes a commented default
    /// config.yaml. Refuses to overwrite an existing config.
    Init,

    /// Run a synchronization exercise.
    ///
    /// Spawns the configured number of workers and drives each through
    /// the barrier list in order, then prints a per-worker report.
    Run(RunArgs),

    /// Publish a release record for a barrier.
    ///
    /// The manual counterpart to auto-release: sets the action timestamp
    /// at which all workers registered for the barrier will proceed.
    Release(ReleaseArgs),

    /// Show runs and barrier state.
    ///
    /// Without --run-id, lists known runs. With it, shows each barrier's
    /// request count, release state, and journal lock health.
    Status(StatusArgs),
}

/// Arguments for the `run` command.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Run identifier; defaults to a timestamp-derived unique ID.
    #[arg(long)]
    pub run_id: Option<String>,

    /// Override the configured worker count.
    #[arg(long)]
    pub workers: Option<u32>,

    /// Barrier name, in order; repeatable. Overrides the configured list.
    #[arg(long = "barrier")]
    pub barriers: Vec<String>,
}

/// Arguments for the `release` command.
#[derive(clap::Args, Debug)]
pub struct ReleaseArgs {
    /// Run to release the barrier for.
    #[arg(long)]
    pub run_id: String,

    /// Barrier to release.
    #[arg(long)]
    pub lock_id: String,

    /// Action timestamp, RFC3339 (e.g. 2024-05-01T12:00:00Z).
    /// Defaults to now plus --delay-ms.
    #[arg(long)]
    pub at: Option<String>,

    /// Milliseconds from now to the action timestamp when --at is absent.
    #[arg(long, default_value_t = 2_000)]
    pub delay_ms: u64,
}

/// Arguments for the `status` command.
#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Show one run in detail instead of listing runs.
    #[arg(long)]
    pub run_id: Option<String>,
}
