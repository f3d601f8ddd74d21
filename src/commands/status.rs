//! Implementation of the `lockstep status` command.
//!
//! Read-only inspection of a sync root: which runs exist, and per barrier
//! how many workers have registered, whether the release is published, and
//! whether a journal lock is lingering (a stale one usually means a worker
//! crashed mid-request).

use crate::cli::StatusArgs;
use crate::config::Config;
use crate::context::require_initialized;
use crate::error::Result;
use crate::service::LockService;
use crate::service::dir::{DirLockService, ReleasePolicy};
use std::path::Path;

pub fn cmd_status(dir: &Path, args: StatusArgs) -> Result<()> {
    let ctx = require_initialized(dir)?;
    let config = Config::load(ctx.config_path())?;
    let service = DirLockService::new(ctx, ReleasePolicy::Manual, config.journal_stale_ms);

    match args.run_id {
        None => list_runs(&service),
        Some(run_id) => show_run(&service, &config, &run_id),
    }
}

fn list_runs(service: &DirLockService) -> Result<()> {
    let runs = service.list_runs()?;

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!("Runs ({}):", runs.len());
    println!();
    for run_id in &runs {
        let barriers = service.list_barriers(run_id)?;
        println!("  {}  ({} barriers)", run_id, barriers.len());
    }
    println!();
    println!("Use `lockstep status --run-id <RUN>` for barrier detail.");

    Ok(())
}

fn show_run(service: &DirLockService, config: &Config, run_id: &str) -> Result<()> {
    let barriers = service.list_barriers(run_id)?;

    if barriers.is_empty() {
        println!("Run '{}' has no barrier activity.", run_id);
        return Ok(());
    }

    println!("Run {}:", run_id);
    println!();

    for lock_id in &barriers {
        let requests = service.list_requests(run_id, lock_id)?;
        let release = service.fetch_release_record(run_id, lock_id)?;

        println!("  {}:", lock_id);
        println!("    Requests:  {}", requests.len());

        match release {
            Some(record) => {
                println!(
                    "    Released:  yes ({} requests observed by publisher)",
                    record.requests_observed
                );
                println!(
                    "    Action at: {}",
                    record.action_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
                );
                println!("    Publisher: {}", record.publisher);
            }
            None => println!("    Released:  not yet"),
        }

        if let Some(lock) = service.journal_lock(run_id, lock_id) {
            let stale = lock.age_ms() > config.journal_stale_ms as i64;
            println!(
                "    Journal lock: held by {}{}",
                lock.owner,
                if stale { " (STALE)" } else { "" }
            );
        }
        println!();
    }

    Ok(())
}
