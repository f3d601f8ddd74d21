//! Implementation of the `lockstep run` command.
//!
//! Loads the sync root config, applies CLI overrides, and fans the run out
//! across worker threads against the directory backend. With auto-release
//! enabled the quorum equals the worker count, so the run is self-contained;
//! with it disabled the run blocks until an operator publishes each barrier
//! via `lockstep release`.
//!
//! Each invocation gets a fresh run ID (timestamp-derived by default);
//! re-running with an explicit `--run-id` that was already used fails with
//! duplicate-request errors, since lock requests are write-once.

use crate::cli::RunArgs;
use crate::config::Config;
use crate::context::{SyncContext, require_initialized};
use crate::error::{LockstepError, Result};
use crate::events::{Event, EventAction, append_event_best_effort};
use crate::fs::atomic_write_file;
use crate::harness::{ExerciseReport, run_exercise};
use crate::notify::PollingNotifier;
use crate::service::dir::{DirLockService, ReleasePolicy};
use crate::service::validate_id;
use crate::waiter::VirtualUser;
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

pub fn cmd_run(dir: &Path, args: RunArgs) -> Result<()> {
    let ctx = require_initialized(dir)?;
    let mut config = Config::load(ctx.config_path())?;

    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if !args.barriers.is_empty() {
        config.barriers = args.barriers;
    }
    config.validate()?;

    let run_id = args.run_id.unwrap_or_else(default_run_id);
    validate_id("run id", &run_id).map_err(|e| LockstepError::UserError(e.to_string()))?;

    let policy = if config.auto_release {
        ReleasePolicy::OnQuorum {
            quorum: config.workers,
            release_delay_ms: config.release_delay_ms,
        }
    } else {
        ReleasePolicy::Manual
    };
    let service = DirLockService::new(ctx.clone(), policy, config.journal_stale_ms);
    let notifier = PollingNotifier::new(
        service.clone(),
        Duration::from_millis(config.notify_poll_ms),
    );

    eprintln!("lockstep run starting");
    eprintln!("  root:     {}", ctx.root.display());
    eprintln!("  run:      {}", run_id);
    eprintln!("  workers:  {}", config.workers);
    eprintln!("  barriers: {}", config.barriers.join(" -> "));
    eprintln!(
        "  release:  {}",
        if config.auto_release {
            "auto (on quorum)"
        } else {
            "manual (`lockstep release`)"
        }
    );
    eprintln!();

    append_event_best_effort(
        &ctx,
        &Event::new(EventAction::RunStarted)
            .with_run(&run_id)
            .with_details(json!({
                "workers": config.workers,
                "barriers": &config.barriers,
                "auto_release": config.auto_release,
            })),
    );

    let settings = config.sync_settings();
    let report = run_exercise(&run_id, config.workers, &config.barriers, |user_id| {
        VirtualUser::new(
            service.clone(),
            notifier.clone(),
            user_id,
            run_id.as_str(),
            settings.clone(),
        )
    });

    log_outcomes(&ctx, &report);
    write_report(&ctx, &report)?;
    print_summary(&ctx, &report);

    if !report.all_succeeded() {
        return Err(LockstepError::SyncError(format!(
            "{} of {} workers failed (see {})",
            report.failed_count(),
            report.workers.len(),
            ctx.report_path(&report.run_id).display()
        )));
    }
    Ok(())
}

/// Timestamp-derived run ID, unique per invocation for practical purposes.
fn default_run_id() -> String {
    Utc::now().format("%Y-%m-%d-%H-%M-%S-%3f").to_string()
}

fn log_outcomes(ctx: &SyncContext, report: &ExerciseReport) {
    for worker in &report.workers {
        for pass in &worker.passes {
            append_event_best_effort(
                ctx,
                &Event::new(EventAction::BarrierPassed)
                    .with_run(&report.run_id)
                    .with_details(json!({
                        "user_id": &worker.user_id,
                        "lock_id": &pass.lock_id,
                        "action_at": pass.action_at,
                        "passed_at": pass.passed_at,
                    })),
            );
        }
        if let Some(error) = &worker.error {
            append_event_best_effort(
                ctx,
                &Event::new(EventAction::WorkerFailed)
                    .with_run(&report.run_id)
                    .with_details(json!({
                        "user_id": &worker.user_id,
                        "error": error,
                    })),
            );
        }
    }

    append_event_best_effort(
        ctx,
        &Event::new(EventAction::RunCompleted)
            .with_run(&report.run_id)
            .with_details(json!({
                "workers": report.workers.len(),
                "failed": report.failed_count(),
            })),
    );
}

fn write_report(ctx: &SyncContext, report: &ExerciseReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| LockstepError::UserError(format!("failed to serialize run report: {}", e)))?;
    atomic_write_file(ctx.report_path(&report.run_id), &json)
}

fn print_summary(ctx: &SyncContext, report: &ExerciseReport) {
    for worker in &report.workers {
        match &worker.error {
            None => {
                let passes: Vec<String> = worker
                    .passes
                    .iter()
                    .map(|p| {
                        format!(
                            "{} @ {}",
                            p.lock_id,
                            p.passed_at.format("%H:%M:%S%.3f")
                        )
                    })
                    .collect();
                println!("  user {:>4}  ok    {}", worker.user_id, passes.join(", "));
            }
            Some(error) => {
                println!("  user {:>4}  FAIL  {}", worker.user_id, error);
            }
        }
    }
    println!();
    println!(
        "{} of {} workers completed (report: {})",
        report.workers.len() - report.failed_count(),
        report.workers.len(),
        ctx.report_path(&report.run_id).display()
    );
}
