//! Implementation of the `lockstep release` command.
//!
//! Publishes a barrier's release record with an operator-chosen action
//! timestamp. This is the manual counterpart to the auto-release policy:
//! with `auto_release: false`, workers block on each barrier until an
//! operator (or an external system driving this command) decides the
//! instant they all proceed.

use crate::cli::ReleaseArgs;
use crate::config::Config;
use crate::context::require_initialized;
use crate::error::{LockstepError, Result};
use crate::events::{Event, EventAction, append_event_best_effort};
use crate::service::dir::{DirLockService, ReleasePolicy};
use crate::service::validate_id;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::path::Path;

pub fn cmd_release(dir: &Path, args: ReleaseArgs) -> Result<()> {
    let ctx = require_initialized(dir)?;
    let config = Config::load(ctx.config_path())?;

    validate_id("run id", &args.run_id).map_err(|e| LockstepError::UserError(e.to_string()))?;
    validate_id("lock id", &args.lock_id).map_err(|e| LockstepError::UserError(e.to_string()))?;

    let action_at = match &args.at {
        Some(at) => DateTime::parse_from_rfc3339(at)
            .map_err(|e| {
                LockstepError::UserError(format!(
                    "invalid --at timestamp '{}': {} (expected RFC3339, e.g. 2024-05-01T12:00:00Z)",
                    at, e
                ))
            })?
            .with_timezone(&Utc),
        None => Utc::now() + Duration::milliseconds(args.delay_ms as i64),
    };

    let service = DirLockService::new(ctx.clone(), ReleasePolicy::Manual, config.journal_stale_ms);
    let record = service.manual_release(&args.run_id, &args.lock_id, action_at)?;

    append_event_best_effort(
        &ctx,
        &Event::new(EventAction::ReleasePublished)
            .with_run(&args.run_id)
            .with_details(json!({
                "lock_id": &record.lock_id,
                "action_at": record.action_at,
                "requests_observed": record.requests_observed,
            })),
    );

    println!(
        "Published release for barrier '{}' (run {}).",
        record.lock_id, record.run_id
    );
    println!();
    println!(
        "  Action at: {}",
        record.action_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
    );
    println!("  Requests:  {} observed so far", record.requests_observed);

    Ok(())
}
