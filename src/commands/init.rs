//! Implementation of the `lockstep init` command.
//!
//! Creates the sync root directory layout and writes the default commented
//! `config.yaml`. Initialization is refused when a config already exists:
//! a sync root may be shared by many processes and silently resetting its
//! configuration mid-exercise would be destructive.

use crate::config::Config;
use crate::context::SyncContext;
use crate::error::{LockstepError, Result};
use crate::events::{Event, EventAction, append_event_best_effort};
use crate::fs::atomic_write_file;
use serde_json::json;
use std::path::Path;

pub fn cmd_init(dir: &Path) -> Result<()> {
    let ctx = SyncContext::new(dir);

    if ctx.is_initialized() {
        return Err(LockstepError::UserError(format!(
            "sync root '{}' is already initialized\n\n\
             Edit '{}' directly to change settings.",
            ctx.root.display(),
            ctx.config_path().display()
        )));
    }

    std::fs::create_dir_all(ctx.runs_dir()).map_err(|e| {
        LockstepError::UserError(format!(
            "failed to create sync root '{}': {}",
            ctx.root.display(),
            e
        ))
    })?;

    atomic_write_file(ctx.config_path(), Config::default_yaml())?;

    append_event_best_effort(
        &ctx,
        &Event::new(EventAction::Init).with_details(json!({
            "root": ctx.root.display().to_string(),
        })),
    );

    println!("Initialized sync root: {}", ctx.root.display());
    println!();
    println!("  config: {}", ctx.config_path().display());
    println!("  runs:   {}", ctx.runs_dir().display());
    println!();
    println!(
        "Next: edit the config, then `lockstep run --dir {}`.",
        ctx.root.display()
    );

    Ok(())
}
