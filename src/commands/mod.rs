//! Command implementations for lockstep.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command resolves the sync root it operates on
//! from the global `--dir` flag.

mod init;
mod release;
mod run;
mod status;

use crate::cli::Command;
use crate::error::Result;
use std::path::Path;

/// Dispatch a command to its implementation.
///
/// This is the main entry point for command execution. Each command
/// is routed to its handler function.
pub fn dispatch(dir: &Path, command: Command) -> Result<()> {
    match command {
        Command::Init => init::cmd_init(dir),
        Command::Run(args) => run::cmd_run(dir, args),
        Command::Release(args) => release::cmd_release(dir, args),
        Command::Status(args) => status::cmd_status(dir, args),
    }
}
