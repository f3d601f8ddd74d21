//! Filesystem helpers for lockstep.
//!
//! Mutable state files (config, run reports) go through atomic writes so a
//! crash mid-write never leaves a half-written file behind. Write-once
//! coordination records use exclusive create instead and live in the
//! directory backend.

mod atomic;

pub use atomic::{atomic_write, atomic_write_file};
