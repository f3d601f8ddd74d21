//! Exit code constants for the lockstep CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config, uninitialized sync root)
//! - 2: Synchronization failure (one or more workers failed a barrier pass)
//! - 3: Lock service failure (backend store error outside a barrier pass)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid config, or uninitialized sync root.
pub const USER_ERROR: i32 = 1;

/// Synchronization failure: a worker's barrier pass failed fatally.
pub const SYNC_FAILURE: i32 = 2;

/// Lock service failure: the backend store failed outside a barrier pass.
pub const SERVICE_FAILURE: i32 = 3;
