//! Stable exit codes for `upkeep` commands.

/// Command succeeded, including the "nothing to do" early returns of `run`.
pub const OK: i32 = 0;
/// Invalid configuration, unreadable inputs or other command errors.
pub const INVALID: i32 = 1;
/// `upkeep run` stopped because the kill switch was engaged.
pub const ABORTED: i32 = 2;
