//! Stable exit codes for foreman CLI commands.

/// Command succeeded, or a loop stopped cleanly on interrupt.
pub const OK: i32 = 0;
/// Invalid configuration, unknown role, or any other error.
pub const INVALID: i32 = 1;
/// A `--once` cycle ran but at least one item or trigger failed.
pub const CYCLE_FAILURES: i32 = 3;
