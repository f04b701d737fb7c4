//! Process exit codes (spec.md §6.2).

use helm_errors::{ErrorKind, HelmError};

/// Command completed successfully.
pub const SUCCESS: i32 = 0;
/// Generic failure.
pub const FAILURE: i32 = 1;
/// Parse or usage error.
pub const USAGE: i32 = 2;
/// The command timed out.
pub const TIMEOUT: i32 = 124;
/// Interrupted by a signal (SIGINT).
pub const INTERRUPTED: i32 = 130;

/// Map an error to the exit code single-shot mode reports.
#[must_use]
pub fn code_for(error: &HelmError) -> i32 {
    match error.kind() {
        ErrorKind::Timeout => TIMEOUT,
        ErrorKind::Cancelled => INTERRUPTED,
        ErrorKind::SchemaError | ErrorKind::Config => USAGE,
        _ => FAILURE,
    }
}
