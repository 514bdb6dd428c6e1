//! Exit code logic for the paperfetch process.
//!
//! Single responsibility: map batch success/failure counts to the process exit outcome.

use crate::ProcessExit;

/// Determines the process exit outcome from succeeded and failed identifier counts.
pub(crate) fn determine_exit_outcome(succeeded: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if succeeded > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
