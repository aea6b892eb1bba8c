//! Stable exit codes for orchestrator CLI commands.

use crate::core::summary::RunOutcome;

/// Command succeeded, or the run completed every task.
pub const OK: i32 = 0;
/// Invalid config or plan, or any other error.
pub const INVALID: i32 = 1;
/// The run stopped with nothing executable and no recovery tasks.
pub const BLOCKED: i32 = 2;
/// The run exhausted `max_iterations`.
pub const MAX_ITERATIONS: i32 = 3;

pub fn for_outcome(outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed => OK,
        RunOutcome::BlockedNoNewTasks => BLOCKED,
        RunOutcome::MaxIterationsReached => MAX_ITERATIONS,
    }
}
