//! Terminal run summary.

use serde::Serialize;

use crate::core::state::GlobalState;
use crate::core::task_store::TaskStore;
use crate::core::types::ExecutionRecord;

/// Terminal state of the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every task completed.
    Completed,
    /// Nothing executable and recovery produced no new tasks.
    BlockedNoNewTasks,
    /// The iteration bound was exhausted.
    MaxIterationsReached,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::BlockedNoNewTasks => "blocked_no_new_tasks",
            RunOutcome::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// `completed / total`, `0.0` for an empty plan.
    pub success_rate: f64,
    pub iterations: u32,
    pub final_state: String,
    /// Wall time between the first and last execution-log entries.
    pub elapsed_ms: Option<u64>,
}

pub fn summarize(
    outcome: RunOutcome,
    store: &TaskStore,
    state: &GlobalState,
    log: &[ExecutionRecord],
    iterations: u32,
) -> RunSummary {
    let counts = store.counts();
    let success_rate = if counts.total == 0 {
        0.0
    } else {
        counts.completed as f64 / counts.total as f64
    };
    let elapsed_ms = match (log.first(), log.last()) {
        (Some(first), Some(last)) => Some(
            (last.timestamp - first.timestamp)
                .num_milliseconds()
                .max(0) as u64,
        ),
        _ => None,
    };

    RunSummary {
        outcome,
        total: counts.total,
        completed: counts.completed,
        failed: counts.failed,
        pending: counts.pending,
        success_rate,
        iterations,
        final_state: state.current_state().to_string(),
        elapsed_ms,
    }
}
