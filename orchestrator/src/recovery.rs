//! Recovery after failed dispatches and stalled plans.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::recovery::retry_task;
use crate::core::state::GlobalState;
use crate::core::task_store::TaskStore;
use crate::core::types::{Task, TaskStatus};

/// Generates retry tasks and merges them into the store.
///
/// A failed task is retried at most once, and never when its lineage already
/// reached `max_attempts` executions.
#[derive(Debug, Clone)]
pub struct RecoveryController {
    max_attempts: u32,
}

impl RecoveryController {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Remediation tasks for `failed`: a single retry of the same instruction.
    pub fn generate_recovery(
        &self,
        failed: &Task,
        error_context: &str,
        state: &GlobalState,
    ) -> Vec<Task> {
        debug!(
            task_id = %failed.id,
            error = error_context,
            current_state = state.current_state(),
            "generating recovery"
        );
        vec![retry_task(failed, Utc::now())]
    }

    /// Recover the failed task `failed_id`. Returns the number of tasks inserted.
    #[instrument(skip_all, fields(task_id = failed_id))]
    pub fn recover(&self, store: &mut TaskStore, failed_id: &str, state: &GlobalState) -> usize {
        let Some(failed) = store.get(failed_id) else {
            warn!("recovery requested for unknown task");
            return 0;
        };
        if failed.status != TaskStatus::Failed {
            debug!(status = %failed.status, "task is not failed, nothing to recover");
            return 0;
        }
        if store.has_retry_of(failed_id) {
            debug!("task already has a retry");
            return 0;
        }
        if failed.attempt + 1 >= self.max_attempts {
            info!(
                attempt = failed.attempt,
                max_attempts = self.max_attempts,
                "retry limit reached, not recovering"
            );
            return 0;
        }

        let error_context = failed
            .result
            .as_ref()
            .map(|result| result.primary_text().to_string())
            .unwrap_or_default();
        let tasks = self.generate_recovery(failed, &error_context, state);
        insert_all(store, tasks)
    }

    /// Recover every failed task in the store, for a plan with nothing executable.
    pub fn recover_stalled(&self, store: &mut TaskStore, state: &GlobalState) -> usize {
        let failed: Vec<String> = store
            .with_status(TaskStatus::Failed)
            .map(|task| task.id.clone())
            .collect();
        failed
            .iter()
            .map(|id| self.recover(store, id, state))
            .sum()
    }
}

fn insert_all(store: &mut TaskStore, tasks: Vec<Task>) -> usize {
    let mut inserted = 0;
    for mut task in tasks {
        task.id = store.unique_id(&task.id);
        let id = task.id.clone();
        match store.insert(task) {
            Ok(()) => {
                info!(task_id = %id, "recovery task inserted");
                inserted += 1;
            }
            Err(err) => warn!(error = %err, "recovery task dropped"),
        }
    }
    inserted
}
