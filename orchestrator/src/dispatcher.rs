//! Run one task through its execution unit and fold the outcome into the global state.

use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::state::{GlobalState, StateSource};
use crate::core::state_update::{
    NARRATOR_HISTORY, accept_description, fallback_summary, result_preview,
};
use crate::core::types::{ExecutionRecord, InstructionKind, Task, TaskResult, TaskStatus};
use crate::io::oracle::{HistoryEntryView, StateNarrator, StateQuery, StateUpdate, TaskView};
use crate::io::units::UnitRegistry;

/// Context variable holding a task's output once it succeeds.
pub fn result_key(task_id: &str) -> String {
    format!("result_{task_id}")
}

/// Executes tasks against the unit registry. Never returns an error: every
/// failure becomes a failed [`TaskResult`].
pub struct Dispatcher<'a, N: StateNarrator + ?Sized> {
    units: &'a UnitRegistry,
    narrator: &'a N,
}

impl<'a, N: StateNarrator + ?Sized> Dispatcher<'a, N> {
    pub fn new(units: &'a UnitRegistry, narrator: &'a N) -> Self {
        Self { units, narrator }
    }

    #[instrument(skip_all, fields(task_id = %task.id, executor = %task.executor_name))]
    pub fn execute(&self, task: &mut Task, state: &mut GlobalState) -> ExecutionRecord {
        let started = Instant::now();
        task.set_status(TaskStatus::Running);
        info!(kind = task.instruction_kind.as_str(), "dispatching task");

        let result = self.run_unit(task);
        task.finish(result.clone());
        if result.success {
            info!("task completed");
        } else {
            warn!(error = %result.primary_text(), "task failed");
        }

        self.update_state(task, &result, state);
        if result.success && !task.expected_output.trim().is_empty() {
            state.set_context_variable(result_key(&task.id), result.output.clone());
        }

        ExecutionRecord {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            executor_name: task.executor_name.clone(),
            result,
            timestamp: Utc::now(),
            duration: started.elapsed(),
        }
    }

    fn run_unit(&self, task: &Task) -> TaskResult {
        let unit = match self.units.get(&task.executor_name) {
            Ok(unit) => unit,
            Err(err) => return TaskResult::failure(err.to_string()),
        };
        let outcome = match task.instruction_kind {
            InstructionKind::Execution => unit.execute(&task.instruction),
            InstructionKind::Information => unit.chat(&task.instruction),
        };
        outcome.unwrap_or_else(|err| TaskResult::failure(format!("{err:#}")))
    }

    fn update_state(&self, task: &Task, result: &TaskResult, state: &mut GlobalState) {
        let fallback = fallback_summary(state.original_goal(), task, result);
        let update = StateUpdate::TaskFinished {
            task: TaskView::from(task),
            success: result.success,
            result_preview: result_preview(result),
        };
        update_state(
            self.narrator,
            state,
            update,
            fallback,
            StateSource::Executor(task.executor_name.clone()),
        );
    }
}

/// Replace the current state with the narrator's account of `update`, or
/// with `fallback` when narration fails or comes back too short.
pub fn update_state<N: StateNarrator + ?Sized>(
    narrator: &N,
    state: &mut GlobalState,
    update: StateUpdate,
    fallback: String,
    source: StateSource,
) {
    let query = StateQuery {
        original_goal: state.original_goal().to_string(),
        current_state: state.current_state().to_string(),
        recent_history: state
            .recent_history(NARRATOR_HISTORY)
            .iter()
            .map(HistoryEntryView::from)
            .collect(),
        update,
    };

    let next = match narrator.describe_state(&query) {
        Ok(raw) => accept_description(&raw).unwrap_or_else(|| {
            warn!("narrated state too short, using fallback summary");
            fallback
        }),
        Err(err) => {
            warn!(error = %err, "state narration failed, using fallback summary");
            fallback
        }
    };
    state.replace(next, source);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingUnit, ScriptedOracle, ScriptedUnit, UnitCall, WORKER, task};

    fn registry(unit: ScriptedUnit) -> UnitRegistry {
        UnitRegistry::new().with(WORKER, unit)
    }

    #[test]
    fn success_stores_result_and_context_variable() {
        let units = registry(ScriptedUnit::succeeding("X done"));
        let oracle = ScriptedOracle::new();
        let mut state = GlobalState::new("produce X");
        let mut t = task("t1", "none");

        let record = Dispatcher::new(&units, &oracle).execute(&mut t, &mut state);

        assert!(record.result.success);
        assert_eq!(record.task_id, "t1");
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result.as_ref().map(|r| r.output.as_str()), Some("X done"));
        assert_eq!(state.context_variable("result_t1"), Some("X done"));
        assert_eq!(state.current_state(), "produce X; succeeded: t1 task");
        let last = state.history().last().expect("history entry");
        assert_eq!(last.source, StateSource::Executor(WORKER.to_string()));
    }

    #[test]
    fn empty_expected_output_skips_context_variable() {
        let units = registry(ScriptedUnit::succeeding("ok"));
        let oracle = ScriptedOracle::new();
        let mut state = GlobalState::new("g");
        let mut t = task("t1", "none");
        t.expected_output = "  ".to_string();

        Dispatcher::new(&units, &oracle).execute(&mut t, &mut state);

        assert_eq!(state.context_variable("result_t1"), None);
    }

    #[test]
    fn unit_error_becomes_failed_result() {
        let units = registry(ScriptedUnit::erroring("segfault in tool"));
        let oracle = ScriptedOracle::new();
        let mut state = GlobalState::new("g");
        let mut t = task("t1", "none");

        let record = Dispatcher::new(&units, &oracle).execute(&mut t, &mut state);

        assert!(!record.result.success);
        assert_eq!(record.result.error.as_deref(), Some("segfault in tool"));
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(state.context_variable("result_t1"), None);
        assert_eq!(state.current_state(), "g; failed: t1 task");
    }

    #[test]
    fn failed_result_from_unit_marks_task_failed() {
        let units = UnitRegistry::new().with(
            WORKER,
            FailingUnit {
                error: "exit 2".to_string(),
            },
        );
        let oracle = ScriptedOracle::new();
        let mut t = task("t1", "none");

        let record = Dispatcher::new(&units, &oracle).execute(&mut t, &mut GlobalState::new("g"));

        assert_eq!(record.result.error.as_deref(), Some("exit 2"));
        assert_eq!(t.status, TaskStatus::Failed);
    }

    #[test]
    fn missing_executor_fails_with_lookup_error() {
        let units = UnitRegistry::new();
        let oracle = ScriptedOracle::new();
        let mut t = task("t1", "none");
        t.executor_name = "ghost".to_string();

        let record = Dispatcher::new(&units, &oracle).execute(&mut t, &mut GlobalState::new("g"));

        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(record.result.output, "");
        assert_eq!(
            record.result.error.as_deref(),
            Some("execution unit 'ghost' not found")
        );
    }

    #[test]
    fn instruction_kind_routes_capability() {
        let unit = ScriptedUnit::succeeding("answer");
        let units = registry(unit.clone());
        let oracle = ScriptedOracle::new();
        let mut state = GlobalState::new("g");
        let mut exec = task("e", "none");
        let mut info = task("i", "none");
        info.instruction_kind = InstructionKind::Information;

        let dispatcher = Dispatcher::new(&units, &oracle);
        dispatcher.execute(&mut exec, &mut state);
        dispatcher.execute(&mut info, &mut state);

        assert_eq!(
            unit.calls(),
            vec![
                (UnitCall::Execute, "do e".to_string()),
                (UnitCall::Chat, "do i".to_string()),
            ]
        );
    }

    #[test]
    fn narrated_description_replaces_state() {
        let units = registry(ScriptedUnit::succeeding("ok"));
        let oracle = ScriptedOracle::new().with_narration("  The build finished cleanly.  ");
        let mut state = GlobalState::new("g");
        let mut t = task("t1", "none");

        Dispatcher::new(&units, &oracle).execute(&mut t, &mut state);

        assert_eq!(state.current_state(), "The build finished cleanly.");
        assert_eq!(oracle.narration_calls(), 1);
    }

    #[test]
    fn short_narration_uses_fallback() {
        let units = registry(ScriptedUnit::succeeding("ok"));
        let oracle = ScriptedOracle::new().with_narration("ok");
        let mut state = GlobalState::new("");
        let mut t = task("t1", "none");

        Dispatcher::new(&units, &oracle).execute(&mut t, &mut state);

        assert_eq!(state.current_state(), "succeeded: t1 task");
    }
}
