//! The engine loop: plan, then evaluate, select, dispatch and amend until a
//! terminal state is reached.
//!
//! One engine runs one goal. Components never return errors to the loop;
//! every oracle or unit failure has already been folded into a fallback by
//! the time control comes back here.

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::reply::{InitialPlanReply, parse_reply};
use crate::core::state::{GlobalState, StateSource};
use crate::core::summary::{RunOutcome, RunSummary, summarize};
use crate::core::task_store::TaskStore;
use crate::core::types::{ExecutionRecord, Task, TaskSpec, TaskStatus};
use crate::core::validation::validate_task_spec;
use crate::dispatcher::{Dispatcher, update_state};
use crate::evaluator::find_executable;
use crate::io::config::EngineConfig;
use crate::io::oracle::{PlanningQuery, ReasoningOracle, StateUpdate, TaskStatusView};
use crate::io::units::UnitRegistry;
use crate::mutator::PlanMutator;
use crate::navigator::select_next;
use crate::recovery::RecoveryController;

/// Run limits and recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub max_iterations: u32,
    /// Retry every failed dispatch right away.
    pub auto_recovery: bool,
    pub max_attempts: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            auto_recovery: true,
            max_attempts: 3,
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            auto_recovery: config.auto_recovery,
            max_attempts: config.max_attempts,
        }
    }
}

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Initializing,
    Iterating,
    Finished(RunOutcome),
}

/// Returned when `run` is called on an engine that already ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("engine already started; create a new engine for each run")]
pub struct EngineAlreadyStarted;

pub struct Engine<O: ReasoningOracle> {
    oracle: O,
    units: UnitRegistry,
    options: EngineOptions,
    recovery: RecoveryController,
    store: TaskStore,
    state: GlobalState,
    log: Vec<ExecutionRecord>,
    phase: EnginePhase,
    iterations: u32,
}

impl<O: ReasoningOracle> Engine<O> {
    pub fn new(oracle: O, units: UnitRegistry, options: EngineOptions) -> Self {
        Self {
            oracle,
            units,
            recovery: RecoveryController::new(options.max_attempts),
            options,
            store: TaskStore::new(),
            state: GlobalState::default(),
            log: Vec::new(),
            phase: EnginePhase::Idle,
            iterations: 0,
        }
    }

    /// Plan `goal` with the oracle, then iterate to a terminal state.
    ///
    /// The only error is [`EngineAlreadyStarted`].
    #[instrument(skip_all)]
    pub fn run(&mut self, goal: &str, context: &str) -> Result<RunSummary> {
        self.begin(goal, context)?;
        let specs = self.plan_initial(goal, context);
        self.seed(specs);
        Ok(self.iterate())
    }

    /// Like [`Engine::run`], but seeded with caller-supplied specs instead of oracle planning.
    #[instrument(skip_all, fields(specs = specs.len()))]
    pub fn run_with_tasks(
        &mut self,
        goal: &str,
        context: &str,
        specs: Vec<TaskSpec>,
    ) -> Result<RunSummary> {
        self.begin(goal, context)?;
        self.seed(specs);
        Ok(self.iterate())
    }

    pub fn tasks(&self) -> &[Task] {
        self.store.tasks()
    }

    pub fn state(&self) -> &GlobalState {
        &self.state
    }

    pub fn execution_log(&self) -> &[ExecutionRecord] {
        &self.log
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Completed loop iterations, stall recoveries included.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    fn begin(&mut self, goal: &str, context: &str) -> Result<()> {
        if self.phase != EnginePhase::Idle {
            return Err(EngineAlreadyStarted.into());
        }
        self.phase = EnginePhase::Initializing;
        info!(goal, "run started");

        self.state = GlobalState::new(goal);
        let context = context.trim();
        let received = if context.is_empty() {
            format!("Goal received: {goal}")
        } else {
            format!("Goal received: {goal}. Context: {context}")
        };
        let update = StateUpdate::GoalReceived {
            context: context.to_string(),
        };
        update_state(&self.oracle, &mut self.state, update, received, StateSource::User);
        Ok(())
    }

    fn plan_initial(&self, goal: &str, context: &str) -> Vec<TaskSpec> {
        let query = PlanningQuery {
            goal: goal.to_string(),
            context: context.to_string(),
            executors: self.units.names(),
        };
        let reply = self
            .oracle
            .generate_initial_tasks(&query)
            .and_then(|raw| parse_reply::<InitialPlanReply>(&raw));
        let raw_specs = match reply {
            Ok(reply) => reply.tasks,
            Err(err) => {
                warn!(error = %err, "initial planning failed, starting with an empty plan");
                return Vec::new();
            }
        };

        raw_specs
            .into_iter()
            .enumerate()
            .filter_map(|(index, raw)| match serde_json::from_value::<TaskSpec>(raw) {
                Ok(spec) => Some(spec),
                Err(err) => {
                    warn!(index, error = %err, "dropping malformed task spec");
                    None
                }
            })
            .collect()
    }

    /// Validate and insert the first batch, then record the plan in the state.
    fn seed(&mut self, specs: Vec<TaskSpec>) {
        let mut dropped = 0;
        for spec in specs {
            let errors = validate_task_spec(&spec, |name| self.units.contains(name));
            if !errors.is_empty() {
                warn!(?errors, "dropping invalid task spec");
                dropped += 1;
                continue;
            }
            let id = self.store.allocate_id(spec.id.as_deref());
            if let Err(err) = self.store.insert(spec.into_task(id)) {
                warn!(error = %err, "dropping task spec");
                dropped += 1;
            }
        }

        let planned = self.store.len();
        info!(planned, dropped, "initial plan ready");
        let fallback = format!(
            "Planned {planned} task(s) for: {}",
            self.state.original_goal()
        );
        let update = StateUpdate::Planned {
            tasks: self.store.tasks().iter().map(TaskStatusView::from).collect(),
        };
        update_state(&self.oracle, &mut self.state, update, fallback, StateSource::Manager);
    }

    fn iterate(&mut self) -> RunSummary {
        self.phase = EnginePhase::Iterating;
        let outcome = loop {
            if self.iterations >= self.options.max_iterations {
                break RunOutcome::MaxIterationsReached;
            }
            debug!(iteration = self.iterations + 1, "iteration started");

            let candidates = find_executable(&self.oracle, self.store.tasks(), &self.state);
            if candidates.is_empty() {
                match self.resolve_stall() {
                    Some(outcome) => break outcome,
                    None => {
                        self.iterations += 1;
                        continue;
                    }
                }
            }

            let Some(selected) = select_next(&self.oracle, &candidates, &self.log) else {
                break RunOutcome::BlockedNoNewTasks;
            };
            let task_id = selected.task.id.clone();
            self.step(&task_id);
            self.iterations += 1;
        };

        self.phase = EnginePhase::Finished(outcome);
        let summary = summarize(outcome, &self.store, &self.state, &self.log, self.iterations);
        info!(
            outcome = outcome.as_str(),
            iterations = summary.iterations,
            completed = summary.completed,
            total = summary.total,
            "run finished"
        );
        summary
    }

    /// Nothing is executable: finish, or recover and keep going (`None`).
    ///
    /// An empty store is not "all completed" and ends `BlockedNoNewTasks`.
    fn resolve_stall(&mut self) -> Option<RunOutcome> {
        if self.store.all_completed() {
            return Some(RunOutcome::Completed);
        }
        if self.store.any_with_status(TaskStatus::Pending)
            || self.store.any_with_status(TaskStatus::Failed)
        {
            let added = self.recovery.recover_stalled(&mut self.store, &self.state);
            if added > 0 {
                info!(added, "stalled plan recovered");
                return None;
            }
            info!("no new tasks generated");
        }
        Some(RunOutcome::BlockedNoNewTasks)
    }

    /// Dispatch one task, let the plan react, and retry it if it failed.
    fn step(&mut self, task_id: &str) {
        let Some(task) = self.store.get_mut(task_id) else {
            warn!(task_id, "selected task vanished from the store");
            return;
        };
        let record = Dispatcher::new(&self.units, &self.oracle).execute(task, &mut self.state);
        let result = record.result.clone();
        self.log.push(record);

        PlanMutator::new(&self.oracle, &self.units).analyze_and_apply(
            &mut self.store,
            &mut self.state,
            Some(&result),
        );

        if !result.success && self.options.auto_recovery {
            self.recovery.recover(&mut self.store, task_id, &self.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedOracle, ScriptedUnit, WORKER, spec};

    fn engine(oracle: ScriptedOracle) -> Engine<ScriptedOracle> {
        Engine::new(
            oracle,
            UnitRegistry::new().with(WORKER, ScriptedUnit::succeeding("ok")),
            EngineOptions::default(),
        )
    }

    #[test]
    fn options_follow_config() {
        let config = EngineConfig {
            max_iterations: 7,
            auto_recovery: false,
            max_attempts: 2,
            ..EngineConfig::default()
        };
        assert_eq!(
            EngineOptions::from(&config),
            EngineOptions {
                max_iterations: 7,
                auto_recovery: false,
                max_attempts: 2,
            }
        );
        assert_eq!(
            EngineOptions::from(&EngineConfig::default()),
            EngineOptions::default()
        );
    }

    #[test]
    fn second_run_is_rejected() {
        let mut engine = engine(ScriptedOracle::new());
        assert_eq!(engine.phase(), EnginePhase::Idle);

        engine
            .run_with_tasks("g", "", vec![spec("only", WORKER)])
            .expect("first run");
        assert_eq!(
            engine.phase(),
            EnginePhase::Finished(RunOutcome::Completed)
        );

        let err = engine.run("g", "").expect_err("second run");
        assert!(err.downcast_ref::<EngineAlreadyStarted>().is_some());
    }

    #[test]
    fn initialization_records_user_then_manager_states() {
        let mut engine = engine(ScriptedOracle::new());
        engine
            .run_with_tasks("ship", "release branch", vec![spec("only", WORKER)])
            .expect("run");

        let history = engine.state().history();
        assert_eq!(history[0].source, StateSource::User);
        assert_eq!(history[1].previous_state, "Goal received: ship. Context: release branch");
        assert_eq!(history[1].source, StateSource::Manager);
        assert_eq!(history[2].previous_state, "Planned 1 task(s) for: ship");
    }

    #[test]
    fn initialization_states_are_narrated() {
        let mut engine = engine(ScriptedOracle::new().with_narration("The run is under way."));
        engine
            .run_with_tasks("ship", "", vec![spec("only", WORKER)])
            .expect("run");

        let history = engine.state().history();
        assert_eq!(history[1].previous_state, "The run is under way.");
        assert_eq!(history[1].source, StateSource::User);
        assert_eq!(history[2].source, StateSource::Manager);
        // goal received, plan seeded, task finished
        assert_eq!(engine.oracle().narration_calls(), 3);
    }

    #[test]
    fn empty_plan_is_blocked() {
        let mut engine = engine(ScriptedOracle::new());
        let summary = engine.run("g", "").expect("run");

        assert_eq!(summary.outcome, RunOutcome::BlockedNoNewTasks);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.elapsed_ms, None);
    }

    #[test]
    fn failed_initial_planning_yields_empty_plan() {
        let mut engine = engine(ScriptedOracle::new().with_initial_tasks_error("offline"));
        let summary = engine.run("g", "").expect("run");

        assert_eq!(summary.outcome, RunOutcome::BlockedNoNewTasks);
        assert!(engine.tasks().is_empty());
    }

    #[test]
    fn invalid_seed_specs_are_dropped() {
        let mut engine = engine(ScriptedOracle::new());
        let mut broken = spec("broken", WORKER);
        broken.expected_output = None;

        engine
            .run_with_tasks("g", "", vec![broken, spec("fine", WORKER), spec("ghost", "nobody")])
            .expect("run");

        assert_eq!(engine.tasks().len(), 1);
        assert_eq!(engine.tasks()[0].name, "fine");
    }

    #[test]
    fn zero_iteration_budget_stops_before_evaluating() {
        let oracle = ScriptedOracle::new();
        let mut engine = Engine::new(
            oracle,
            UnitRegistry::new().with(WORKER, ScriptedUnit::succeeding("ok")),
            EngineOptions {
                max_iterations: 0,
                ..EngineOptions::default()
            },
        );

        let summary = engine
            .run_with_tasks("g", "", vec![spec("only", WORKER)])
            .expect("run");

        assert_eq!(summary.outcome, RunOutcome::MaxIterationsReached);
        assert_eq!(summary.pending, 1);
        assert!(engine.execution_log().is_empty());
    }

    #[test]
    fn initial_planning_parses_oracle_specs() {
        let oracle = ScriptedOracle::new().with_initial_tasks(
            r#"```json
{"tasks": [
  {"id": "", "name": "Build", "instruction": "make", "executor_name": "worker", "expected_output": "binary", "phase": "", "instruction_kind": "", "precondition": "none", "retry_of": ""},
  "not a spec"
]}
```"#,
        );
        let mut engine = engine(oracle);

        let summary = engine.run("g", "").expect("run");

        assert_eq!(engine.tasks().len(), 1);
        assert_eq!(engine.tasks()[0].id, "task_1");
        assert_eq!(summary.outcome, RunOutcome::Completed);
    }
}
