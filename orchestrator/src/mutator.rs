//! Plan analysis after every dispatch.
//!
//! The advisor may propose adding tasks; removal and modification are accepted
//! but leave the store untouched. Every outcome, including a failed analysis,
//! replaces the global state with the decision's reason.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::recovery::retry_task;
use crate::core::reply::{PlanAction, PlanReply, parse_reply};
use crate::core::state::{GlobalState, StateSource};
use crate::core::task_store::TaskStore;
use crate::core::types::{TaskResult, TaskSpec, TaskStatus};
use crate::core::validation::validate_task_spec;
use crate::io::oracle::{PlanAdvisor, PlanQuery, TaskStatusView};
use crate::io::units::UnitRegistry;

/// Reason recorded when the advisor cannot be consulted or its reply is unusable.
pub const ANALYSIS_FAILED_REASON: &str = "analysis failed, keeping current plan";

/// What the mutator decided and what it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDecision {
    pub action: PlanAction,
    pub reason: String,
    pub details: Value,
    /// Ids of tasks appended to the store.
    pub added: Vec<String>,
    /// One message per dropped task spec.
    pub rejected: Vec<String>,
}

impl PlanDecision {
    fn no_change(reason: impl Into<String>) -> Self {
        Self {
            action: PlanAction::NoChange,
            reason: reason.into(),
            details: Value::Null,
            added: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

pub struct PlanMutator<'a, A: PlanAdvisor + ?Sized> {
    advisor: &'a A,
    units: &'a UnitRegistry,
}

impl<'a, A: PlanAdvisor + ?Sized> PlanMutator<'a, A> {
    pub fn new(advisor: &'a A, units: &'a UnitRegistry) -> Self {
        Self { advisor, units }
    }

    #[instrument(skip_all, fields(tasks = store.len()))]
    pub fn analyze_and_apply(
        &self,
        store: &mut TaskStore,
        state: &mut GlobalState,
        last_result: Option<&TaskResult>,
    ) -> PlanDecision {
        let query = PlanQuery {
            tasks: store.tasks().iter().map(TaskStatusView::from).collect(),
            original_goal: state.original_goal().to_string(),
            current_state: state.current_state().to_string(),
            last_result: last_result.cloned(),
            executors: self.units.names(),
        };

        let reply = self
            .advisor
            .analyze_plan(&query)
            .and_then(|raw| parse_reply::<PlanReply>(&raw));
        let decision = match reply {
            Ok(reply) => self.apply(reply, store),
            Err(err) => {
                warn!(error = %err, "plan analysis failed, keeping current plan");
                PlanDecision::no_change(ANALYSIS_FAILED_REASON)
            }
        };

        info!(
            action = decision.action.as_str(),
            added = decision.added.len(),
            rejected = decision.rejected.len(),
            "plan analyzed"
        );
        state.replace(decision.reason.clone(), StateSource::Manager);
        decision
    }

    fn apply(&self, reply: PlanReply, store: &mut TaskStore) -> PlanDecision {
        let mut added = Vec::new();
        let mut rejected = Vec::new();
        let action = match reply.action {
            PlanAction::AddTasks => {
                for (index, raw) in reply.new_tasks().into_iter().enumerate() {
                    match self.admit(store, raw) {
                        Ok(id) => {
                            info!(task_id = %id, "task added to plan");
                            added.push(id);
                        }
                        Err(errors) => {
                            warn!(index, ?errors, "dropping invalid task spec");
                            rejected.push(format!("new_tasks[{index}]: {}", errors.join("; ")));
                        }
                    }
                }
                PlanAction::AddTasks
            }
            PlanAction::RemoveTasks | PlanAction::ModifyTasks => {
                info!(
                    action = reply.action.as_str(),
                    "structural change not applied, tasks left as they are"
                );
                reply.action
            }
            PlanAction::NoChange => PlanAction::NoChange,
            PlanAction::Unknown => {
                warn!("unknown plan action, treating as no_change");
                PlanAction::NoChange
            }
        };

        let reason = if reply.reason.trim().is_empty() {
            format!("plan analysis: {}", action.as_str())
        } else {
            reply.reason.trim().to_string()
        };
        PlanDecision {
            action,
            reason,
            details: reply.details,
            added,
            rejected,
        }
    }

    /// Validate one raw spec and append it. Returns the new id or the reasons it was dropped.
    fn admit(&self, store: &mut TaskStore, raw: Value) -> Result<String, Vec<String>> {
        let spec: TaskSpec = serde_json::from_value(raw)
            .map_err(|err| vec![format!("malformed task spec: {err}")])?;

        if let Some(failed_id) = spec
            .retry_of
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            return admit_retry(store, failed_id);
        }

        let errors = validate_task_spec(&spec, |name| self.units.contains(name));
        if !errors.is_empty() {
            return Err(errors);
        }
        let id = store.allocate_id(spec.id.as_deref());
        store.insert(spec.into_task(id.clone())).map_err(|err| vec![err])?;
        Ok(id)
    }
}

/// Clone a failed task into a fresh retry, as recovery would.
fn admit_retry(store: &mut TaskStore, failed_id: &str) -> Result<String, Vec<String>> {
    let failed = store
        .get(failed_id)
        .ok_or_else(|| vec![format!("retry_of names unknown task '{failed_id}'")])?;
    if failed.status != TaskStatus::Failed {
        return Err(vec![format!(
            "retry_of task '{failed_id}' is {}, not failed",
            failed.status
        )]);
    }
    if store.has_retry_of(failed_id) {
        return Err(vec![format!("task '{failed_id}' already has a retry")]);
    }

    let mut retry = retry_task(failed, Utc::now());
    retry.id = store.unique_id(&retry.id);
    let id = retry.id.clone();
    store.insert(retry).map_err(|err| vec![err])?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedOracle, ScriptedUnit, WORKER, no_change_json, task};
    use serde_json::json;

    fn units() -> UnitRegistry {
        UnitRegistry::new().with(WORKER, ScriptedUnit::succeeding("ok"))
    }

    fn oracle_with(reply: Value) -> ScriptedOracle {
        ScriptedOracle::new().with_plan_replies(vec![Ok(reply.to_string())])
    }

    fn valid_spec(name: &str) -> Value {
        json!({
            "name": name,
            "instruction": format!("run {name}"),
            "executor_name": WORKER,
            "expected_output": "done",
        })
    }

    #[test]
    fn invalid_spec_is_dropped_without_blocking_siblings() {
        let oracle = oracle_with(json!({
            "action": "add_tasks",
            "reason": "need tests",
            "details": {"new_tasks": [
                valid_spec("write tests"),
                {"name": "broken", "executor_name": WORKER, "expected_output": "x"},
            ]},
        }));
        let units = units();
        let mut store = TaskStore::new();
        let mut state = GlobalState::new("g");

        let decision =
            PlanMutator::new(&oracle, &units).analyze_and_apply(&mut store, &mut state, None);

        assert_eq!(decision.action, PlanAction::AddTasks);
        assert_eq!(store.len(), 1);
        assert_eq!(decision.added, vec!["task_1".to_string()]);
        assert_eq!(decision.rejected.len(), 1);
        assert!(decision.rejected[0].contains("missing required field 'instruction'"));
        assert_eq!(state.current_state(), "need tests");
        assert_eq!(
            state.history().last().map(|e| &e.source),
            Some(&StateSource::Manager)
        );
    }

    #[test]
    fn unknown_executor_and_camel_case_specs() {
        let oracle = oracle_with(json!({
            "action": "add_tasks",
            "reason": "expand",
            "details": {"newTasks": [
                {"name": "a", "instruction": "i", "executorName": "ghost", "expectedOutput": "o"},
                {"id": "lint", "name": "b", "instruction": "i", "executorName": WORKER, "expectedOutput": "o", "phase": "verification"},
            ]},
        }));
        let units = units();
        let mut store = TaskStore::new();

        let decision = PlanMutator::new(&oracle, &units).analyze_and_apply(
            &mut store,
            &mut GlobalState::new("g"),
            None,
        );

        assert_eq!(decision.added, vec!["lint".to_string()]);
        assert!(decision.rejected[0].contains("unknown executor 'ghost'"));
    }

    #[test]
    fn remove_and_modify_are_no_ops_that_still_update_state() {
        for action in ["remove_tasks", "modify_tasks"] {
            let oracle = oracle_with(json!({
                "action": action,
                "reason": format!("{action} requested"),
                "details": {"task_ids": ["t1"]},
            }));
            let units = units();
            let mut store = TaskStore::new();
            store.insert(task("t1", "none")).expect("insert");
            let mut state = GlobalState::new("g");

            let decision =
                PlanMutator::new(&oracle, &units).analyze_and_apply(&mut store, &mut state, None);

            assert_eq!(decision.action.as_str(), action);
            assert_eq!(store.len(), 1);
            assert_eq!(store.tasks()[0].status, TaskStatus::Pending);
            assert_eq!(state.current_state(), format!("{action} requested"));
        }
    }

    #[test]
    fn advisor_failure_degrades_to_no_change() {
        let oracle = ScriptedOracle::new().with_plan_replies(vec![Err("timeout".to_string())]);
        let units = units();
        let mut store = TaskStore::new();
        let mut state = GlobalState::new("g");

        let decision =
            PlanMutator::new(&oracle, &units).analyze_and_apply(&mut store, &mut state, None);

        assert_eq!(decision.action, PlanAction::NoChange);
        assert_eq!(decision.reason, ANALYSIS_FAILED_REASON);
        assert_eq!(state.current_state(), ANALYSIS_FAILED_REASON);
    }

    #[test]
    fn unparsable_reply_degrades_to_no_change() {
        let oracle = ScriptedOracle::new().with_plan_replies(vec![Ok("no idea".to_string())]);
        let units = units();

        let decision = PlanMutator::new(&oracle, &units).analyze_and_apply(
            &mut TaskStore::new(),
            &mut GlobalState::new("g"),
            None,
        );

        assert_eq!(decision.reason, ANALYSIS_FAILED_REASON);
    }

    #[test]
    fn unknown_action_and_missing_reason() {
        let oracle = oracle_with(json!({"action": "reorder_tasks"}));
        let units = units();
        let mut state = GlobalState::new("g");

        let decision = PlanMutator::new(&oracle, &units).analyze_and_apply(
            &mut TaskStore::new(),
            &mut state,
            None,
        );

        assert_eq!(decision.action, PlanAction::NoChange);
        assert_eq!(state.current_state(), "plan analysis: no_change");
    }

    #[test]
    fn retry_of_clones_the_failed_task() {
        let oracle = oracle_with(json!({
            "action": "add_tasks",
            "reason": "retry the build",
            "details": {"new_tasks": [{"retry_of": "t1"}, {"retry_of": "t2"}]},
        }));
        let units = units();
        let mut store = TaskStore::new();
        let mut failed = task("t1", "p");
        failed.finish(TaskResult::failure("boom"));
        store.insert(failed).expect("insert");
        store.insert(task("t2", "q")).expect("insert");

        let decision = PlanMutator::new(&oracle, &units).analyze_and_apply(
            &mut store,
            &mut GlobalState::new("g"),
            Some(&TaskResult::failure("boom")),
        );

        assert_eq!(decision.added.len(), 1);
        assert!(decision.added[0].starts_with("retry_t1_"));
        assert!(decision.rejected[0].contains("not failed"));
        let retry = store.get(&decision.added[0]).expect("retry task");
        assert_eq!(retry.retry_of.as_deref(), Some("t1"));
        assert_eq!(retry.instruction, "do t1");
    }

    #[test]
    fn query_carries_statuses_and_last_result() {
        let oracle = ScriptedOracle::new()
            .with_plan_replies(vec![Ok(no_change_json("fine"))]);
        let units = units();
        let mut store = TaskStore::new();
        store.insert(task("t1", "none")).expect("insert");

        PlanMutator::new(&oracle, &units).analyze_and_apply(
            &mut store,
            &mut GlobalState::new("ship"),
            Some(&TaskResult::success("built")),
        );

        let queries = oracle.plan_queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].tasks[0].status, "pending");
        assert_eq!(queries[0].original_goal, "ship");
        assert_eq!(queries[0].executors, vec![WORKER.to_string()]);
        assert_eq!(
            queries[0].last_result.as_ref().map(|r| r.output.as_str()),
            Some("built")
        );
    }
}
