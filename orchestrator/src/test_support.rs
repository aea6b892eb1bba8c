//! Scripted collaborators and builders for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;

use crate::core::types::{
    Candidate, ExecutionRecord, InstructionKind, Phase, Task, TaskResult, TaskSpec, TaskStatus,
};
use crate::io::oracle::{
    PlanAdvisor, PlanQuery, PlanningQuery, PreconditionJudge, PreconditionQuery, SelectionQuery,
    StateNarrator, StateQuery, TaskSelector,
};
use crate::io::units::ExecutionUnit;

/// Executor name used by [`task`] and [`spec`] builders.
pub const WORKER: &str = "worker";

/// Create a deterministic pending task routed to [`WORKER`].
pub fn task(id: &str, precondition: &str) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        name: format!("{id} task"),
        instruction: format!("do {id}"),
        instruction_kind: InstructionKind::Execution,
        executor_name: WORKER.to_string(),
        phase: Phase::Execution,
        precondition: precondition.to_string(),
        expected_output: format!("{id} output"),
        status: TaskStatus::Pending,
        result: None,
        created_at: now,
        updated_at: now,
        execution_context: BTreeMap::new(),
        attempt: 0,
        retry_of: None,
    }
}

/// Create a task with an explicit status.
pub fn task_with_status(id: &str, status: TaskStatus) -> Task {
    let mut t = task(id, "none");
    t.status = status;
    t
}

/// Create a complete, valid spec.
pub fn spec(name: &str, executor: &str) -> TaskSpec {
    TaskSpec {
        id: None,
        name: Some(name.to_string()),
        instruction: Some(format!("run {name}")),
        executor_name: Some(executor.to_string()),
        expected_output: Some(format!("{name} done")),
        phase: None,
        instruction_kind: None,
        precondition: None,
        retry_of: None,
    }
}

pub fn candidate(id: &str, confidence: f64) -> Candidate {
    Candidate {
        task: task(id, "ready"),
        confidence,
    }
}

pub fn record(id: &str, success: bool) -> ExecutionRecord {
    ExecutionRecord {
        task_id: id.to_string(),
        task_name: format!("{id} task"),
        executor_name: WORKER.to_string(),
        result: if success {
            TaskResult::success("ok")
        } else {
            TaskResult::failure("boom")
        },
        timestamp: Utc::now(),
        duration: Duration::ZERO,
    }
}

/// JSON reply for a precondition check.
pub fn verdict_json(satisfied: bool, confidence: f64) -> String {
    format!(r#"{{"satisfied": {satisfied}, "confidence": {confidence}, "explanation": "scripted"}}"#)
}

/// JSON reply for a `no_change` plan analysis.
pub fn no_change_json(reason: &str) -> String {
    serde_json::json!({"action": "no_change", "reason": reason, "details": {}}).to_string()
}

type Scripted = std::result::Result<String, String>;

fn scripted(reply: &Scripted) -> Result<String> {
    reply.clone().map_err(|err| anyhow!(err))
}

/// Oracle double with per-capability scripted replies and call accounting.
///
/// Defaults: unknown preconditions are unsatisfied, selection and narration
/// fail (forcing fallbacks), plan analysis replies `no_change`, initial
/// planning yields no tasks.
pub struct ScriptedOracle {
    verdicts: HashMap<String, Scripted>,
    default_verdict: Scripted,
    selection: Scripted,
    narration: Scripted,
    plan_replies: Mutex<VecDeque<Scripted>>,
    initial_tasks: Scripted,
    barrier: Option<Arc<Barrier>>,
    delay: Option<Duration>,

    precondition_calls: AtomicUsize,
    precondition_order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    selection_calls: AtomicUsize,
    narration_calls: AtomicUsize,
    plan_calls: AtomicUsize,
    plan_queries: Mutex<Vec<PlanQuery>>,
    initial_calls: AtomicUsize,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            verdicts: HashMap::new(),
            default_verdict: Ok(verdict_json(false, 0.0)),
            selection: Err("selector offline".to_string()),
            narration: Err("narrator offline".to_string()),
            plan_replies: Mutex::new(VecDeque::new()),
            initial_tasks: Ok(r#"{"tasks": []}"#.to_string()),
            barrier: None,
            delay: None,
            precondition_calls: AtomicUsize::new(0),
            precondition_order: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            selection_calls: AtomicUsize::new(0),
            narration_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
            plan_queries: Mutex::new(Vec::new()),
            initial_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_verdict(mut self, precondition: &str, satisfied: bool, confidence: f64) -> Self {
        self.verdicts.insert(
            precondition.to_string(),
            Ok(verdict_json(satisfied, confidence)),
        );
        self
    }

    pub fn with_precondition_reply(mut self, precondition: &str, raw: &str) -> Self {
        self.verdicts
            .insert(precondition.to_string(), Ok(raw.to_string()));
        self
    }

    pub fn with_precondition_error(mut self, precondition: &str, error: &str) -> Self {
        self.verdicts
            .insert(precondition.to_string(), Err(error.to_string()));
        self
    }

    /// Reply used for preconditions without a specific script.
    pub fn with_default_verdict(mut self, satisfied: bool, confidence: f64) -> Self {
        self.default_verdict = Ok(verdict_json(satisfied, confidence));
        self
    }

    pub fn with_selection(mut self, raw: &str) -> Self {
        self.selection = Ok(raw.to_string());
        self
    }

    pub fn with_narration(mut self, raw: &str) -> Self {
        self.narration = Ok(raw.to_string());
        self
    }

    /// Replies for successive plan analyses; `no_change` once exhausted.
    pub fn with_plan_replies(self, replies: Vec<Scripted>) -> Self {
        *self.plan_replies.lock().expect("plan replies lock") = replies.into();
        self
    }

    pub fn with_initial_tasks(mut self, raw: &str) -> Self {
        self.initial_tasks = Ok(raw.to_string());
        self
    }

    pub fn with_initial_tasks_error(mut self, error: &str) -> Self {
        self.initial_tasks = Err(error.to_string());
        self
    }

    /// Every precondition call waits on `barrier` before replying.
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Every precondition call sleeps for `delay` before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn precondition_calls(&self) -> usize {
        self.precondition_calls.load(Ordering::SeqCst)
    }

    /// Precondition texts in the order their calls started.
    pub fn precondition_order(&self) -> Vec<String> {
        self.precondition_order
            .lock()
            .expect("order lock")
            .clone()
    }

    /// Highest number of precondition calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn selection_calls(&self) -> usize {
        self.selection_calls.load(Ordering::SeqCst)
    }

    pub fn narration_calls(&self) -> usize {
        self.narration_calls.load(Ordering::SeqCst)
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn plan_queries(&self) -> Vec<PlanQuery> {
        self.plan_queries.lock().expect("plan queries lock").clone()
    }

    pub fn initial_calls(&self) -> usize {
        self.initial_calls.load(Ordering::SeqCst)
    }
}

impl PreconditionJudge for ScriptedOracle {
    fn check_precondition(&self, query: &PreconditionQuery) -> Result<String> {
        self.precondition_calls.fetch_add(1, Ordering::SeqCst);
        self.precondition_order
            .lock()
            .expect("order lock")
            .push(query.precondition.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(barrier) = &self.barrier {
            barrier.wait();
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let reply = self
            .verdicts
            .get(&query.precondition)
            .unwrap_or(&self.default_verdict);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted(reply)
    }
}

impl TaskSelector for ScriptedOracle {
    fn select_task(&self, _query: &SelectionQuery) -> Result<String> {
        self.selection_calls.fetch_add(1, Ordering::SeqCst);
        scripted(&self.selection)
    }
}

impl StateNarrator for ScriptedOracle {
    fn describe_state(&self, _query: &StateQuery) -> Result<String> {
        self.narration_calls.fetch_add(1, Ordering::SeqCst);
        scripted(&self.narration)
    }
}

impl PlanAdvisor for ScriptedOracle {
    fn analyze_plan(&self, query: &PlanQuery) -> Result<String> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.plan_queries
            .lock()
            .expect("plan queries lock")
            .push(query.clone());
        let next = self
            .plan_replies
            .lock()
            .expect("plan replies lock")
            .pop_front();
        match next {
            Some(reply) => scripted(&reply),
            None => Ok(no_change_json("plan is on track")),
        }
    }

    fn generate_initial_tasks(&self, _query: &PlanningQuery) -> Result<String> {
        self.initial_calls.fetch_add(1, Ordering::SeqCst);
        scripted(&self.initial_tasks)
    }
}

/// Which unit capability a dispatch used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCall {
    Execute,
    Chat,
}

struct UnitScript {
    replies: VecDeque<Scripted>,
    fallback: Scripted,
    calls: Vec<(UnitCall, String)>,
}

/// Execution unit double. Clones share the same script and call log.
///
/// `Ok` replies become successful results; `Err` replies are returned as
/// errors, like a unit that raised.
#[derive(Clone)]
pub struct ScriptedUnit {
    script: Arc<Mutex<UnitScript>>,
}

impl ScriptedUnit {
    fn from_script(replies: Vec<Scripted>, fallback: Scripted) -> Self {
        Self {
            script: Arc::new(Mutex::new(UnitScript {
                replies: replies.into(),
                fallback,
                calls: Vec::new(),
            })),
        }
    }

    /// Always succeeds with `output`.
    pub fn succeeding(output: &str) -> Self {
        Self::from_script(Vec::new(), Ok(output.to_string()))
    }

    /// Always returns an error, like a unit that raised.
    pub fn erroring(error: &str) -> Self {
        Self::from_script(Vec::new(), Err(error.to_string()))
    }

    /// Replies in order, then repeats `fallback`.
    pub fn sequence(replies: Vec<Scripted>, fallback: Scripted) -> Self {
        Self::from_script(replies, fallback)
    }

    pub fn calls(&self) -> Vec<(UnitCall, String)> {
        self.script.lock().expect("unit script lock").calls.clone()
    }

    fn reply(&self, call: UnitCall, instruction: &str) -> Result<TaskResult> {
        let mut script = self.script.lock().expect("unit script lock");
        script.calls.push((call, instruction.to_string()));
        let reply = script
            .replies
            .pop_front()
            .unwrap_or_else(|| script.fallback.clone());
        reply.map(TaskResult::success).map_err(|err| anyhow!(err))
    }
}

impl ExecutionUnit for ScriptedUnit {
    fn execute(&self, instruction: &str) -> Result<TaskResult> {
        self.reply(UnitCall::Execute, instruction)
    }

    fn chat(&self, instruction: &str) -> Result<TaskResult> {
        self.reply(UnitCall::Chat, instruction)
    }
}

/// Unit that reports failure through its result instead of an error.
pub struct FailingUnit {
    pub error: String,
}

impl ExecutionUnit for FailingUnit {
    fn execute(&self, _instruction: &str) -> Result<TaskResult> {
        Ok(TaskResult::failure(self.error.clone()))
    }

    fn chat(&self, _instruction: &str) -> Result<TaskResult> {
        Ok(TaskResult::failure(self.error.clone()))
    }
}
