//! Reasoning oracle capabilities.
//!
//! The oracle is split into small capability traits so that each component
//! depends only on what it consults, and so test doubles or alternate
//! backends can implement a single capability. Every call returns the raw
//! reply text; callers parse it with [`crate::core::reply::parse_reply`] and
//! fall back on their own when the call fails or the reply is malformed.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::core::state::{GlobalState, StateEntry};
use crate::core::types::{Candidate, ExecutionRecord, Task, TaskResult};

/// Input for a precondition check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreconditionQuery {
    pub precondition: String,
    pub current_state: String,
    pub context_variables: BTreeMap<String, String>,
}

impl PreconditionQuery {
    pub fn new(precondition: &str, state: &GlobalState) -> Self {
        Self {
            precondition: precondition.to_string(),
            current_state: state.current_state().to_string(),
            context_variables: state.context_variables().clone(),
        }
    }
}

/// A candidate as shown to the selector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateView {
    pub id: String,
    pub name: String,
    pub instruction: String,
    pub phase: String,
    pub confidence: f64,
}

impl From<&Candidate> for CandidateView {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.task.id.clone(),
            name: candidate.task.name.clone(),
            instruction: candidate.task.instruction.clone(),
            phase: candidate.task.phase.as_str().to_string(),
            confidence: candidate.confidence,
        }
    }
}

/// A past execution as shown to the selector (name and outcome only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryView {
    pub task_name: String,
    pub success: bool,
}

impl From<&ExecutionRecord> for HistoryView {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            task_name: record.task_name.clone(),
            success: record.result.success,
        }
    }
}

/// Input for choosing the next task among several satisfied candidates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionQuery {
    pub candidates: Vec<CandidateView>,
    pub recent_history: Vec<HistoryView>,
}

/// Task fields forwarded in state and plan prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskView {
    pub id: String,
    pub name: String,
    pub instruction: String,
    pub instruction_kind: String,
    pub executor_name: String,
    pub phase: String,
    pub precondition: String,
    pub expected_output: String,
    pub status: String,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            instruction: task.instruction.clone(),
            instruction_kind: task.instruction_kind.as_str().to_string(),
            executor_name: task.executor_name.clone(),
            phase: task.phase.as_str().to_string(),
            precondition: task.precondition.clone(),
            expected_output: task.expected_output.clone(),
            status: task.status.as_str().to_string(),
        }
    }
}

/// A replaced state value as shown to the narrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntryView {
    pub previous_state: String,
    pub source: String,
}

impl From<&StateEntry> for HistoryEntryView {
    fn from(entry: &StateEntry) -> Self {
        Self {
            previous_state: entry.previous_state.clone(),
            source: entry.source.to_string(),
        }
    }
}

/// Input for narrating the new global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateQuery {
    pub original_goal: String,
    pub current_state: String,
    pub recent_history: Vec<HistoryEntryView>,
    pub update: StateUpdate,
}

/// What just happened to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateUpdate {
    GoalReceived {
        context: String,
    },
    Planned {
        tasks: Vec<TaskStatusView>,
    },
    TaskFinished {
        task: TaskView,
        success: bool,
        /// Bounded preview of the output (success) or error (failure).
        result_preview: String,
    },
}

/// Compact task status line for plan analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusView {
    pub id: String,
    pub name: String,
    pub status: String,
}

impl From<&Task> for TaskStatusView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            status: task.status.as_str().to_string(),
        }
    }
}

/// Input for deciding whether the remaining plan should change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanQuery {
    pub tasks: Vec<TaskStatusView>,
    pub original_goal: String,
    pub current_state: String,
    pub last_result: Option<TaskResult>,
    pub executors: Vec<String>,
}

/// Input for the first task batch of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningQuery {
    pub goal: String,
    pub context: String,
    pub executors: Vec<String>,
}

/// Judges whether a natural-language precondition holds.
///
/// Reply shape: `{"satisfied": bool, "confidence": 0..1, "explanation": str}`.
pub trait PreconditionJudge: Send + Sync {
    fn check_precondition(&self, query: &PreconditionQuery) -> Result<String>;
}

/// Picks one task among several executable candidates.
///
/// Reply shape: `{"selected_task_id": str, "reason": str}`.
pub trait TaskSelector: Send + Sync {
    fn select_task(&self, query: &SelectionQuery) -> Result<String>;
}

/// Describes the run's progress in natural language. Reply is free text.
pub trait StateNarrator: Send + Sync {
    fn describe_state(&self, query: &StateQuery) -> Result<String>;
}

/// Plans and amends the task list.
///
/// `analyze_plan` replies `{"action": str, "reason": str, "details": {...}}`;
/// `generate_initial_tasks` replies `{"tasks": [task spec, ...]}`.
pub trait PlanAdvisor: Send + Sync {
    fn analyze_plan(&self, query: &PlanQuery) -> Result<String>;
    fn generate_initial_tasks(&self, query: &PlanningQuery) -> Result<String>;
}

/// Every capability the engine consumes.
pub trait ReasoningOracle: PreconditionJudge + TaskSelector + StateNarrator + PlanAdvisor {}

impl<T> ReasoningOracle for T where T: PreconditionJudge + TaskSelector + StateNarrator + PlanAdvisor {}
