//! Shared task types for orchestrator core logic.
//!
//! These types define stable contracts between components. They do not depend
//! on external state or I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Precondition text that is always satisfied.
pub const NO_PRECONDITION: &str = "none";

/// Lifecycle status of a task.
///
/// `Completed`, `Failed`, `Skipped` and `Cancelled` are terminal: a terminal
/// task is never evaluated again. Retrying creates a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which execution-unit capability a task's instruction is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionKind {
    /// Stateful, may have side effects.
    Execution,
    /// Side-effect free question/answer.
    Information,
}

impl InstructionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "execution" => Some(InstructionKind::Execution),
            "information" => Some(InstructionKind::Information),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstructionKind::Execution => "execution",
            InstructionKind::Information => "information",
        }
    }
}

/// Advisory grouping used for reporting and planning prompts. Never used for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Information,
    Execution,
    Verification,
}

impl Phase {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "information" => Some(Phase::Information),
            "execution" => Some(Phase::Execution),
            "verification" => Some(Phase::Verification),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Information => "information",
            Phase::Execution => "execution",
            Phase::Verification => "verification",
        }
    }
}

/// Outcome of one task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Output on success, error text on failure.
    pub fn primary_text(&self) -> &str {
        if self.success {
            &self.output
        } else {
            self.error.as_deref().unwrap_or(&self.output)
        }
    }
}

/// A unit of work gated by a natural-language precondition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub instruction: String,
    pub instruction_kind: InstructionKind,
    pub executor_name: String,
    pub phase: Phase,
    pub precondition: String,
    pub expected_output: String,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub execution_context: BTreeMap<String, String>,
    /// 0 for planned tasks, parent + 1 for retries.
    pub attempt: u32,
    /// Id of the failed task this one retries.
    pub retry_of: Option<String>,
}

impl Task {
    /// Transition to `status`, bumping `updated_at`.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.touch();
    }

    /// Store the execution outcome and the matching terminal status.
    pub fn finish(&mut self, result: TaskResult) {
        self.status = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.result = Some(result);
        self.touch();
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Keep timestamps monotonic even if the wall clock steps backwards.
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at
        };
    }
}

/// Task description as produced by a planner or the reasoning oracle.
///
/// Every field is optional so that a partially-formed spec still parses and
/// can be reported field-by-field by validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub id: Option<String>,
    pub name: Option<String>,
    pub instruction: Option<String>,
    #[serde(alias = "executorName", alias = "executor")]
    pub executor_name: Option<String>,
    #[serde(alias = "expectedOutput")]
    pub expected_output: Option<String>,
    pub phase: Option<String>,
    #[serde(alias = "instructionKind", alias = "kind")]
    pub instruction_kind: Option<String>,
    pub precondition: Option<String>,
    #[serde(alias = "retryOf")]
    pub retry_of: Option<String>,
}

impl TaskSpec {
    /// Build a pending task from a spec that already passed validation.
    pub fn into_task(self, id: String) -> Task {
        let now = Utc::now();
        Task {
            id,
            name: self.name.unwrap_or_default(),
            instruction: self.instruction.unwrap_or_default(),
            instruction_kind: self
                .instruction_kind
                .as_deref()
                .and_then(InstructionKind::parse)
                .unwrap_or(InstructionKind::Execution),
            executor_name: self
                .executor_name
                .map(|name| name.trim().to_string())
                .unwrap_or_default(),
            phase: self
                .phase
                .as_deref()
                .and_then(Phase::parse)
                .unwrap_or(Phase::Execution),
            precondition: self
                .precondition
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| NO_PRECONDITION.to_string()),
            expected_output: self.expected_output.unwrap_or_default(),
            status: TaskStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
            execution_context: BTreeMap::new(),
            attempt: 0,
            retry_of: None,
        }
    }
}

/// A pending task whose precondition evaluated true, with the oracle's confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub task: Task,
    pub confidence: f64,
}

/// One entry of the run-scoped execution log.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub task_id: String,
    pub task_name: String,
    pub executor_name: String,
    pub result: TaskResult,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}
