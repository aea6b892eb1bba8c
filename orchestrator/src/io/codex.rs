//! `codex exec`-backed reasoning oracle and execution unit.
//!
//! Every call spawns `codex exec` with the prompt on stdin and reads the
//! agent's last message from `--output-last-message`. Structured capabilities
//! also pass a JSON Schema via `--output-schema` and check the reply against
//! it before handing it back.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::TaskResult;
use crate::io::oracle::{
    PlanAdvisor, PlanQuery, PlanningQuery, PreconditionJudge, PreconditionQuery, SelectionQuery,
    StateNarrator, StateQuery, TaskSelector,
};
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::{PromptEngine, PromptKind};
use crate::io::units::ExecutionUnit;

const PRECONDITION_SCHEMA: &str = include_str!("../../schemas/precondition.schema.json");
const SELECTION_SCHEMA: &str = include_str!("../../schemas/selection.schema.json");
const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const INITIAL_TASKS_SCHEMA: &str = include_str!("../../schemas/initial_tasks.schema.json");

/// Codex sandbox policy for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sandbox {
    ReadOnly,
    WorkspaceWrite,
}

impl Sandbox {
    pub fn as_str(self) -> &'static str {
        match self {
            Sandbox::ReadOnly => "read-only",
            Sandbox::WorkspaceWrite => "workspace-write",
        }
    }
}

/// How to launch `codex exec` and how long to wait for it.
#[derive(Debug, Clone)]
pub struct CodexCommand {
    program: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CodexCommand {
    pub fn new(
        program: Vec<String>,
        workdir: &Path,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            program,
            workdir: workdir.to_path_buf(),
            timeout,
            output_limit_bytes,
        }
    }

    /// Assemble the command line for one invocation.
    pub fn command(
        &self,
        sandbox: Sandbox,
        output_schema_path: Option<&Path>,
        output_path: &Path,
    ) -> Result<Command> {
        let (program, args) = self
            .program
            .split_first()
            .ok_or_else(|| anyhow!("codex command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--sandbox")
            .arg(sandbox.as_str())
            // Workspaces are not required to be git repositories.
            .arg("--skip-git-repo-check");
        if let Some(schema) = output_schema_path {
            cmd.arg("--output-schema").arg(schema);
        }
        cmd.arg("--output-last-message")
            .arg(output_path)
            .arg("-")
            .current_dir(&self.workdir);
        Ok(cmd)
    }

    /// Run one prompt and return the agent's last message.
    #[instrument(skip_all, fields(sandbox = sandbox.as_str(), timeout_secs = self.timeout.as_secs(), structured = output_schema.is_some()))]
    pub fn exec(&self, prompt: &str, sandbox: Sandbox, output_schema: Option<&str>) -> Result<String> {
        let scratch = tempfile::tempdir().context("create codex scratch dir")?;
        let output_path = scratch.path().join("last_message.txt");
        let schema_path = match output_schema {
            Some(schema) => {
                let path = scratch.path().join("output.schema.json");
                fs::write(&path, schema)
                    .with_context(|| format!("write schema {}", path.display()))?;
                Some(path)
            }
            None => None,
        };

        let cmd = self.command(sandbox, schema_path.as_deref(), &output_path)?;
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run codex exec")?;

        if !output.succeeded() {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "codex exec failed");
            return Err(anyhow!(output.failure_reason("codex exec", self.timeout)));
        }
        if !output_path.exists() {
            return Err(anyhow!("codex exec produced no final message"));
        }
        let message = fs::read_to_string(&output_path)
            .with_context(|| format!("read codex output {}", output_path.display()))?;
        debug!(bytes = message.len(), "codex exec completed");
        Ok(message)
    }
}

/// Check a structured reply against the schema it was requested with.
pub fn check_reply(schema: &str, reply: &str) -> Result<()> {
    let schema_value: Value = serde_json::from_str(schema).context("parse output schema")?;
    let reply_value: Value =
        serde_json::from_str(reply.trim()).context("parse structured reply")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(&reply_value) {
        let messages = compiled
            .iter_errors(&reply_value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "reply schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Reasoning oracle that answers every capability with a read-only codex session.
pub struct CodexOracle {
    command: CodexCommand,
    prompts: PromptEngine,
}

impl CodexOracle {
    pub fn new(command: CodexCommand) -> Self {
        Self {
            command,
            prompts: PromptEngine::new(),
        }
    }

    fn structured<S: serde::Serialize>(
        &self,
        kind: PromptKind,
        query: &S,
        schema: &str,
    ) -> Result<String> {
        let prompt = self.prompts.render(kind, query)?;
        let reply = self.command.exec(&prompt, Sandbox::ReadOnly, Some(schema))?;
        check_reply(schema, &reply)?;
        Ok(reply)
    }
}

impl PreconditionJudge for CodexOracle {
    fn check_precondition(&self, query: &PreconditionQuery) -> Result<String> {
        self.structured(PromptKind::Precondition, query, PRECONDITION_SCHEMA)
    }
}

impl TaskSelector for CodexOracle {
    fn select_task(&self, query: &SelectionQuery) -> Result<String> {
        self.structured(PromptKind::Select, query, SELECTION_SCHEMA)
    }
}

impl StateNarrator for CodexOracle {
    fn describe_state(&self, query: &StateQuery) -> Result<String> {
        let prompt = self.prompts.render(PromptKind::State, query)?;
        self.command.exec(&prompt, Sandbox::ReadOnly, None)
    }
}

impl PlanAdvisor for CodexOracle {
    fn analyze_plan(&self, query: &PlanQuery) -> Result<String> {
        self.structured(PromptKind::Plan, query, PLAN_SCHEMA)
    }

    fn generate_initial_tasks(&self, query: &PlanningQuery) -> Result<String> {
        self.structured(PromptKind::InitialTasks, query, INITIAL_TASKS_SCHEMA)
    }
}

/// Execution unit that hands instructions to a codex agent.
///
/// `execute` may write to the workspace; `chat` runs read-only.
pub struct CodexUnit {
    command: CodexCommand,
}

impl CodexUnit {
    pub fn new(command: CodexCommand) -> Self {
        Self { command }
    }

    fn run(&self, instruction: &str, sandbox: Sandbox) -> Result<TaskResult> {
        info!(sandbox = sandbox.as_str(), "dispatching instruction to codex");
        let message = self.command.exec(instruction, sandbox, None)?;
        Ok(TaskResult::success(message.trim()))
    }
}

impl ExecutionUnit for CodexUnit {
    fn execute(&self, instruction: &str) -> Result<TaskResult> {
        self.run(instruction, Sandbox::WorkspaceWrite)
    }

    fn chat(&self, instruction: &str) -> Result<TaskResult> {
        self.run(instruction, Sandbox::ReadOnly)
    }
}
