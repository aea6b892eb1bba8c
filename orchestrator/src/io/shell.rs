//! Execution unit that runs instructions as shell commands.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::core::types::TaskResult;
use crate::io::process::run_command_with_timeout;
use crate::io::units::ExecutionUnit;

/// Runs `<shell...> <instruction>` in `workdir`.
///
/// Exit status 0 is success with stdout as the output; anything else is a
/// failed result carrying stderr or the timeout.
#[derive(Debug, Clone)]
pub struct ShellUnit {
    shell: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellUnit {
    pub fn new(shell: Vec<String>, workdir: &Path, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            shell,
            workdir: workdir.to_path_buf(),
            timeout,
            output_limit_bytes,
        }
    }
}

impl ExecutionUnit for ShellUnit {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn execute(&self, instruction: &str) -> Result<TaskResult> {
        let (program, args) = self
            .shell
            .split_first()
            .ok_or_else(|| anyhow!("shell unit has an empty shell command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(instruction).current_dir(&self.workdir);

        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)?;
        debug!(succeeded = output.succeeded(), "shell instruction finished");
        if output.succeeded() {
            Ok(TaskResult::success(output.stdout_text()))
        } else {
            Ok(TaskResult {
                success: false,
                output: output.stdout_text(),
                error: Some(output.failure_reason("shell command", self.timeout)),
            })
        }
    }

    fn chat(&self, _instruction: &str) -> Result<TaskResult> {
        Err(anyhow!(
            "shell units only run execution instructions, not information requests"
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn unit(workdir: &Path) -> ShellUnit {
        ShellUnit::new(
            vec!["sh".to_string(), "-c".to_string()],
            workdir,
            Duration::from_secs(10),
            10_000,
        )
    }

    #[test]
    fn execute_runs_in_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "present").expect("write");

        let result = unit(temp.path()).execute("cat marker.txt").expect("execute");
        assert!(result.success);
        assert_eq!(result.output, "present");
    }

    #[test]
    fn execute_reports_failure_as_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = unit(temp.path())
            .execute("echo partial; echo nope >&2; exit 1")
            .expect("execute");
        assert!(!result.success);
        assert_eq!(result.output, "partial\n");
        assert_eq!(
            result.error.as_deref(),
            Some("shell command exited with status 1: nope")
        );
    }

    #[test]
    fn chat_is_unsupported() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(unit(temp.path()).chat("what is here?").is_err());
    }
}
