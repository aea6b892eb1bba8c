//! Plan files: a TOML list of task specs supplied instead of initial planning.
//!
//! ```toml
//! [[tasks]]
//! name = "Compile"
//! instruction = "cargo build"
//! executor_name = "shell"
//! expected_output = "a release binary"
//! precondition = "none"
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::TaskSpec;
use crate::core::validation::validate_task_spec;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanFile {
    pub tasks: Vec<TaskSpec>,
}

/// Load a plan file from disk. Specs are not validated here.
pub fn load_plan(path: &Path) -> Result<PlanFile> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let plan: PlanFile =
        toml::from_str(&contents).with_context(|| format!("parse plan {}", path.display()))?;
    Ok(plan)
}

/// Validation messages for every spec in the plan, in file order.
pub fn validate_plan(plan: &PlanFile, is_known_executor: impl Fn(&str) -> bool) -> Vec<String> {
    plan.tasks
        .iter()
        .enumerate()
        .flat_map(|(index, spec)| {
            validate_task_spec(spec, &is_known_executor)
                .into_iter()
                .map(move |message| format!("tasks[{index}]: {message}"))
        })
        .collect()
}
