//! Execution units and the registry that resolves them by logical name.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::TaskResult;
use crate::io::codex::{CodexCommand, CodexUnit};
use crate::io::config::{EngineConfig, UnitKind};
use crate::io::shell::ShellUnit;

/// Abstraction over whatever actually carries out a task instruction.
///
/// An `Err` is treated like an exception raised by the unit: the dispatcher
/// converts it into a failed [`TaskResult`].
pub trait ExecutionUnit: Send + Sync {
    /// Stateful execution that may have side effects.
    fn execute(&self, instruction: &str) -> Result<TaskResult>;

    /// Side-effect free question/answer.
    fn chat(&self, instruction: &str) -> Result<TaskResult>;
}

/// Execution units keyed by logical name.
#[derive(Default)]
pub struct UnitRegistry {
    units: BTreeMap<String, Box<dyn ExecutionUnit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `unit` under `name`, replacing any previous unit with that name.
    pub fn register(&mut self, name: impl Into<String>, unit: impl ExecutionUnit + 'static) {
        self.units.insert(name.into(), Box::new(unit));
    }

    pub fn with(mut self, name: impl Into<String>, unit: impl ExecutionUnit + 'static) -> Self {
        self.register(name, unit);
        self
    }

    pub fn get(&self, name: &str) -> Result<&dyn ExecutionUnit> {
        self.units
            .get(name)
            .map(|unit| unit.as_ref())
            .ok_or_else(|| anyhow!("execution unit '{name}' not found"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }
}

/// Build the process-backed units listed in `config`.
pub fn build_registry(config: &EngineConfig, workdir: &Path) -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    for unit in &config.units {
        let timeout = Duration::from_secs(unit.timeout_secs);
        match unit.kind {
            UnitKind::Shell => registry.register(
                unit.name.clone(),
                ShellUnit::new(unit.shell.clone(), workdir, timeout, unit.output_limit_bytes),
            ),
            UnitKind::Codex => registry.register(
                unit.name.clone(),
                CodexUnit::new(CodexCommand::new(
                    config.oracle.command.clone(),
                    workdir,
                    timeout,
                    unit.output_limit_bytes,
                )),
            ),
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedUnit;

    #[test]
    fn get_reports_missing_unit_by_name() {
        let registry = UnitRegistry::new().with("worker", ScriptedUnit::succeeding("ok"));
        assert!(registry.get("worker").is_ok());
        let err = registry.get("ghost").err().expect("missing");
        assert_eq!(err.to_string(), "execution unit 'ghost' not found");
    }

    #[test]
    fn names_are_sorted() {
        let registry = UnitRegistry::new()
            .with("zeta", ScriptedUnit::succeeding("z"))
            .with("alpha", ScriptedUnit::succeeding("a"));
        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
        assert!(registry.contains("alpha"));
        assert!(!registry.contains("beta"));
    }

    #[test]
    fn build_registry_registers_configured_units() {
        let config = EngineConfig::default();
        let registry = build_registry(&config, Path::new("."));
        assert_eq!(registry.names(), vec!["agent".to_string(), "shell".to_string()]);
    }
}
