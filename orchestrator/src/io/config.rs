//! Engine configuration stored as TOML (default `orchestrator.toml`).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "orchestrator.toml";

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on engine loop iterations for one run.
    pub max_iterations: u32,

    /// Insert a retry task after every failed dispatch.
    pub auto_recovery: bool,

    /// Longest retry lineage (original attempt included) recovery will create.
    pub max_attempts: u32,

    /// Working directory for process-backed units and the oracle.
    pub workdir: PathBuf,

    pub oracle: OracleConfig,

    pub units: Vec<UnitConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command prefix for the reasoning backend (e.g. `["codex","exec"]`).
    pub command: Vec<String>,

    /// Per-call wall-clock budget in seconds.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Runs the instruction as a shell command.
    Shell,
    /// Hands the instruction to a `codex exec` agent.
    Codex,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UnitConfig {
    /// Logical name that tasks reference via `executor_name`.
    pub name: String,

    pub kind: UnitKind,

    pub timeout_secs: u64,

    pub output_limit_bytes: usize,

    /// Shell invocation prefix; the instruction is appended as the last argument.
    pub shell: Vec<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: UnitKind::Shell,
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            shell: vec!["sh".to_string(), "-c".to_string()],
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            auto_recovery: true,
            max_attempts: 3,
            workdir: PathBuf::from("."),
            oracle: OracleConfig::default(),
            units: vec![
                UnitConfig {
                    name: "shell".to_string(),
                    ..UnitConfig::default()
                },
                UnitConfig {
                    name: "agent".to_string(),
                    kind: UnitKind::Codex,
                    ..UnitConfig::default()
                },
            ],
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.oracle.command.is_empty() || self.oracle.command[0].trim().is_empty() {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if self.units.is_empty() {
            return Err(anyhow!("at least one [[units]] entry is required"));
        }

        let mut seen = BTreeSet::new();
        for unit in &self.units {
            let name = unit.name.trim();
            if name.is_empty() {
                return Err(anyhow!("units[].name must be non-empty"));
            }
            if !seen.insert(name) {
                return Err(anyhow!("duplicate unit name '{name}'"));
            }
            if unit.timeout_secs == 0 {
                return Err(anyhow!("unit '{name}': timeout_secs must be > 0"));
            }
            if unit.output_limit_bytes == 0 {
                return Err(anyhow!("unit '{name}': output_limit_bytes must be > 0"));
            }
            if unit.kind == UnitKind::Shell
                && (unit.shell.is_empty() || unit.shell[0].trim().is_empty())
            {
                return Err(anyhow!("unit '{name}': shell must be a non-empty array"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestrator.toml");
        let cfg = EngineConfig {
            max_iterations: 7,
            auto_recovery: false,
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestrator.toml");
        fs::write(
            &path,
            "max_iterations = 5\n\n[[units]]\nname = \"build\"\nkind = \"shell\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 5);
        assert!(cfg.auto_recovery);
        assert_eq!(cfg.units.len(), 1);
        assert_eq!(cfg.units[0].shell, vec!["sh".to_string(), "-c".to_string()]);
        assert_eq!(cfg.oracle, OracleConfig::default());
    }

    #[test]
    fn validate_rejects_duplicate_unit_names() {
        let mut cfg = EngineConfig::default();
        cfg.units[1].name = "shell".to_string();
        let err = cfg.validate().expect_err("duplicate");
        assert!(err.to_string().contains("duplicate unit name 'shell'"));
    }

    #[test]
    fn validate_rejects_zero_iterations() {
        let cfg = EngineConfig {
            max_iterations: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
