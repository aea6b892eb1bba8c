//! Precondition-driven task orchestrator.
//!
//! Plans a goal into tasks, runs whichever tasks a reasoning oracle judges
//! ready, and prints the terminal run summary as JSON.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::engine::{Engine, EngineOptions};
use orchestrator::exit_codes;
use orchestrator::io::codex::{CodexCommand, CodexOracle};
use orchestrator::io::config::{DEFAULT_CONFIG_PATH, EngineConfig, load_config, write_config};
use orchestrator::io::plan_file::{load_plan, validate_plan};
use orchestrator::io::units::build_registry;
use orchestrator::logging;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Precondition-driven task orchestrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Check a TOML plan file against the configured execution units.
    ValidatePlan {
        plan: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Plan and run a goal to a terminal state.
    Run {
        #[arg(long)]
        goal: String,
        /// Free-form context passed to initial planning.
        #[arg(long, default_value = "")]
        context: String,
        /// Use this plan file instead of asking the oracle for one.
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code(exit_codes::INVALID)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::ValidatePlan { plan, config } => cmd_validate_plan(&plan, &config),
        Command::Run {
            goal,
            context,
            plan,
            config,
        } => cmd_run(&goal, &context, plan.as_deref(), &config),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        println!("{} already exists", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &EngineConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate_plan(plan_path: &Path, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let plan = load_plan(plan_path)?;
    let errors = validate_plan(&plan, |name| {
        config.units.iter().any(|unit| unit.name.trim() == name)
    });
    if errors.is_empty() {
        println!("{} task(s) valid", plan.tasks.len());
        return Ok(exit_codes::OK);
    }
    for error in &errors {
        println!("{error}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_run(goal: &str, context: &str, plan_path: Option<&Path>, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let units = build_registry(&config, &config.workdir);
    let oracle = CodexOracle::new(CodexCommand::new(
        config.oracle.command.clone(),
        &config.workdir,
        Duration::from_secs(config.oracle.timeout_secs),
        config.oracle.output_limit_bytes,
    ));
    let mut engine = Engine::new(oracle, units, EngineOptions::from(&config));

    let summary = match plan_path {
        Some(path) => {
            let plan = load_plan(path)?;
            info!(tasks = plan.tasks.len(), "running with plan file");
            engine.run_with_tasks(goal, context, plan.tasks)?
        }
        None => engine.run(goal, context)?,
    };

    let payload = serde_json::to_string_pretty(&summary).context("serialize run summary")?;
    println!("{payload}");
    Ok(exit_codes::for_outcome(summary.outcome))
}
