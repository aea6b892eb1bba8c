//! Collaborator interfaces and their process-backed implementations.

pub mod codex;
pub mod config;
pub mod oracle;
pub mod plan_file;
pub mod process;
pub mod prompt;
pub mod shell;
pub mod units;
