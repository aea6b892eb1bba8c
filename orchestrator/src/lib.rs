//! Precondition-driven task orchestration engine.
//!
//! A goal is planned into tasks, each gated by a natural-language
//! precondition. Every iteration asks a reasoning oracle which pending tasks
//! can run, picks one, dispatches it to an execution unit, and lets the
//! oracle amend the plan. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (task store, global state, reply
//!   parsing, validation, selection rules). No I/O, fully testable in isolation.
//! - **[`io`]**: Collaborator interfaces and their process-backed
//!   implementations (oracle, execution units, config, plan files).
//!
//! Orchestration modules ([`evaluator`], [`navigator`], [`dispatcher`],
//! [`mutator`], [`recovery`], [`engine`]) compose the two into the run loop.

pub mod core;
pub mod dispatcher;
pub mod engine;
pub mod evaluator;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod mutator;
pub mod navigator;
pub mod recovery;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
