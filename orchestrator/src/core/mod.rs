//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod recovery;
pub mod reply;
pub mod selector;
pub mod state;
pub mod state_update;
pub mod summary;
pub mod task_store;
pub mod types;
pub mod validation;
