//! Default remediation for a failed task: a single conservative retry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::core::types::{Task, TaskStatus};

pub const RETRY_ID_PREFIX: &str = "retry_";
pub const RETRY_PRECONDITION_PREFIX: &str = "error resolved; original precondition holds: ";

/// `YYYYMMDDHHMMSS`, used to make retry ids unique per run.
pub fn compact_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Clone `failed` into a fresh pending task that retries the same instruction.
///
/// The new id is `retry_<failed id>_<compact timestamp>` and the precondition
/// requires the error to be resolved before the original precondition applies.
pub fn retry_task(failed: &Task, now: DateTime<Utc>) -> Task {
    Task {
        id: format!("{RETRY_ID_PREFIX}{}_{}", failed.id, compact_timestamp(now)),
        precondition: format!("{RETRY_PRECONDITION_PREFIX}{}", failed.precondition),
        status: TaskStatus::Pending,
        result: None,
        created_at: now,
        updated_at: now,
        execution_context: BTreeMap::new(),
        attempt: failed.attempt + 1,
        retry_of: Some(failed.id.clone()),
        ..failed.clone()
    }
}
