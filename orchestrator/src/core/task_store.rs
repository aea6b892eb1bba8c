//! Ordered, append-only collection of tasks for one run.
//!
//! Insertion order is kept for reporting only; eligibility is decided by
//! status and precondition, never by position.

use serde::Serialize;

use crate::core::types::{Task, TaskStatus};

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.iter().any(|task| task.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }

    /// Append a task. Ids are unique for the whole run.
    pub fn insert(&mut self, task: Task) -> Result<(), String> {
        if self.contains(&task.id) {
            return Err(format!("duplicate task id '{}'", task.id));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// `preferred` when it is free, otherwise `task_<n>` for the first free `n > len`.
    pub fn allocate_id(&self, preferred: Option<&str>) -> String {
        if let Some(id) = preferred.map(str::trim).filter(|id| !id.is_empty())
            && !self.contains(id)
        {
            return id.to_string();
        }
        let mut n = self.tasks.len() + 1;
        loop {
            let candidate = format!("task_{n}");
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// `base`, or `base_<n>` for the first free `n >= 2`.
    pub fn unique_id(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &Task> {
        self.with_status(TaskStatus::Pending)
    }

    pub fn with_status(&self, status: TaskStatus) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |task| task.status == status)
    }

    pub fn any_with_status(&self, status: TaskStatus) -> bool {
        self.tasks.iter().any(|task| task.status == status)
    }

    /// True when some task already retries `id`.
    pub fn has_retry_of(&self, id: &str) -> bool {
        self.tasks
            .iter()
            .any(|task| task.retry_of.as_deref() == Some(id))
    }

    /// True when the store is non-empty and every task completed.
    pub fn all_completed(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|task| task.status == TaskStatus::Completed)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.tasks.len(),
            ..StatusCounts::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}
