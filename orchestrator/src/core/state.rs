//! Run-scoped global state: the natural-language progress summary plus its history.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Component that produced a state replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSource {
    User,
    Manager,
    /// Dispatcher, tagged with the execution unit that ran the task.
    Executor(String),
}

impl fmt::Display for StateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateSource::User => f.write_str("user"),
            StateSource::Manager => f.write_str("manager"),
            StateSource::Executor(unit) => write!(f, "executor_{unit}"),
        }
    }
}

impl Serialize for StateSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A replaced `current_state` value and who replaced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateEntry {
    pub previous_state: String,
    pub source: StateSource,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state threaded through every component for the duration of one run.
///
/// `current_state` is only ever replaced, and every replacement appends the
/// prior value to `state_history`. `original_goal` is fixed at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalState {
    original_goal: String,
    current_state: String,
    state_history: Vec<StateEntry>,
    context_variables: BTreeMap<String, String>,
}

impl GlobalState {
    pub fn new(original_goal: impl Into<String>) -> Self {
        Self {
            original_goal: original_goal.into(),
            ..Self::default()
        }
    }

    pub fn original_goal(&self) -> &str {
        &self.original_goal
    }

    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    pub fn history(&self) -> &[StateEntry] {
        &self.state_history
    }

    /// The last `n` history entries, oldest first.
    pub fn recent_history(&self, n: usize) -> &[StateEntry] {
        let start = self.state_history.len().saturating_sub(n);
        &self.state_history[start..]
    }

    pub fn context_variables(&self) -> &BTreeMap<String, String> {
        &self.context_variables
    }

    pub fn context_variable(&self, key: &str) -> Option<&str> {
        self.context_variables.get(key).map(String::as_str)
    }

    /// Replace `current_state`, recording the old value with `source`.
    pub fn replace(&mut self, next: impl Into<String>, source: StateSource) {
        let previous_state = std::mem::replace(&mut self.current_state, next.into());
        self.state_history.push(StateEntry {
            previous_state,
            source,
            timestamp: Utc::now(),
        });
    }

    pub fn set_context_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context_variables.insert(key.into(), value.into());
    }

    /// Deep copy for concurrent readers; later mutations of `self` are not visible through it.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot(Arc::new(self.clone()))
    }
}

/// Immutable, shareable copy of [`GlobalState`] taken before a parallel batch.
#[derive(Debug, Clone)]
pub struct StateSnapshot(Arc<GlobalState>);

impl Deref for StateSnapshot {
    type Target = GlobalState;

    fn deref(&self) -> &GlobalState {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_appends_previous_value_with_source() {
        let mut state = GlobalState::new("ship it");
        state.replace("planning", StateSource::User);
        state.replace("built", StateSource::Executor("shell".to_string()));

        assert_eq!(state.current_state(), "built");
        let sources: Vec<String> = state.history().iter().map(|e| e.source.to_string()).collect();
        assert_eq!(sources, vec!["user", "executor_shell"]);
        assert_eq!(state.history()[0].previous_state, "");
        assert_eq!(state.history()[1].previous_state, "planning");
        assert_eq!(state.original_goal(), "ship it");
    }

    #[test]
    fn recent_history_returns_tail() {
        let mut state = GlobalState::new("g");
        for i in 0..5 {
            state.replace(format!("s{i}"), StateSource::Manager);
        }
        let recent: Vec<&str> = state
            .recent_history(2)
            .iter()
            .map(|e| e.previous_state.as_str())
            .collect();
        assert_eq!(recent, vec!["s2", "s3"]);
        assert_eq!(state.recent_history(50).len(), 5);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let mut state = GlobalState::new("g");
        state.set_context_variable("k", "v1");
        let snapshot = state.snapshot();

        state.set_context_variable("k", "v2");
        state.replace("changed", StateSource::Manager);

        assert_eq!(snapshot.context_variable("k"), Some("v1"));
        assert_eq!(snapshot.current_state(), "");
        assert!(snapshot.history().is_empty());
    }
}
