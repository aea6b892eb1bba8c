//! Tolerant parsing of structured oracle replies.
//!
//! Replies are expected to be JSON objects, but may arrive wrapped in a fenced
//! code block or surrounded by prose. Missing fields take defaults and unknown
//! fields are ignored.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("fenced json regex is valid")
});

/// Parse an oracle reply into `T`, trying the raw text, a fenced block, then the outermost braces.
pub fn parse_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let value = extract_json_object(raw).ok_or_else(|| anyhow!("no JSON object in reply"))?;
    serde_json::from_value(value).map_err(|err| anyhow!("unexpected reply shape: {err}"))
}

fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(caps) = FENCED_JSON_RE.captures(trimmed)
        && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&caps[1])
    {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Reply to a precondition check.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreconditionReply {
    #[serde(deserialize_with = "lenient_bool")]
    pub satisfied: bool,
    #[serde(deserialize_with = "confidence")]
    pub confidence: f64,
    #[serde(alias = "reason")]
    pub explanation: String,
}

/// Reply to a next-task selection request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectionReply {
    #[serde(alias = "selectedTaskId", alias = "task_id", alias = "taskId")]
    pub selected_task_id: Option<String>,
    pub reason: String,
}

/// Structural change proposed after an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    AddTasks,
    RemoveTasks,
    ModifyTasks,
    #[default]
    NoChange,
    #[serde(other)]
    Unknown,
}

impl PlanAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanAction::AddTasks => "add_tasks",
            PlanAction::RemoveTasks => "remove_tasks",
            PlanAction::ModifyTasks => "modify_tasks",
            PlanAction::NoChange => "no_change",
            PlanAction::Unknown => "unknown",
        }
    }
}

/// Reply to a plan analysis request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlanReply {
    pub action: PlanAction,
    pub reason: String,
    pub details: Value,
}

impl PlanReply {
    /// Raw `details.new_tasks` entries; each is parsed and validated separately.
    pub fn new_tasks(&self) -> Vec<Value> {
        ["new_tasks", "newTasks"]
            .iter()
            .find_map(|key| self.details.get(key))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

/// Reply to an initial planning request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitialPlanReply {
    pub tasks: Vec<Value>,
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => false,
    })
}

fn confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let reply: PreconditionReply =
            parse_reply(r#"{"satisfied": true, "confidence": 0.8, "explanation": "ok"}"#)
                .expect("parse");
        assert!(reply.satisfied);
        assert_eq!(reply.confidence, 0.8);
        assert_eq!(reply.explanation, "ok");
    }

    #[test]
    fn parses_fenced_block_inside_prose() {
        let raw = "Sure, here you go:\n```json\n{\"selectedTaskId\": \"t2\", \"reason\": \"fastest\"}\n```\nThanks";
        let reply: SelectionReply = parse_reply(raw).expect("parse");
        assert_eq!(reply.selected_task_id.as_deref(), Some("t2"));
    }

    #[test]
    fn parses_outermost_braces_in_prose() {
        let raw = "I think {\"action\": \"add_tasks\", \"reason\": \"r\", \"details\": {\"new_tasks\": [{}, {}]}} is right";
        let reply: PlanReply = parse_reply(raw).expect("parse");
        assert_eq!(reply.action, PlanAction::AddTasks);
        assert_eq!(reply.new_tasks().len(), 2);
    }

    #[test]
    fn rejects_text_without_object() {
        assert!(parse_reply::<SelectionReply>("pick the second one").is_err());
        assert!(parse_reply::<SelectionReply>("[1, 2]").is_err());
    }

    #[test]
    fn clamps_confidence_and_defaults_missing_fields() {
        let reply: PreconditionReply =
            parse_reply(r#"{"satisfied": "yes", "confidence": 7}"#).expect("parse");
        assert!(reply.satisfied);
        assert_eq!(reply.confidence, 1.0);
        assert_eq!(reply.explanation, "");

        let reply: PreconditionReply = parse_reply(r#"{"confidence": "0.4"}"#).expect("parse");
        assert!(!reply.satisfied);
        assert_eq!(reply.confidence, 0.4);
    }

    #[test]
    fn unknown_plan_action_is_preserved_as_unknown() {
        let reply: PlanReply = parse_reply(r#"{"action": "reorder", "reason": "x"}"#).expect("parse");
        assert_eq!(reply.action, PlanAction::Unknown);
        assert!(reply.new_tasks().is_empty());
    }
}
