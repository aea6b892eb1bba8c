//! Validation of task specs produced by planners or the reasoning oracle.

use crate::core::types::{InstructionKind, Phase, TaskSpec};

/// Check a task spec before it may enter the task store:
/// - `name`, `instruction`, `executor_name`, `expected_output` present and non-empty
/// - `executor_name` resolves via `is_known_executor`
/// - `phase`, when given, is one of the three phases
/// - `instruction_kind`, when given, is one of the two kinds
///
/// Returns stable, human-readable messages (empty when the spec is valid).
pub fn validate_task_spec(spec: &TaskSpec, is_known_executor: impl Fn(&str) -> bool) -> Vec<String> {
    let label = spec_label(spec);
    let mut errors = Vec::new();

    for (field, value) in [
        ("name", &spec.name),
        ("instruction", &spec.instruction),
        ("executor_name", &spec.executor_name),
        ("expected_output", &spec.expected_output),
    ] {
        if is_blank(value) {
            errors.push(format!("{label}: missing required field '{field}'"));
        }
    }

    if let Some(executor) = spec.executor_name.as_deref().map(str::trim)
        && !executor.is_empty()
        && !is_known_executor(executor)
    {
        errors.push(format!("{label}: unknown executor '{executor}'"));
    }

    if let Some(phase) = present(&spec.phase)
        && Phase::parse(phase).is_none()
    {
        errors.push(format!(
            "{label}: invalid phase '{phase}' (expected information, execution or verification)"
        ));
    }

    if let Some(kind) = present(&spec.instruction_kind)
        && InstructionKind::parse(kind).is_none()
    {
        errors.push(format!(
            "{label}: invalid instruction kind '{kind}' (expected execution or information)"
        ));
    }

    errors
}

/// Optional fields left blank count as absent.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn spec_label(spec: &TaskSpec) -> String {
    match (spec.id.as_deref(), spec.name.as_deref()) {
        (Some(id), _) if !id.trim().is_empty() => format!("task '{id}'"),
        (_, Some(name)) if !name.trim().is_empty() => format!("task '{name}'"),
        _ => "task spec".to_string(),
    }
}
