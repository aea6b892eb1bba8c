//! Pure helpers for the post-execution state update.

use crate::core::types::{Task, TaskResult};

/// Maximum characters of output/error forwarded to the narrator.
pub const RESULT_PREVIEW_CHARS: usize = 500;

/// Narrated descriptions shorter than this are rejected in favor of the fallback.
pub const MIN_DESCRIPTION_CHARS: usize = 10;

/// History entries shown to the narrator.
pub const NARRATOR_HISTORY: usize = 3;

/// Deterministic summary used when the narrator is unavailable.
///
/// `"succeeded: <name>"` / `"failed: <name>"`, prefixed with the goal when one is set.
pub fn fallback_summary(goal: &str, task: &Task, result: &TaskResult) -> String {
    let verb = if result.success { "succeeded" } else { "failed" };
    let summary = format!("{verb}: {}", task.name);
    if goal.trim().is_empty() {
        summary
    } else {
        format!("{}; {summary}", goal.trim())
    }
}

/// First [`RESULT_PREVIEW_CHARS`] characters of the output (success) or error (failure).
pub fn result_preview(result: &TaskResult) -> String {
    let text = result.primary_text();
    match text.char_indices().nth(RESULT_PREVIEW_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Accept a narrated description when it is at least [`MIN_DESCRIPTION_CHARS`] long.
pub fn accept_description(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (trimmed.chars().count() >= MIN_DESCRIPTION_CHARS).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    #[test]
    fn fallback_summary_names_outcome_and_goal() {
        let mut t = task("t1", "none");
        t.name = "Compile".to_string();

        assert_eq!(
            fallback_summary("", &t, &TaskResult::success("ok")),
            "succeeded: Compile"
        );
        assert_eq!(
            fallback_summary("ship v2", &t, &TaskResult::failure("boom")),
            "ship v2; failed: Compile"
        );
    }

    #[test]
    fn preview_is_bounded_by_chars_not_bytes() {
        let long = "é".repeat(RESULT_PREVIEW_CHARS + 20);
        let preview = result_preview(&TaskResult::success(long));
        assert_eq!(preview.chars().count(), RESULT_PREVIEW_CHARS);

        let preview = result_preview(&TaskResult::failure("short error"));
        assert_eq!(preview, "short error");
    }

    #[test]
    fn short_descriptions_are_rejected() {
        assert_eq!(accept_description("  too short "), None);
        assert_eq!(accept_description("   ok   "), None);
        assert_eq!(accept_description("ten chars!"), Some("ten chars!".to_string()));
        assert_eq!(
            accept_description(" Build finished, tests next. "),
            Some("Build finished, tests next.".to_string())
        );
    }
}
