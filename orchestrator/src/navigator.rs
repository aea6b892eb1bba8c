//! Choose the next task among the executable candidates.

use tracing::{debug, instrument, warn};

use crate::core::reply::{SelectionReply, parse_reply};
use crate::core::selector::highest_confidence;
use crate::core::types::{Candidate, ExecutionRecord};
use crate::io::oracle::{CandidateView, HistoryView, SelectionQuery, TaskSelector};

/// Execution records shown to the selector.
pub const SELECTION_HISTORY: usize = 5;

/// Pick one candidate, or `None` when there are none.
///
/// A single candidate is returned without asking the oracle. When the oracle
/// fails or names an unknown id, the highest-confidence candidate wins.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub fn select_next<'a, S: TaskSelector + ?Sized>(
    selector: &S,
    candidates: &'a [Candidate],
    history: &[ExecutionRecord],
) -> Option<&'a Candidate> {
    match candidates {
        [] => return None,
        [only] => return Some(only),
        _ => {}
    }

    let query = SelectionQuery {
        candidates: candidates.iter().map(CandidateView::from).collect(),
        recent_history: history
            .iter()
            .skip(history.len().saturating_sub(SELECTION_HISTORY))
            .map(HistoryView::from)
            .collect(),
    };

    let reply = selector
        .select_task(&query)
        .and_then(|raw| parse_reply::<SelectionReply>(&raw));
    let chosen = match reply {
        Ok(reply) => {
            let id = reply.selected_task_id.as_deref().map(str::trim);
            let found = id.and_then(|id| candidates.iter().find(|c| c.task.id == id));
            if found.is_none() {
                warn!(selected = ?id, "selector named no known candidate, using highest confidence");
            } else {
                debug!(reason = %reply.reason, "selector chose a candidate");
            }
            found
        }
        Err(err) => {
            warn!(error = %err, "task selection failed, using highest confidence");
            None
        }
    };
    chosen.or_else(|| highest_confidence(candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedOracle, candidate, record};

    fn three() -> Vec<Candidate> {
        vec![
            candidate("a", 0.9),
            candidate("b", 0.7),
            candidate("c", 0.95),
        ]
    }

    #[test]
    fn empty_input_selects_nothing() {
        let oracle = ScriptedOracle::new();
        assert!(select_next(&oracle, &[], &[]).is_none());
        assert_eq!(oracle.selection_calls(), 0);
    }

    #[test]
    fn single_candidate_skips_the_oracle() {
        let oracle = ScriptedOracle::new().with_selection(r#"{"selected_task_id": "zzz"}"#);
        let only = vec![candidate("solo", 0.6)];

        let chosen = select_next(&oracle, &only, &[]).expect("candidate");

        assert_eq!(chosen.task.id, "solo");
        assert_eq!(oracle.selection_calls(), 0);
    }

    #[test]
    fn oracle_choice_is_honored() {
        let oracle = ScriptedOracle::new()
            .with_selection(r#"{"selected_task_id": "b", "reason": "unblocks the rest"}"#);
        let candidates = three();

        let chosen = select_next(&oracle, &candidates, &[record("x", true)]).expect("candidate");

        assert_eq!(chosen.task.id, "b");
        assert_eq!(oracle.selection_calls(), 1);
    }

    #[test]
    fn unparsable_reply_falls_back_to_highest_confidence() {
        let oracle = ScriptedOracle::new().with_selection("let me think about that");
        let candidates = three();

        let chosen = select_next(&oracle, &candidates, &[]).expect("candidate");

        assert_eq!(chosen.task.id, "c");
    }

    #[test]
    fn unknown_id_falls_back_to_highest_confidence() {
        let oracle = ScriptedOracle::new().with_selection(r#"{"selected_task_id": "ghost"}"#);
        let candidates = three();

        assert_eq!(
            select_next(&oracle, &candidates, &[]).map(|c| c.task.id.as_str()),
            Some("c")
        );
    }

    #[test]
    fn oracle_error_falls_back_and_ties_keep_discovery_order() {
        let oracle = ScriptedOracle::new();
        let candidates = vec![
            candidate("first", 0.8),
            candidate("second", 0.8),
            candidate("third", 0.6),
        ];

        assert_eq!(
            select_next(&oracle, &candidates, &[]).map(|c| c.task.id.as_str()),
            Some("first")
        );
        assert_eq!(oracle.selection_calls(), 1);
    }
}
