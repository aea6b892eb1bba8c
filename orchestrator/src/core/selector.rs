//! Deterministic selection rules shared by the evaluator and navigator.

use crate::core::types::Candidate;

/// A precondition verdict must be strictly above this confidence to count.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Batches up to this size are evaluated serially.
pub const SERIAL_BATCH_LIMIT: usize = 2;

/// Upper bound on concurrent precondition checks.
pub const MAX_PRECONDITION_WORKERS: usize = 5;

/// How a batch of precondition checks is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStrategy {
    Serial,
    Parallel { workers: usize },
}

pub fn strategy_for(candidate_count: usize) -> EvaluationStrategy {
    if candidate_count <= SERIAL_BATCH_LIMIT {
        EvaluationStrategy::Serial
    } else {
        EvaluationStrategy::Parallel {
            workers: candidate_count.min(MAX_PRECONDITION_WORKERS),
        }
    }
}

/// `""`, `"none"` and `"null"` (any case, surrounding whitespace ignored) need no oracle call.
pub fn is_trivially_satisfied(precondition: &str) -> bool {
    let trimmed = precondition.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("null")
}

pub fn passes_threshold(satisfied: bool, confidence: f64) -> bool {
    satisfied && confidence > CONFIDENCE_THRESHOLD
}

/// Sort by confidence, highest first. Stable, so ties keep discovery order.
pub fn sort_by_confidence(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

/// Highest-confidence candidate; the earliest one wins a tie.
pub fn highest_confidence(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().reduce(|best, next| {
        if next.confidence > best.confidence {
            next
        } else {
            best
        }
    })
}
