//! Precondition evaluation: which pending tasks can run right now.
//!
//! Trivial preconditions short-circuit without consulting the oracle. Up to
//! two pending tasks are checked serially in store order; more fan out to a
//! bounded worker pool that reads an immutable snapshot of the global state.

use std::thread;

use tracing::{debug, instrument, warn};

use crate::core::reply::{PreconditionReply, parse_reply};
use crate::core::selector::{
    EvaluationStrategy, is_trivially_satisfied, passes_threshold, sort_by_confidence, strategy_for,
};
use crate::core::state::GlobalState;
use crate::core::types::{Candidate, Task, TaskStatus};
use crate::io::oracle::{PreconditionJudge, PreconditionQuery};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Verdict {
    satisfied: bool,
    confidence: f64,
}

const UNSATISFIED: Verdict = Verdict {
    satisfied: false,
    confidence: 0.0,
};

/// Pending tasks whose precondition holds, sorted by confidence (highest first).
///
/// The serial/parallel switch counts every pending task; trivial preconditions
/// are settled inside the per-task check without reaching the oracle.
/// A failed oracle call counts as unsatisfied and never aborts the batch.
#[instrument(skip_all, fields(tasks = tasks.len()))]
pub fn find_executable<J: PreconditionJudge + ?Sized>(
    judge: &J,
    tasks: &[Task],
    state: &GlobalState,
) -> Vec<Candidate> {
    let pending: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .collect();

    let strategy = strategy_for(pending.len());
    debug!(pending = pending.len(), ?strategy, "evaluating preconditions");
    let verdicts = match strategy {
        EvaluationStrategy::Serial => evaluate_serial(judge, &pending, state),
        EvaluationStrategy::Parallel { workers } => {
            evaluate_parallel(judge, &pending, state, workers)
        }
    };

    let mut candidates: Vec<Candidate> = pending
        .into_iter()
        .zip(verdicts)
        .filter(|(_, verdict)| passes_threshold(verdict.satisfied, verdict.confidence))
        .map(|(task, verdict)| Candidate {
            task: task.clone(),
            confidence: verdict.confidence,
        })
        .collect();
    sort_by_confidence(&mut candidates);
    debug!(executable = candidates.len(), "preconditions evaluated");
    candidates
}

fn evaluate_serial<J: PreconditionJudge + ?Sized>(
    judge: &J,
    pending: &[&Task],
    state: &GlobalState,
) -> Vec<Verdict> {
    pending.iter().map(|task| check(judge, task, state)).collect()
}

/// Fan `pending` out to `workers` threads over a snapshot of `state`.
///
/// Verdicts come back in `pending` order regardless of completion order.
fn evaluate_parallel<J: PreconditionJudge + ?Sized>(
    judge: &J,
    pending: &[&Task],
    state: &GlobalState,
    workers: usize,
) -> Vec<Verdict> {
    let snapshot = state.snapshot();
    let snapshot: &GlobalState = &snapshot;
    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, &Task)>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Verdict)>();
    for job in pending.iter().copied().enumerate() {
        // Receivers outlive this loop, so the send cannot fail.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let mut verdicts = vec![UNSATISFIED; pending.len()];
    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (slot, task) in job_rx.iter() {
                    let verdict = check(judge, task, snapshot);
                    if result_tx.send((slot, verdict)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        for (slot, verdict) in result_rx.iter() {
            verdicts[slot] = verdict;
        }
    });
    verdicts
}

fn check<J: PreconditionJudge + ?Sized>(judge: &J, task: &Task, state: &GlobalState) -> Verdict {
    if is_trivially_satisfied(&task.precondition) {
        return Verdict {
            satisfied: true,
            confidence: 1.0,
        };
    }
    let query = PreconditionQuery::new(&task.precondition, state);
    let reply = judge
        .check_precondition(&query)
        .and_then(|raw| parse_reply::<PreconditionReply>(&raw));
    match reply {
        Ok(reply) => {
            debug!(
                task_id = %task.id,
                satisfied = reply.satisfied,
                confidence = reply.confidence,
                explanation = %reply.explanation,
                "precondition checked"
            );
            Verdict {
                satisfied: reply.satisfied,
                confidence: reply.confidence,
            }
        }
        Err(err) => {
            warn!(task_id = %task.id, error = %err, "precondition check failed, treating as unsatisfied");
            UNSATISFIED
        }
    }
}
