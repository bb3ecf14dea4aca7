//! Variable reordering: node-count sifting and expected-cost search.
//!
//! Both passes only move a variable inside the window its ordering
//! constraints allow, and every trial recompiles the diagram from the CFG,
//! so every candidate they consider computes the same function.

mod constraints;
mod cost;
mod sifting;

use std::num::NonZeroUsize;
use std::thread;

pub(crate) use constraints::{Constraints, move_var};
pub use cost::{
    CostModel, CostOptions, FunctionCost, ProbabilityEstimator, UniformEstimator, UnitCost,
};
pub(crate) use cost::{CostTables, level_contributions, optimize};
pub use sifting::SiftingOptions;
pub(crate) use sifting::sift;

/// Candidate counts above this are tried on worker threads.
const PARALLEL_THRESHOLD: usize = 7;

/// Run `trial` for every candidate, returning results in candidate order.
///
/// Trials are pure, so they may run on scoped threads; the caller picks the
/// winner and commits it.
pub(crate) fn run_trials<T, F>(candidates: &[usize], parallel: bool, trial: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    if !parallel || candidates.len() <= PARALLEL_THRESHOLD {
        return candidates.iter().map(|&c| trial(c)).collect();
    }
    let workers = thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .min(candidates.len());
    let chunk = candidates.len().div_ceil(workers);
    let trial = &trial;
    thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .chunks(chunk)
            .map(|part| scope.spawn(move || part.iter().map(|&c| trial(c)).collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(results) => results,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}
