//! Orchestration of construct lifecycles.
//!
//! This module drives `up` and `down` runs: evaluating constructs into
//! programs, dispatching dependency waves to the stack engine with bounded
//! concurrency, recording every transition, and persisting state however a
//! run ends.

mod base;
mod down;
mod evaluator;
mod progress;
mod up;

#[cfg(test)]
mod testing;

pub use base::{DEFAULT_CONCURRENCY, DryRun, Orchestrator, RunSummary};
pub use evaluator::{CONSTRUCT_FILE_NAME, CommandEvaluator, ConstructEvaluator};
pub use progress::{ConstructOutcome, ProgressEvent, ProgressReporter};
