//! Planning module for orchestration runs.
//!
//! This module compares the environment description with recorded state,
//! orders the affected constructs into waves, and renders the result as a
//! plan.

mod diff;
mod graph;
mod plan;

pub use diff::{ConstructDiff, DiffResolver, DiffResult};
pub use graph::{DependencyGraph, wave_index};
pub use plan::{DeploymentPlan, PlannedAction};
