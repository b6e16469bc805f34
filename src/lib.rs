// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Construct Orchestrator
//!
//! Deploys an application environment made of *constructs* (a database, a
//! container service, a bucket) as one infrastructure stack per construct.
//!
//! ## Overview
//!
//! `corch` reads a declarative environment description, works out which
//! constructs must be created, updated or deleted, and drives an external
//! stack engine over them in dependency order:
//!
//! - Each construct is evaluated into a stack program by a generator
//! - Independent constructs in the same wave are provisioned in parallel
//! - Every lifecycle transition is recorded in a local state file
//! - Outputs of finished constructs resolve the pending inputs of their dependents
//! - Interrupted or failed runs resume where they stopped
//!
//! ## Architecture
//!
//! 1. **Description**: `corch.yaml`, parsed by [`config`]
//! 2. **State**: the last known lifecycle status of every construct, kept by [`state`]
//! 3. **Planner**: diffs description against state and orders the work into waves
//! 4. **Orchestrator**: runs the waves through the [`stack`] engine
//!
//! ## Modules
//!
//! - [`model`]: URNs, construct state and the lifecycle table
//! - [`config`]: Description parsing, validation and hashing
//! - [`state`]: State document, lock file and local store
//! - [`planner`]: Diff resolution, dependency graph and plans
//! - [`stack`]: Stack engine abstraction and its process-backed client
//! - [`orchestrator`]: `up` and `down` runs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! schemaVersion: 1
//! appUrn: "urn:acme:shop:dev:web"
//! defaultRegion: us-east-1
//! constructs:
//!   "urn:acme:shop:dev:web:construct/klotho.aws.Postgres:db": {}
//!   "urn:acme:shop:dev:web:construct/klotho.aws.Container:api":
//!     dependsOn:
//!       - "urn:acme:shop:dev:web:construct/klotho.aws.Postgres:db"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod stack;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, ConstructHasher, EnvironmentDescription};
pub use error::{OrchestratorError, Result};
pub use model::{ConstructAction, ConstructState, ConstructStatus, Urn};
pub use orchestrator::{DryRun, Orchestrator, ProgressEvent, RunSummary};
pub use planner::{DependencyGraph, DeploymentPlan, DiffResolver};
pub use stack::{CommandStackEngine, StackEngine, StackReference, StackResult};
pub use state::{EnvironmentState, LocalStateStore, StateManager, StateStore};
