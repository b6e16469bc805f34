//! Stack engine abstraction.
//!
//! A stack engine turns a generated infrastructure program into real
//! resources. The orchestrator only talks to engines through
//! [`StackEngine`], which keeps tests free of external tooling.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::Urn;
use crate::orchestrator::ProgressReporter;

/// Identifies one stack: the construct it belongs to and where its program lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackReference {
    /// Construct the stack provisions.
    pub construct_urn: Urn,
    /// Engine-side stack name.
    pub name: String,
    /// Directory containing the generated program.
    pub iac_dir: PathBuf,
    /// Region the stack deploys to.
    pub region: String,
}

/// Result code reported by the engine for an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultCode {
    /// The update applied cleanly.
    Succeeded,
    /// The update ran but did not converge.
    Failed,
}

/// Outcome of [`StackEngine::up`].
#[derive(Debug, Clone, PartialEq)]
pub struct StackResult {
    /// Engine result code.
    pub result: ResultCode,
    /// Exported snapshot after the update.
    pub snapshot: serde_json::Value,
}

impl StackReference {
    /// Creates a reference for a construct whose program lives in `iac_dir`.
    #[must_use]
    pub fn new(construct_urn: Urn, iac_dir: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        let name = construct_urn.stack_name();
        Self {
            construct_urn,
            name,
            iac_dir: iac_dir.into(),
            region: region.into(),
        }
    }
}

impl StackResult {
    /// Returns true if the engine reported success.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result == ResultCode::Succeeded
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Operations the orchestrator needs from an infrastructure engine.
///
/// Every stack operation selects (creating if needed) the stack, configures
/// its region and installs the program's dependencies before doing its work.
#[async_trait]
pub trait StackEngine: Send + Sync {
    /// Computes the changes an update would make, without applying them.
    async fn preview(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Installs the program's dependencies and type-checks it.
    ///
    /// Never touches the stack itself.
    async fn compile(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Applies the program and returns the resulting snapshot.
    async fn up(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<StackResult>;

    /// Destroys every resource of the stack, then removes the stack.
    async fn destroy(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Exports the stack's current snapshot.
    async fn export_state(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value>;

    /// Engine name for logs.
    fn name(&self) -> &str;
}
