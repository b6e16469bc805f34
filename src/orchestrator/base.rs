//! Shared orchestration machinery.
//!
//! [`Orchestrator`] owns everything a run needs: the state manager, the stack
//! engine, the construct evaluator and the signals for progress and
//! cancellation. The `up` and `down` flows are implemented on top of it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EvaluateError, OrchestratorError, Phase, Result};
use crate::model::{ConstructStatus, Urn};
use crate::stack::{StackEngine, StackReference, StackState};
use crate::state::{RunCommand, RunRecord, StateManager};

use super::evaluator::ConstructEvaluator;
use super::progress::{ConstructOutcome, ProgressEvent, ProgressReporter};

/// Default number of constructs provisioned at once within a wave.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Drives constructs through their lifecycle.
pub struct Orchestrator {
    pub(super) state: Arc<StateManager>,
    pub(super) engine: Arc<dyn StackEngine>,
    pub(super) evaluator: Arc<dyn ConstructEvaluator>,
    output_dir: PathBuf,
    pub(super) concurrency: usize,
    pub(super) progress: ProgressReporter,
    pub(super) cancel: CancellationToken,
    scope: Mutex<Vec<Urn>>,
    stacks: Mutex<BTreeMap<Urn, StackState>>,
}

/// How far a dry run goes before it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DryRun {
    /// Not a dry run: deploy for real.
    #[default]
    #[value(skip)]
    Off,
    /// Evaluate and ask the engine for a preview.
    Preview,
    /// Evaluate, install dependencies and type-check the program.
    Compile,
    /// Stop once the program files are written.
    FileOnly,
}

impl DryRun {
    /// Returns true for every mode except [`DryRun::Off`].
    #[must_use]
    pub const fn is_dry(self) -> bool {
        !matches!(self, Self::Off)
    }
}

impl From<bool> for DryRun {
    fn from(dry_run: bool) -> Self {
        if dry_run { Self::Preview } else { Self::Off }
    }
}

impl std::fmt::Display for DryRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            Self::Off => "off",
            Self::Preview => "preview",
            Self::Compile => "compile",
            Self::FileOnly => "file-only",
        };
        write!(f, "{mode}")
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Command that ran.
    pub command: RunCommand,
    /// Dry-run mode the run used.
    pub dry_run: DryRun,
    /// State version after the run.
    pub version: u64,
    /// Number of waves dispatched.
    pub waves: usize,
    /// Per-construct outcomes.
    pub outcomes: BTreeMap<Urn, ConstructOutcome>,
    /// Outputs and resources read back from each deployed stack.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub stacks: BTreeMap<Urn, StackState>,
}

impl RunSummary {
    pub(super) const fn new(command: RunCommand, dry_run: DryRun, version: u64, waves: usize) -> Self {
        Self {
            command,
            dry_run,
            version,
            waves,
            outcomes: BTreeMap::new(),
            stacks: BTreeMap::new(),
        }
    }

    /// Counts constructs that ended in `status`.
    #[must_use]
    pub fn count_status(&self, status: ConstructStatus) -> usize {
        self.outcomes
            .values()
            .filter(|o| **o == ConstructOutcome::Completed(status))
            .count()
    }

    /// Counts constructs with no work to do.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| **o == ConstructOutcome::Skipped)
            .count()
    }

    /// Counts constructs a dry run stopped short of deploying.
    #[must_use]
    pub fn previewed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| o.is_dry_run())
            .count()
    }
}

impl Orchestrator {
    /// Creates an orchestrator writing generated programs under `output_dir`.
    #[must_use]
    pub fn new(
        state: Arc<StateManager>,
        engine: Arc<dyn StackEngine>,
        evaluator: Arc<dyn ConstructEvaluator>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state,
            engine,
            evaluator,
            output_dir: output_dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
            progress: ProgressReporter::disabled(),
            cancel: CancellationToken::new(),
            scope: Mutex::new(Vec::new()),
            stacks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Sets how many constructs of a wave may be provisioned at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets where progress events are sent.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Cancels this orchestrator's runs whenever `parent` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Returns the state manager.
    #[must_use]
    pub const fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// Returns the root directory for generated programs.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the directory holding one construct's program.
    #[must_use]
    pub fn construct_dir(&self, urn: &Urn) -> PathBuf {
        self.output_dir.join(urn.stack_name())
    }

    pub(super) async fn region(&self) -> String {
        self.state.update(|state| state.default_region.clone()).await
    }

    pub(super) fn set_scope<'a>(&self, urns: impl IntoIterator<Item = &'a Urn>) {
        let mut scope = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
        *scope = urns.into_iter().cloned().collect();
    }

    /// Keeps the decoded snapshot of a construct's stack for the run summary.
    pub(super) fn record_stack(&self, urn: &Urn, stack: StackState) {
        self.stacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(urn.clone(), stack);
    }

    /// Returns the stack snapshots decoded so far.
    #[must_use]
    pub fn stack_states(&self) -> BTreeMap<Urn, StackState> {
        self.stacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn scope_names(&self) -> Vec<String> {
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Evaluates a construct into a program and returns its stack reference.
    ///
    /// A dry run tolerates inputs that are still waiting on a producer.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluateError::UnresolvedInputs`] if inputs are still
    /// pending, or any error from the evaluator.
    pub async fn evaluate_construct(&self, urn: &Urn, dry_run: bool) -> Result<StackReference> {
        let construct = self.state.construct(urn).await?;
        let unresolved = construct.unresolved_inputs();
        if !unresolved.is_empty() {
            let inputs = unresolved.join(", ");
            if !dry_run {
                return Err(EvaluateError::UnresolvedInputs {
                    urn: urn.to_string(),
                    inputs,
                }
                .into());
            }
            warn!(urn = %urn, inputs = %inputs, "Previewing with unresolved inputs");
        }

        let out_dir = self.construct_dir(urn);
        tokio::fs::create_dir_all(&out_dir).await?;
        let region = self.region().await;
        let iac_dir = self
            .evaluator
            .evaluate(
                &construct,
                &region,
                &out_dir,
                &self.progress.for_construct(urn),
                &self.cancel,
            )
            .await?;
        debug!(urn = %urn, dir = %iac_dir.display(), "Evaluated construct");
        Ok(StackReference::new(urn.clone(), iac_dir, region))
    }

    /// Destroys one construct's stack, recording the outcome.
    ///
    /// Constructs that no longer exist are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or a transition is illegal.
    pub(super) async fn destroy_construct(&self, stack: &StackReference) -> Result<ConstructOutcome> {
        let urn = &stack.construct_urn;
        let status = self.state.status(urn).await?;
        if !status.is_deletable() {
            debug!(urn = %urn, "Already deleted, skipping");
            return Ok(ConstructOutcome::Skipped);
        }
        if status != ConstructStatus::DeletePending {
            self.state
                .transition(urn, ConstructStatus::DeletePending)
                .await?;
        }

        self.progress.emit(ProgressEvent::ConstructStarted {
            urn: urn.clone(),
            action: crate::model::ConstructAction::Delete,
        });
        self.state.transition(urn, ConstructStatus::Deleting).await?;

        let destroyed = self
            .engine
            .destroy(stack, &self.progress.for_construct(urn), &self.cancel)
            .await;
        match destroyed {
            Ok(()) => {
                let status = self.state.complete(urn).await?;
                info!(urn = %urn, "Construct deleted");
                Ok(ConstructOutcome::Completed(status))
            }
            Err(e) => {
                self.record_failure(urn).await;
                Err(e.in_construct(urn.to_string(), Phase::Destroy))
            }
        }
    }

    /// Moves a construct to its failed status after an engine error.
    pub(super) async fn record_failure(&self, urn: &Urn) {
        match self.state.fail(urn).await {
            Ok(status) => debug!(urn = %urn, status = %status, "Recorded failure"),
            Err(e) => error!(urn = %urn, error = %e, "Could not record failure"),
        }
    }

    /// Runs `body` on its own task and persists state however it ends.
    ///
    /// When `persist` is set, constructs left in flight are marked failed,
    /// the run is appended to history and the document is saved, even if
    /// `body` returns an error or panics. A panic is re-raised afterwards.
    pub(super) async fn run_guarded<T, F>(
        self: &Arc<Self>,
        command: RunCommand,
        persist: bool,
        body: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let joined = tokio::spawn(body).await;

        let (result, panic) = match joined {
            Ok(result) => (result, None),
            Err(join) if join.is_panic() => (
                Err(OrchestratorError::internal(format!("{command} run panicked"))),
                Some(join.into_panic()),
            ),
            Err(join) => (
                Err(OrchestratorError::internal(format!("{command} run was aborted: {join}"))),
                None,
            ),
        };

        let result = if persist {
            self.persist(command, result).await
        } else {
            result
        };

        self.progress.emit(ProgressEvent::RunFinished {
            success: result.is_ok(),
        });

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        result
    }

    async fn persist<T>(&self, command: RunCommand, result: Result<T>) -> Result<T> {
        let interrupted = self.state.finalize().await;
        if !interrupted.is_empty() {
            warn!(count = interrupted.len(), "Marked interrupted constructs as failed");
        }

        let constructs = self.scope_names();
        let record = match &result {
            Ok(_) => RunRecord::succeeded(command, constructs),
            Err(e) => RunRecord::failed(command, constructs, &e.to_string()),
        };
        self.state.record_run(record).await;

        match (result, self.state.save().await) {
            (result, Ok(())) => result,
            (Ok(_), Err(save)) => Err(save),
            (Err(run), Err(save)) => {
                error!(error = %save, "Failed to save state after failed run");
                Err(OrchestratorError::Multiple(vec![run, save]))
            }
        }
    }
}

/// Collapses a list of errors into one.
pub(super) fn combine_errors(mut errors: Vec<OrchestratorError>) -> OrchestratorError {
    if errors.len() == 1
        && let Some(error) = errors.pop()
    {
        return error;
    }
    OrchestratorError::Multiple(errors)
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("engine", &self.engine.name())
            .field("output_dir", &self.output_dir)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}
