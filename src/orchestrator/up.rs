//! The `up` flow: converge an environment onto its description.
//!
//! Waves run in order. Within a wave, constructs are provisioned concurrently
//! up to the configured limit. The first failure stops further constructs
//! from starting; those already running are allowed to finish and record
//! their outcome before the run returns.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::EnvironmentDescription;
use crate::error::{OrchestratorError, Phase, Result, RunError, StackError};
use crate::model::{ConstructAction, ConstructStatus, Urn};
use crate::planner::{DependencyGraph, DiffResolver};
use crate::stack::{StackReference, StackStateReader};
use crate::state::RunCommand;

use super::base::{DryRun, Orchestrator, RunSummary, combine_errors};
use super::progress::{ConstructOutcome, ProgressEvent};

type Actions = Arc<BTreeMap<Urn, ConstructAction>>;

impl Orchestrator {
    /// Converges the environment onto `description`.
    ///
    /// A dry run takes every construct that has work to do as far as its
    /// mode allows (preview, type-check or program files) without changing
    /// any status, and nothing is persisted. Otherwise state is saved however
    /// the run ends.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any provisioning if the
    /// description cannot be reconciled with state, or the first construct
    /// failure (all failures of a wave, for a dry run).
    pub async fn up(
        self: &Arc<Self>,
        description: &EnvironmentDescription,
        dry_run: impl Into<DryRun>,
    ) -> Result<RunSummary> {
        let dry_run = dry_run.into();
        let this = Arc::clone(self);
        let description = description.clone();
        self.run_guarded(RunCommand::Up, !dry_run.is_dry(), async move {
            this.up_body(&description, dry_run).await
        })
        .await
    }

    async fn up_body(
        self: &Arc<Self>,
        description: &EnvironmentDescription,
        dry_run: DryRun,
    ) -> Result<RunSummary> {
        let diff = self
            .state
            .update(|state| DiffResolver::new().resolve(description, state))
            .await?;
        if !diff.dropped.is_empty() {
            info!(count = diff.dropped.len(), "Dropped undeclared constructs that never started");
        }

        let actions: Actions = Arc::new(diff.actions());
        let snapshot = self.state.snapshot().await;
        let waves = DependencyGraph::build(&snapshot, &actions)?.waves()?;
        self.set_scope(waves.iter().flatten());

        let version = if dry_run.is_dry() {
            snapshot.version
        } else {
            self.state.bump_version().await
        };
        let mut summary = RunSummary::new(RunCommand::Up, dry_run, version, waves.len());

        info!(
            waves = waves.len(),
            constructs = actions.len(),
            dry_run = %dry_run,
            "Starting up"
        );
        self.progress.emit(ProgressEvent::RunStarted {
            command: RunCommand::Up.to_string(),
            waves: waves.len(),
            constructs: actions.len(),
        });

        let mut preview_failures = Vec::new();
        for (index, wave) in waves.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(RunError::Cancelled.into());
            }
            debug!(wave = index, size = wave.len(), "Dispatching wave");
            self.progress.emit(ProgressEvent::WaveStarted {
                index,
                size: wave.len(),
            });

            let (outcomes, errors) = self.run_wave(wave, &actions, dry_run).await;
            summary.outcomes.extend(outcomes);

            if errors.is_empty() {
                continue;
            }
            if dry_run.is_dry() {
                preview_failures.extend(errors);
                continue;
            }
            return Err(combine_errors(errors));
        }

        if !preview_failures.is_empty() {
            return Err(combine_errors(preview_failures));
        }
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled.into());
        }
        summary.stacks = self.stack_states();

        info!(
            created = summary.count_status(ConstructStatus::CreateComplete),
            updated = summary.count_status(ConstructStatus::UpdateComplete),
            deleted = summary.count_status(ConstructStatus::DeleteComplete),
            unchanged = summary.unchanged(),
            "Up finished"
        );
        Ok(summary)
    }

    /// Runs one wave, returning every outcome and every failure.
    async fn run_wave(
        self: &Arc<Self>,
        wave: Vec<Urn>,
        actions: &Actions,
        dry_run: DryRun,
    ) -> (Vec<(Urn, ConstructOutcome)>, Vec<OrchestratorError>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let failed = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut outcomes = Vec::with_capacity(wave.len());
        let mut errors = Vec::new();

        for urn in wave {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if (!dry_run.is_dry() && failed.load(Ordering::SeqCst)) || self.cancel.is_cancelled() {
                debug!(urn = %urn, "Not starting construct after failure or cancellation");
                break;
            }
            let Some(action) = actions.get(&urn).copied() else {
                errors.push(OrchestratorError::internal(format!("no action planned for {urn}")));
                continue;
            };

            let this = Arc::clone(self);
            let failed = Arc::clone(&failed);
            tasks.spawn(async move {
                let _permit = permit;
                let result = this.execute_action(&urn, action, dry_run).await;
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                (urn, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((urn, Ok(outcome))) => {
                    self.progress.emit(ProgressEvent::ConstructFinished {
                        urn: urn.clone(),
                        outcome: outcome.clone(),
                    });
                    outcomes.push((urn, outcome));
                }
                Ok((urn, Err(e))) => {
                    warn!(urn = %urn, error = %e, "Construct failed");
                    let outcome = ConstructOutcome::Failed(e.to_string());
                    self.progress.emit(ProgressEvent::ConstructFinished {
                        urn: urn.clone(),
                        outcome: outcome.clone(),
                    });
                    outcomes.push((urn, outcome));
                    errors.push(e);
                }
                Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
                Err(join) => errors.push(OrchestratorError::internal(format!(
                    "construct task aborted: {join}"
                ))),
            }
        }

        (outcomes, errors)
    }

    /// Applies one planned action to one construct.
    async fn execute_action(
        &self,
        urn: &Urn,
        action: ConstructAction,
        dry_run: DryRun,
    ) -> Result<ConstructOutcome> {
        let status = self.state.status(urn).await?;
        if !status.requires_work(action) {
            debug!(urn = %urn, status = %status, "Nothing to do");
            return Ok(ConstructOutcome::Skipped);
        }

        if action == ConstructAction::Delete {
            if dry_run.is_dry() {
                info!(urn = %urn, "Dry run: skipping delete");
                return Ok(ConstructOutcome::Previewed);
            }
            let region = self.region().await;
            let stack = StackReference::new(urn.clone(), self.construct_dir(urn), region);
            return self.destroy_construct(&stack).await;
        }

        self.progress.emit(ProgressEvent::ConstructStarted {
            urn: urn.clone(),
            action,
        });
        let stack = self
            .evaluate_construct(urn, dry_run.is_dry())
            .await
            .map_err(|e| e.in_construct(urn.to_string(), Phase::Evaluate))?;
        let progress = self.progress.for_construct(urn);

        match dry_run {
            DryRun::Off => self.deploy_construct(&stack, status).await,
            DryRun::Preview => {
                self.engine
                    .preview(&stack, &progress, &self.cancel)
                    .await
                    .map_err(|e| e.in_construct(urn.to_string(), Phase::Preview))?;
                Ok(ConstructOutcome::Previewed)
            }
            DryRun::Compile => {
                self.engine
                    .compile(&stack, &progress, &self.cancel)
                    .await
                    .map_err(|e| e.in_construct(urn.to_string(), Phase::Compile))?;
                Ok(ConstructOutcome::Compiled)
            }
            DryRun::FileOnly => {
                info!(urn = %urn, dir = %stack.iac_dir.display(), "Program written");
                Ok(ConstructOutcome::Generated)
            }
        }
    }

    /// Runs the engine update for an evaluated construct and records the result.
    async fn deploy_construct(
        &self,
        stack: &StackReference,
        status: ConstructStatus,
    ) -> Result<ConstructOutcome> {
        let urn = &stack.construct_urn;
        if let Some(next) = status.started() {
            self.state.transition(urn, next).await?;
        }

        let result = match self
            .engine
            .up(stack, &self.progress.for_construct(urn), &self.cancel)
            .await
        {
            Ok(result) if result.succeeded() => result,
            Ok(result) => {
                self.record_failure(urn).await;
                let failed = OrchestratorError::from(StackError::Failed {
                    stack: stack.name.clone(),
                    result: result.result.to_string(),
                });
                return Err(failed.in_construct(urn.to_string(), Phase::Deploy));
            }
            Err(e) => {
                self.record_failure(urn).await;
                return Err(e.in_construct(urn.to_string(), Phase::Deploy));
            }
        };

        let stack_state = match StackStateReader::read(&result.snapshot) {
            Ok(stack_state) => stack_state,
            Err(e) => {
                self.record_failure(urn).await;
                return Err(OrchestratorError::from(e).in_construct(urn.to_string(), Phase::Record));
            }
        };
        debug!(
            urn = %urn,
            resources = stack_state.resources.len(),
            "Read stack resources"
        );

        self.state
            .register_outputs(urn, stack_state.outputs.clone())
            .await
            .map_err(|e| e.in_construct(urn.to_string(), Phase::Record))?;
        self.record_stack(urn, stack_state);
        let status = self
            .state
            .complete(urn)
            .await
            .map_err(|e| e.in_construct(urn.to_string(), Phase::Record))?;
        info!(urn = %urn, status = %status, "Construct provisioned");
        Ok(ConstructOutcome::Completed(status))
    }
}
