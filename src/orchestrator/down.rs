//! The `down` flow: tear an environment down in reverse dependency order.
//!
//! Constructs are destroyed one at a time. The first failure stops the run;
//! state is saved whatever happens.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, RunError};
use crate::model::{ConstructAction, ConstructStatus, Urn};
use crate::planner::DependencyGraph;
use crate::stack::StackReference;
use crate::state::RunCommand;

use super::base::{DryRun, Orchestrator, RunSummary};
use super::progress::ProgressEvent;

impl Orchestrator {
    /// Destroys every construct recorded in state.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Unsupported`] for a dry run, a planning error if
    /// the recorded dependencies are cyclic, or the first destroy failure.
    pub async fn down(self: &Arc<Self>, dry_run: bool) -> Result<RunSummary> {
        reject_dry_run(dry_run)?;
        let this = Arc::clone(self);
        self.run_guarded(RunCommand::Down, true, async move {
            let stacks = this.plan_down().await?;
            this.down_body(stacks).await
        })
        .await
    }

    /// Destroys the given stacks in order.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Unsupported`] for a dry run, or the first destroy
    /// failure.
    pub async fn run_down(
        self: &Arc<Self>,
        stacks: Vec<StackReference>,
        dry_run: bool,
    ) -> Result<RunSummary> {
        reject_dry_run(dry_run)?;
        let this = Arc::clone(self);
        self.run_guarded(RunCommand::Down, true, async move {
            this.down_body(stacks).await
        })
        .await
    }

    /// Marks every remaining construct for deletion and orders them.
    ///
    /// Constructs that never started provisioning are forgotten instead.
    ///
    /// # Errors
    ///
    /// Returns an error if a construct cannot be marked or the recorded
    /// dependencies are cyclic.
    pub async fn plan_down(&self) -> Result<Vec<StackReference>> {
        let actions = self
            .state
            .update(|state| -> Result<BTreeMap<Urn, ConstructAction>> {
                let mut actions = BTreeMap::new();
                let urns: Vec<Urn> = state.constructs.keys().cloned().collect();
                for urn in urns {
                    let Some(construct) = state.construct_mut(&urn) else {
                        continue;
                    };
                    match construct.status() {
                        ConstructStatus::DeleteComplete => continue,
                        ConstructStatus::CreatePending => {
                            debug!(urn = %urn, "Never provisioned, forgetting");
                            state.remove(&urn);
                            continue;
                        }
                        ConstructStatus::DeletePending => {}
                        _ => construct.transition(ConstructStatus::DeletePending)?,
                    }
                    actions.insert(urn, ConstructAction::Delete);
                }
                Ok(actions)
            })
            .await?;

        let snapshot = self.state.snapshot().await;
        let waves = DependencyGraph::build(&snapshot, &actions)?.waves()?;
        let region = self.region().await;

        Ok(waves
            .into_iter()
            .flatten()
            .map(|urn| {
                let dir = self.construct_dir(&urn);
                StackReference::new(urn, dir, region.clone())
            })
            .collect())
    }

    async fn down_body(&self, stacks: Vec<StackReference>) -> Result<RunSummary> {
        self.set_scope(stacks.iter().map(|s| &s.construct_urn));
        let version = self.state.update(|state| state.version).await;
        let mut summary = RunSummary::new(RunCommand::Down, DryRun::Off, version, stacks.len());

        info!(constructs = stacks.len(), "Starting down");
        self.progress.emit(ProgressEvent::RunStarted {
            command: RunCommand::Down.to_string(),
            waves: stacks.len(),
            constructs: stacks.len(),
        });

        for (index, stack) in stacks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(RunError::Cancelled.into());
            }
            self.progress
                .emit(ProgressEvent::WaveStarted { index, size: 1 });

            let outcome = self.destroy_construct(stack).await?;
            self.progress.emit(ProgressEvent::ConstructFinished {
                urn: stack.construct_urn.clone(),
                outcome: outcome.clone(),
            });
            summary.outcomes.insert(stack.construct_urn.clone(), outcome);
        }

        info!(
            deleted = summary.count_status(ConstructStatus::DeleteComplete),
            "Down finished"
        );
        Ok(summary)
    }
}

fn reject_dry_run(dry_run: bool) -> Result<()> {
    if dry_run {
        return Err(RunError::Unsupported {
            operation: String::from("dry run of down"),
        }
        .into());
    }
    Ok(())
}
