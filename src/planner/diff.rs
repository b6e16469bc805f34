//! Diff resolver comparing the environment description against state.
//!
//! Classifies each construct as create, update or delete and seeds its
//! pending status. The state document is mutated in place; the caller decides
//! whether to persist it.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{ConstructHasher, EnvironmentDescription};
use crate::error::{ConfigError, Result, StateError};
use crate::model::{ConstructAction, ConstructSpec, ConstructState, ConstructStatus, Urn};
use crate::state::EnvironmentState;

/// Resolves per-construct actions for a run.
#[derive(Debug, Default)]
pub struct DiffResolver {
    hasher: ConstructHasher,
}

/// Outcome of diffing a single construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructDiff {
    /// Construct URN.
    pub urn: Urn,
    /// Action for this run.
    pub action: ConstructAction,
    /// Status before the diff, if the construct was known.
    pub previous: Option<ConstructStatus>,
    /// Status after seeding.
    pub status: ConstructStatus,
    /// Whether the declaration changed since it was last applied.
    pub changed: bool,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Per-construct diffs in URN order.
    pub diffs: Vec<ConstructDiff>,
    /// Undeclared constructs that never started and were simply dropped.
    pub dropped: Vec<Urn>,
}

impl DiffResolver {
    /// Creates a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConstructHasher::new(),
        }
    }

    /// Diffs `description` against `state`, seeding pending statuses.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on schema or region drift, or a state
    /// error if a construct cannot be reseeded.
    pub fn resolve(
        &self,
        description: &EnvironmentDescription,
        state: &mut EnvironmentState,
    ) -> Result<DiffResult> {
        Self::check_drift(description, state)?;

        let mut result = DiffResult::default();

        for (urn, spec) in &description.constructs {
            let hash = self.hasher.hash_construct(urn, spec);
            let diff = if let Some(existing) = state.construct_mut(urn) {
                Self::diff_declared(existing, spec, hash)?
            } else {
                debug!(urn = %urn, "New construct");
                state.insert(ConstructState::new(urn.clone(), spec.clone(), hash));
                ConstructDiff {
                    urn: urn.clone(),
                    action: ConstructAction::Create,
                    previous: None,
                    status: ConstructStatus::CreatePending,
                    changed: true,
                }
            };
            result.diffs.push(diff);
        }

        let undeclared: Vec<Urn> = state
            .constructs
            .keys()
            .filter(|urn| !description.constructs.contains_key(*urn))
            .cloned()
            .collect();

        for urn in undeclared {
            let Some(existing) = state.construct_mut(&urn) else {
                continue;
            };
            let previous = existing.status();
            match previous {
                ConstructStatus::DeleteComplete | ConstructStatus::CreatePending => {
                    debug!(urn = %urn, status = %previous, "Dropping undeclared construct");
                    state.remove(&urn);
                    result.dropped.push(urn);
                }
                _ => {
                    reseed(existing, ConstructStatus::DeletePending)?;
                    result.diffs.push(ConstructDiff {
                        status: existing.status(),
                        urn,
                        action: ConstructAction::Delete,
                        previous: Some(previous),
                        changed: true,
                    });
                }
            }
        }

        let resolved = state.resolve_pending_inputs();
        if resolved > 0 {
            debug!(resolved, "Resolved inputs from recorded outputs");
        }

        result.diffs.sort_by(|a, b| a.urn.cmp(&b.urn));
        info!(
            creates = result.count(ConstructAction::Create),
            updates = result.count(ConstructAction::Update),
            deletes = result.count(ConstructAction::Delete),
            unchanged = result.unchanged().len(),
            "Diff resolved"
        );
        Ok(result)
    }

    fn diff_declared(
        existing: &mut ConstructState,
        spec: &ConstructSpec,
        hash: String,
    ) -> std::result::Result<ConstructDiff, StateError> {
        let previous = existing.status();
        let changed = existing.spec_hash().is_some_and(|stored| stored != hash);

        let action = match previous {
            ConstructStatus::CreatePending
            | ConstructStatus::Creating
            | ConstructStatus::CreateFailed
            | ConstructStatus::DeleteComplete => {
                reseed(existing, ConstructStatus::CreatePending)?;
                ConstructAction::Create
            }
            ConstructStatus::CreateComplete | ConstructStatus::UpdateComplete if !changed => {
                ConstructAction::Update
            }
            _ => {
                reseed(existing, ConstructStatus::UpdatePending)?;
                ConstructAction::Update
            }
        };

        if changed {
            existing.redeclare(spec.clone(), hash)?;
        } else {
            existing.adopt_spec_hash(hash);
        }

        Ok(ConstructDiff {
            urn: existing.urn().clone(),
            action,
            previous: Some(previous),
            status: existing.status(),
            changed,
        })
    }

    /// Rejects schema drift, and region drift while anything is deployed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SchemaMismatch`] or [`ConfigError::RegionMismatch`].
    pub fn check_drift(
        description: &EnvironmentDescription,
        state: &mut EnvironmentState,
    ) -> std::result::Result<(), ConfigError> {
        if state.schema_version != description.schema_version {
            return Err(ConfigError::SchemaMismatch {
                state: state.schema_version,
                environment: description.schema_version,
            });
        }

        if state.default_region != description.default_region {
            let deployed: Vec<String> = state
                .deletable()
                .iter()
                .map(|c| c.urn().to_string())
                .collect();
            if !deployed.is_empty() {
                return Err(ConfigError::RegionMismatch {
                    from: state.default_region.clone(),
                    to: description.default_region.clone(),
                    deployed: deployed.join(", "),
                });
            }
            info!(
                from = %state.default_region,
                to = %description.default_region,
                "Changing default region"
            );
            state.default_region.clone_from(&description.default_region);
        }

        Ok(())
    }
}

/// Moves a construct out of flight (as failed) and into `target`.
fn reseed(construct: &mut ConstructState, target: ConstructStatus) -> std::result::Result<(), StateError> {
    if construct.status().is_in_flight() {
        construct.transition_failed()?;
    }
    if construct.status() != target {
        construct.transition(target)?;
    }
    Ok(())
}

impl DiffResult {
    /// Returns the action map consumed by the graph builder and orchestrators.
    #[must_use]
    pub fn actions(&self) -> BTreeMap<Urn, ConstructAction> {
        self.diffs
            .iter()
            .map(|d| (d.urn.clone(), d.action))
            .collect()
    }

    /// Returns the number of diffs with the given action.
    #[must_use]
    pub fn count(&self, action: ConstructAction) -> usize {
        self.diffs.iter().filter(|d| d.action == action).count()
    }

    /// Returns constructs that need no work this run.
    #[must_use]
    pub fn unchanged(&self) -> Vec<&Urn> {
        self.diffs
            .iter()
            .filter(|d| !d.status.requires_work(d.action))
            .map(|d| &d.urn)
            .collect()
    }

    /// Returns true if any construct needs work.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.diffs.iter().any(|d| d.status.requires_work(d.action))
    }
}
