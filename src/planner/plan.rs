//! Deployment plan types and construction.
//!
//! A plan is the read-only view of a run: which action applies to each
//! construct and which wave it lands in. `corch plan` prints it without
//! touching the stack engine.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EnvironmentDescription;
use crate::error::Result;
use crate::model::{ConstructAction, ConstructStatus, Urn};
use crate::state::EnvironmentState;

use super::diff::{DiffResolver, DiffResult};
use super::graph::DependencyGraph;

/// A complete deployment plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Application environment the plan targets.
    pub app_urn: Urn,
    /// Planned actions grouped by wave.
    pub waves: Vec<Vec<PlannedAction>>,
    /// Undeclared constructs that will be forgotten without a delete.
    pub dropped: Vec<Urn>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAction {
    /// Construct URN.
    pub urn: Urn,
    /// Action for this run.
    pub action: ConstructAction,
    /// Status the construct starts the run in.
    pub status: ConstructStatus,
    /// Whether the construct has work to do.
    pub pending: bool,
    /// Why the action was chosen.
    pub reason: String,
}

impl DeploymentPlan {
    /// Builds a plan from a diff and the waves computed for it.
    #[must_use]
    pub fn new(diff: &DiffResult, waves: &[Vec<Urn>], state: &EnvironmentState) -> Self {
        let waves = waves
            .iter()
            .map(|wave| {
                wave.iter()
                    .filter_map(|urn| diff.diffs.iter().find(|d| &d.urn == urn))
                    .map(|d| {
                        let status = state
                            .construct(&d.urn)
                            .map_or(d.status, |c| c.status());
                        let pending = status.requires_work(d.action);
                        let reason = match (d.previous, pending, d.changed) {
                            (_, false, _) => String::from("up to date"),
                            (None, _, _) => String::from("new construct"),
                            (Some(_), _, _) if d.action == ConstructAction::Delete => {
                                String::from("no longer declared")
                            }
                            (Some(_), _, true) => String::from("declaration changed"),
                            (Some(previous), _, false) => format!("resuming from {previous}"),
                        };
                        PlannedAction {
                            urn: d.urn.clone(),
                            action: d.action,
                            status,
                            pending,
                            reason,
                        }
                    })
                    .collect()
            })
            .collect();

        Self {
            created_at: Utc::now(),
            app_urn: state.app_urn.clone(),
            waves,
            dropped: diff.dropped.clone(),
        }
    }

    /// Plans the next `up` against a copy of `state`, leaving it untouched.
    ///
    /// # Errors
    ///
    /// Returns an error on configuration drift or an unorderable graph.
    pub fn preview(description: &EnvironmentDescription, state: &EnvironmentState) -> Result<Self> {
        let mut scratch = state.clone();
        let diff = DiffResolver::new().resolve(description, &mut scratch)?;
        let waves = DependencyGraph::build(&scratch, &diff.actions())?.waves()?;
        Ok(Self::new(&diff, &waves, &scratch))
    }

    /// Returns true if no construct has work to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_actions().next().is_none()
    }

    /// Iterates over actions that have work to do.
    pub fn pending_actions(&self) -> impl Iterator<Item = &PlannedAction> {
        self.waves.iter().flatten().filter(|a| a.pending)
    }

    /// Returns the number of pending actions of the given kind.
    #[must_use]
    pub fn count(&self, action: ConstructAction) -> usize {
        self.pending_actions().filter(|a| a.action == action).count()
    }

    /// Returns a one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to delete across {} waves",
            self.count(ConstructAction::Create),
            self.count(ConstructAction::Update),
            self.count(ConstructAction::Delete),
            self.waves.len()
        )
    }
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        if !self.pending {
            return format!("No change for '{}'", self.urn.short_name());
        }
        match self.action {
            ConstructAction::Create => format!("Create '{}'", self.urn.short_name()),
            ConstructAction::Update => format!("Update '{}'", self.urn.short_name()),
            ConstructAction::Delete => format!("Delete '{}'", self.urn.short_name()),
        }
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.urn)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CURRENT_SCHEMA_VERSION, EnvironmentDescription};
    use crate::model::ConstructSpec;
    use crate::planner::{DependencyGraph, DiffResolver};

    fn urn(id: &str) -> Urn {
        Urn::parse(&format!("urn:acme:shop:dev:web:construct/klotho.aws.Thing:{id}"))
            .expect("valid urn")
    }

    #[test]
    fn test_plan_from_first_run() {
        let mut constructs = std::collections::BTreeMap::new();
        constructs.insert(urn("db"), ConstructSpec::default());
        constructs.insert(
            urn("api"),
            ConstructSpec {
                depends_on: vec![urn("db")],
                ..ConstructSpec::default()
            },
        );
        let description = EnvironmentDescription {
            schema_version: CURRENT_SCHEMA_VERSION,
            app_urn: Urn::parse("urn:acme:shop:dev:web").expect("valid urn"),
            environment: String::from("dev"),
            default_region: String::from("us-east-1"),
            constructs,
        };
        let mut state = EnvironmentState::new(
            CURRENT_SCHEMA_VERSION,
            description.app_urn.clone(),
            "dev",
            "us-east-1",
        );

        let diff = DiffResolver::new()
            .resolve(&description, &mut state)
            .expect("diff");
        let waves = DependencyGraph::build(&state, &diff.actions())
            .expect("graph")
            .waves()
            .expect("acyclic");
        let plan = DeploymentPlan::new(&diff, &waves, &state);

        assert!(!plan.is_empty());
        assert_eq!(plan.count(ConstructAction::Create), 2);
        assert_eq!(plan.waves.len(), 2);
        assert_eq!(plan.waves[0][0].description(), "Create 'db'");
        assert_eq!(plan.waves[1][0].reason, "new construct");
    }

    #[test]
    fn test_preview_leaves_state_untouched() {
        let mut constructs = std::collections::BTreeMap::new();
        constructs.insert(urn("db"), ConstructSpec::default());
        let description = EnvironmentDescription {
            schema_version: CURRENT_SCHEMA_VERSION,
            app_urn: Urn::parse("urn:acme:shop:dev:web").expect("valid urn"),
            environment: String::from("dev"),
            default_region: String::from("us-east-1"),
            constructs,
        };
        let state = EnvironmentState::new(
            CURRENT_SCHEMA_VERSION,
            description.app_urn.clone(),
            "dev",
            "us-east-1",
        );

        let plan = DeploymentPlan::preview(&description, &state).expect("plan");

        assert_eq!(plan.count(ConstructAction::Create), 1);
        assert!(state.constructs.is_empty());
    }
}
