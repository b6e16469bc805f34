//! The persisted environment state document.
//!
//! One document per environment holds the last-known state of every construct
//! plus a short run history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{ConstructState, ConstructStatus, Urn};

/// Maximum number of run records kept in the document.
pub const MAX_HISTORY: usize = 100;

/// The complete state of one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentState {
    /// Schema version the document was written with.
    pub schema_version: u32,
    /// Incremented once per applied `up` run.
    #[serde(default)]
    pub version: u64,
    /// URN of the owning application environment.
    pub app_urn: Urn,
    /// Environment name.
    pub environment: String,
    /// Default region of every stack.
    pub default_region: String,
    /// Constructs keyed by URN.
    #[serde(default)]
    pub constructs: BTreeMap<Urn, ConstructState>,
    /// When the document was last written.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<RunRecord>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    /// Command that was run.
    pub command: RunCommand,
    /// Constructs the run acted on.
    pub constructs: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Error message of a failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Commands that are recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunCommand {
    /// Create/update/delete to match the description.
    Up,
    /// Tear down the environment.
    Down,
}

impl EnvironmentState {
    /// Creates an empty state document.
    #[must_use]
    pub fn new(
        schema_version: u32,
        app_urn: Urn,
        environment: impl Into<String>,
        default_region: impl Into<String>,
    ) -> Self {
        Self {
            schema_version,
            version: 0,
            app_urn,
            environment: environment.into(),
            default_region: default_region.into(),
            constructs: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a construct by URN.
    #[must_use]
    pub fn construct(&self, urn: &Urn) -> Option<&ConstructState> {
        self.constructs.get(urn)
    }

    /// Gets a mutable construct by URN.
    pub fn construct_mut(&mut self, urn: &Urn) -> Option<&mut ConstructState> {
        self.constructs.get_mut(urn)
    }

    /// Adds or replaces a construct.
    pub fn insert(&mut self, construct: ConstructState) {
        self.constructs.insert(construct.urn().clone(), construct);
    }

    /// Removes a construct.
    pub fn remove(&mut self, urn: &Urn) -> Option<ConstructState> {
        self.constructs.remove(urn)
    }

    /// Drops every construct that reached `DeleteComplete`.
    ///
    /// Returns the removed URNs.
    pub fn prune_deleted(&mut self) -> Vec<Urn> {
        let deleted: Vec<Urn> = self
            .constructs
            .values()
            .filter(|c| c.status() == ConstructStatus::DeleteComplete)
            .map(|c| c.urn().clone())
            .collect();
        for urn in &deleted {
            self.constructs.remove(urn);
        }
        deleted
    }

    /// Returns constructs that still exist in the target environment.
    #[must_use]
    pub fn deletable(&self) -> Vec<&ConstructState> {
        self.constructs
            .values()
            .filter(|c| c.status().is_deletable())
            .collect()
    }

    /// Resolves pending inputs from outputs already recorded in this document.
    ///
    /// Returns the number of inputs that were resolved.
    pub fn resolve_pending_inputs(&mut self) -> usize {
        let producers: Vec<(Urn, BTreeMap<String, serde_json::Value>)> = self
            .constructs
            .values()
            .filter(|c| !c.outputs().is_empty())
            .map(|c| (c.urn().clone(), c.outputs().clone()))
            .collect();

        let mut resolved = 0;
        for (producer, outputs) in &producers {
            for construct in self.constructs.values_mut() {
                resolved += construct.resolve_inputs_from(producer, outputs);
            }
        }
        resolved
    }

    /// Appends a run record, keeping only the most recent entries.
    pub fn add_history(&mut self, record: RunRecord) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(record);
    }

    /// Counts constructs per status.
    #[must_use]
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for construct in self.constructs.values() {
            *counts.entry(construct.status().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

impl RunRecord {
    /// Creates a successful run record.
    #[must_use]
    pub fn succeeded(command: RunCommand, constructs: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            command,
            constructs,
            success: true,
            error: None,
        }
    }

    /// Creates a failed run record.
    #[must_use]
    pub fn failed(command: RunCommand, constructs: Vec<String>, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            command,
            constructs,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for RunCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let command = match self {
            Self::Up => "up",
            Self::Down => "down",
        };
        write!(f, "{command}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstructSpec;

    fn state() -> EnvironmentState {
        EnvironmentState::new(
            1,
            Urn::parse("urn:acme:shop:dev:web").expect("valid urn"),
            "dev",
            "us-east-1",
        )
    }

    #[test]
    fn test_history_is_capped() {
        let mut s = state();
        for _ in 0..(MAX_HISTORY + 5) {
            s.add_history(RunRecord::succeeded(RunCommand::Up, vec![]));
        }
        assert_eq!(s.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_json_keys_are_urn_strings() {
        let mut s = state();
        let urn = Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Bucket:assets")
            .expect("valid urn");
        s.insert(ConstructState::new(urn.clone(), ConstructSpec::default(), "h"));

        let json = serde_json::to_value(&s).expect("serialize");
        assert!(json["constructs"].get(urn.to_string()).is_some());
        assert_eq!(
            json["constructs"][urn.to_string()]["status"],
            serde_json::json!("create_pending")
        );

        let back: EnvironmentState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, s);
    }

    #[test]
    fn test_deletable_excludes_deleted() {
        let mut s = state();
        let urn = Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Bucket:assets")
            .expect("valid urn");
        s.insert(ConstructState::new(urn, ConstructSpec::default(), "h"));
        assert_eq!(s.deletable().len(), 1);
        assert!(s.prune_deleted().is_empty());
    }
}
