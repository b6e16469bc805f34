//! Construct state and its lifecycle state machine.
//!
//! Every construct under management carries a [`ConstructStatus`]. The status
//! only ever changes through [`ConstructState::transition`], which checks the
//! move against the lifecycle table and stamps `last_updated`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::StateError;

use super::urn::Urn;

/// Lifecycle status of a construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructStatus {
    /// Waiting to be created.
    CreatePending,
    /// Creation in progress.
    Creating,
    /// Created successfully.
    CreateComplete,
    /// Creation failed.
    CreateFailed,
    /// Waiting to be updated.
    UpdatePending,
    /// Update in progress.
    Updating,
    /// Updated successfully.
    UpdateComplete,
    /// Update failed.
    UpdateFailed,
    /// Waiting to be deleted.
    DeletePending,
    /// Deletion in progress.
    Deleting,
    /// Deleted successfully.
    DeleteComplete,
    /// Deletion failed.
    DeleteFailed,
    /// Outcome could not be classified.
    Unknown,
}

/// Action computed for a construct for the duration of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstructAction {
    /// Provision a construct that does not exist yet.
    Create,
    /// Re-provision an existing construct.
    Update,
    /// Tear a construct down.
    Delete,
}

/// Resolution status of a construct input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputStatus {
    /// Value is known.
    #[default]
    Resolved,
    /// Value waits on another construct's output.
    Pending,
}

/// A single construct input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    /// Current value (may be a placeholder while pending).
    #[serde(default)]
    pub value: serde_json::Value,
    /// Resolution status.
    #[serde(default)]
    pub status: InputStatus,
    /// URN of the construct whose output feeds this input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Urn>,
}

/// Declared shape of a construct, as found in an environment description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructSpec {
    /// Named inputs.
    #[serde(default)]
    pub inputs: BTreeMap<String, Input>,
    /// Constructs this one is wired to.
    #[serde(default)]
    pub bindings: Vec<Urn>,
    /// Constructs this one explicitly depends on.
    #[serde(default)]
    pub depends_on: Vec<Urn>,
    /// Opaque passthrough options.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// Last-known state of one construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructState {
    urn: Urn,
    status: ConstructStatus,
    #[serde(default)]
    inputs: BTreeMap<String, Input>,
    #[serde(default)]
    outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    bindings: Vec<Urn>,
    #[serde(default)]
    depends_on: Vec<Urn>,
    #[serde(default)]
    options: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec_hash: Option<String>,
    last_updated: DateTime<Utc>,
}

impl ConstructStatus {
    /// Returns true if `next` is a legal successor of this status.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConstructStatus::{
            CreateComplete, CreateFailed, CreatePending, Creating, DeleteComplete, DeleteFailed,
            DeletePending, Deleting, Unknown, UpdateComplete, UpdateFailed, UpdatePending,
            Updating,
        };

        if matches!(next, DeletePending) {
            return !self.is_in_flight() && !matches!(self, DeleteComplete | DeletePending);
        }

        matches!(
            (self, next),
            (CreatePending, Creating)
                | (Creating, CreateComplete | CreateFailed | Unknown)
                | (CreateFailed | DeleteComplete, CreatePending)
                | (
                    CreateComplete | UpdateComplete | UpdateFailed | DeletePending | DeleteFailed
                        | Unknown,
                    UpdatePending
                )
                | (UpdatePending, Updating)
                | (Updating, UpdateComplete | UpdateFailed | Unknown)
                | (DeletePending, Deleting)
                | (Deleting, DeleteComplete | DeleteFailed | Unknown)
        )
    }

    /// Returns true for `*Pending` and `*ing` create/update statuses.
    #[must_use]
    pub const fn is_deployable(self) -> bool {
        matches!(
            self,
            Self::CreatePending | Self::Creating | Self::UpdatePending | Self::Updating
        )
    }

    /// Returns true for every status except `DeleteComplete`.
    #[must_use]
    pub const fn is_deletable(self) -> bool {
        !matches!(self, Self::DeleteComplete)
    }

    /// Returns true if a construct in this status has work to do for `action`.
    #[must_use]
    pub const fn requires_work(self, action: ConstructAction) -> bool {
        match action {
            ConstructAction::Delete => self.is_deletable(),
            ConstructAction::Create | ConstructAction::Update => self.is_deployable(),
        }
    }

    /// Returns true while an engine operation is running.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }

    /// Returns the in-flight status that follows this pending status.
    #[must_use]
    pub const fn started(self) -> Option<Self> {
        match self {
            Self::CreatePending => Some(Self::Creating),
            Self::UpdatePending => Some(Self::Updating),
            Self::DeletePending => Some(Self::Deleting),
            _ => None,
        }
    }

    /// Returns the successful terminal status for this in-flight status.
    #[must_use]
    pub const fn completed(self) -> Option<Self> {
        match self {
            Self::Creating => Some(Self::CreateComplete),
            Self::Updating => Some(Self::UpdateComplete),
            Self::Deleting => Some(Self::DeleteComplete),
            _ => None,
        }
    }

    /// Returns the failed terminal status for this in-flight status.
    #[must_use]
    pub const fn failed(self) -> Option<Self> {
        match self {
            Self::Creating => Some(Self::CreateFailed),
            Self::Updating => Some(Self::UpdateFailed),
            Self::Deleting => Some(Self::DeleteFailed),
            _ => None,
        }
    }
}

impl ConstructState {
    /// Creates a new construct in `CreatePending` from its declaration.
    #[must_use]
    pub fn new(urn: Urn, spec: ConstructSpec, spec_hash: impl Into<String>) -> Self {
        Self {
            urn,
            status: ConstructStatus::CreatePending,
            inputs: spec.inputs,
            outputs: BTreeMap::new(),
            bindings: spec.bindings,
            depends_on: spec.depends_on,
            options: spec.options,
            spec_hash: Some(spec_hash.into()),
            last_updated: Utc::now(),
        }
    }

    /// Returns the construct's URN.
    #[must_use]
    pub const fn urn(&self) -> &Urn {
        &self.urn
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> ConstructStatus {
        self.status
    }

    /// Returns the inputs.
    #[must_use]
    pub const fn inputs(&self) -> &BTreeMap<String, Input> {
        &self.inputs
    }

    /// Returns the outputs recorded after provisioning.
    #[must_use]
    pub const fn outputs(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.outputs
    }

    /// Returns the bindings.
    #[must_use]
    pub fn bindings(&self) -> &[Urn] {
        &self.bindings
    }

    /// Returns the explicit dependencies.
    #[must_use]
    pub fn depends_on(&self) -> &[Urn] {
        &self.depends_on
    }

    /// Returns the passthrough options.
    #[must_use]
    pub const fn options(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.options
    }

    /// Returns the hash of the declaration last applied to this construct.
    #[must_use]
    pub fn spec_hash(&self) -> Option<&str> {
        self.spec_hash.as_deref()
    }

    /// Returns when the construct last changed.
    #[must_use]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Iterates over the constructs this one waits for: explicit
    /// dependencies, bindings and the producers of its inputs.
    pub fn dependencies(&self) -> impl Iterator<Item = &Urn> {
        let producers = self
            .inputs
            .values()
            .filter_map(|input| input.depends_on.as_ref());
        self.depends_on
            .iter()
            .chain(self.bindings.iter())
            .chain(producers)
    }

    /// Names of inputs that have not been resolved yet.
    #[must_use]
    pub fn unresolved_inputs(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .filter(|(_, input)| input.status != InputStatus::Resolved)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Moves the construct to `next` if the lifecycle table allows it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidTransition`] and leaves the status
    /// untouched if the move is not legal.
    pub fn transition(&mut self, next: ConstructStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                urn: self.urn.to_string(),
                from: self.status,
                to: next,
            });
        }

        debug!(urn = %self.urn, from = %self.status, to = %next, "Transitioning construct");
        self.status = next;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Moves an in-flight construct to its failed status.
    ///
    /// # Errors
    ///
    /// Returns an error if the construct is not in flight.
    pub fn transition_failed(&mut self) -> Result<(), StateError> {
        let next = self.status.failed().ok_or_else(|| StateError::InvalidTransition {
            urn: self.urn.to_string(),
            from: self.status,
            to: ConstructStatus::Unknown,
        })?;
        self.transition(next)
    }

    /// Moves an in-flight construct to its completed status.
    ///
    /// # Errors
    ///
    /// Returns an error if the construct is not in flight.
    pub fn transition_complete(&mut self) -> Result<(), StateError> {
        let next = self.status.completed().ok_or_else(|| StateError::InvalidTransition {
            urn: self.urn.to_string(),
            from: self.status,
            to: ConstructStatus::Unknown,
        })?;
        self.transition(next)
    }

    /// Replaces the declaration of a construct that is not being provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ConstructFrozen`] while the construct is in flight.
    pub fn redeclare(&mut self, spec: ConstructSpec, spec_hash: impl Into<String>) -> Result<(), StateError> {
        if self.status.is_in_flight() {
            return Err(StateError::ConstructFrozen {
                urn: self.urn.to_string(),
                status: self.status,
            });
        }
        self.inputs = spec.inputs;
        self.bindings = spec.bindings;
        self.depends_on = spec.depends_on;
        self.options = spec.options;
        self.spec_hash = Some(spec_hash.into());
        Ok(())
    }

    /// Stores `spec_hash` for an entry written before hashes were recorded.
    pub fn adopt_spec_hash(&mut self, spec_hash: impl Into<String>) {
        if self.spec_hash.is_none() {
            self.spec_hash = Some(spec_hash.into());
        }
    }

    /// Records outputs produced by the stack engine.
    pub fn record_outputs(&mut self, outputs: BTreeMap<String, serde_json::Value>) {
        self.outputs.extend(outputs);
        self.last_updated = Utc::now();
    }

    /// Resolves inputs that wait on `producer`'s outputs.
    ///
    /// Returns the number of inputs that changed. Constructs in flight are left
    /// untouched.
    pub fn resolve_inputs_from(
        &mut self,
        producer: &Urn,
        outputs: &BTreeMap<String, serde_json::Value>,
    ) -> usize {
        if self.status.is_in_flight() || &self.urn == producer {
            return 0;
        }

        let mut resolved = 0;
        for (name, input) in &mut self.inputs {
            if input.depends_on.as_ref() != Some(producer) {
                continue;
            }
            if let Some(value) = outputs.get(name) {
                input.value = value.clone();
                input.status = InputStatus::Resolved;
                resolved += 1;
            }
        }
        resolved
    }
}

impl std::fmt::Display for ConstructStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::CreatePending => "create_pending",
            Self::Creating => "creating",
            Self::CreateComplete => "create_complete",
            Self::CreateFailed => "create_failed",
            Self::UpdatePending => "update_pending",
            Self::Updating => "updating",
            Self::UpdateComplete => "update_complete",
            Self::UpdateFailed => "update_failed",
            Self::DeletePending => "delete_pending",
            Self::Deleting => "deleting",
            Self::DeleteComplete => "delete_complete",
            Self::DeleteFailed => "delete_failed",
            Self::Unknown => "unknown",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for ConstructAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{action}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConstructStatus as S;

    const ALL: [ConstructStatus; 13] = [
        S::CreatePending,
        S::Creating,
        S::CreateComplete,
        S::CreateFailed,
        S::UpdatePending,
        S::Updating,
        S::UpdateComplete,
        S::UpdateFailed,
        S::DeletePending,
        S::Deleting,
        S::DeleteComplete,
        S::DeleteFailed,
        S::Unknown,
    ];

    fn construct(status: ConstructStatus) -> ConstructState {
        let urn = Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Bucket:assets")
            .expect("valid urn");
        let mut state = ConstructState::new(urn, ConstructSpec::default(), "hash");
        state.status = status;
        state
    }

    #[test]
    fn test_happy_paths() {
        let mut c = construct(S::CreatePending);
        c.transition(S::Creating).expect("create start");
        c.transition_complete().expect("create complete");
        assert_eq!(c.status(), S::CreateComplete);

        c.transition(S::UpdatePending).expect("update pending");
        c.transition(S::Updating).expect("update start");
        c.transition_failed().expect("update failed");
        assert_eq!(c.status(), S::UpdateFailed);

        c.transition(S::DeletePending).expect("delete pending");
        c.transition(S::Deleting).expect("delete start");
        c.transition_complete().expect("delete complete");
        assert_eq!(c.status(), S::DeleteComplete);
    }

    #[test]
    fn test_cross_family_transition_rejected() {
        let mut c = construct(S::Creating);
        let before = c.last_updated();

        let err = c.transition(S::DeletePending).expect_err("must be rejected");
        assert!(matches!(err, StateError::InvalidTransition { .. }));
        assert_eq!(c.status(), S::Creating);
        assert_eq!(c.last_updated(), before);
    }

    #[test]
    fn test_illegal_pairs_leave_status_unchanged() {
        for from in ALL {
            for to in ALL {
                let mut c = construct(from);
                let legal = from.can_transition_to(to);
                let result = c.transition(to);
                assert_eq!(result.is_ok(), legal, "{from} -> {to}");
                if !legal {
                    assert_eq!(c.status(), from);
                }
            }
        }
    }

    #[test]
    fn test_nothing_targets_pending_from_in_flight() {
        for from in [S::Creating, S::Updating, S::Deleting] {
            for to in [S::CreatePending, S::UpdatePending, S::DeletePending] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_deployable_and_deletable() {
        assert!(S::CreatePending.is_deployable());
        assert!(S::Updating.is_deployable());
        assert!(!S::CreateComplete.is_deployable());
        assert!(!S::DeletePending.is_deployable());

        assert!(S::CreateFailed.is_deletable());
        assert!(!S::DeleteComplete.is_deletable());
    }

    #[test]
    fn test_terminal_statuses_follow_in_flight() {
        assert_eq!(S::Creating.completed(), Some(S::CreateComplete));
        assert_eq!(S::Updating.failed(), Some(S::UpdateFailed));
        assert_eq!(S::CreatePending.completed(), None);
    }

    #[test]
    fn test_redeclare_frozen_while_in_flight() {
        let mut c = construct(S::Updating);
        let err = c
            .redeclare(ConstructSpec::default(), "other")
            .expect_err("frozen");
        assert!(matches!(err, StateError::ConstructFrozen { .. }));
        assert_eq!(c.spec_hash(), Some("hash"));
    }

    #[test]
    fn test_resolve_inputs_from_producer() {
        let producer = Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Postgres:db")
            .expect("valid urn");
        let mut spec = ConstructSpec::default();
        spec.inputs.insert(
            String::from("endpoint"),
            Input {
                value: serde_json::Value::Null,
                status: InputStatus::Pending,
                depends_on: Some(producer.clone()),
            },
        );
        let urn = Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Container:api")
            .expect("valid urn");
        let mut consumer = ConstructState::new(urn, spec, "h");
        assert_eq!(consumer.unresolved_inputs(), vec!["endpoint"]);

        let mut outputs = BTreeMap::new();
        outputs.insert(String::from("endpoint"), serde_json::json!("db.internal:5432"));

        assert_eq!(consumer.resolve_inputs_from(&producer, &outputs), 1);
        assert!(consumer.unresolved_inputs().is_empty());
        assert_eq!(
            consumer.inputs()["endpoint"].value,
            serde_json::json!("db.internal:5432")
        );
    }
}
