//! Shared, in-memory owner of one environment's state during a run.
//!
//! Wave members run concurrently and all mutate the same document, so the
//! document sits behind a mutex and every mutation goes through this type.
//! Persistence is always a full snapshot written by [`StateManager::save`].

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result, StateError};
use crate::model::{ConstructState, ConstructStatus, Urn};

use super::store::StateStore;
use super::types::{EnvironmentState, RunRecord};

/// Owner of the environment state for the duration of one run.
pub struct StateManager {
    store: Arc<dyn StateStore>,
    state: Mutex<EnvironmentState>,
}

impl StateManager {
    /// Wraps a loaded (or freshly created) state document.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, state: EnvironmentState) -> Self {
        Self {
            store,
            state: Mutex::new(state),
        }
    }

    /// Returns a copy of the whole document.
    pub async fn snapshot(&self) -> EnvironmentState {
        self.state.lock().await.clone()
    }

    /// Runs `f` with exclusive access to the document.
    pub async fn update<R>(&self, f: impl FnOnce(&mut EnvironmentState) -> R) -> R {
        let mut state = self.state.lock().await;
        f(&mut state)
    }

    /// Returns a copy of one construct.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ConstructNotFound`] if the URN is unknown.
    pub async fn construct(&self, urn: &Urn) -> Result<ConstructState> {
        self.state
            .lock()
            .await
            .construct(urn)
            .cloned()
            .ok_or_else(|| not_found(urn))
    }

    /// Returns the status of one construct.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ConstructNotFound`] if the URN is unknown.
    pub async fn status(&self, urn: &Urn) -> Result<ConstructStatus> {
        self.state
            .lock()
            .await
            .construct(urn)
            .map(ConstructState::status)
            .ok_or_else(|| not_found(urn))
    }

    /// Applies a lifecycle transition to one construct.
    ///
    /// # Errors
    ///
    /// Returns an error if the construct is unknown or the move is illegal.
    pub async fn transition(&self, urn: &Urn, next: ConstructStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let construct = state.construct_mut(urn).ok_or_else(|| not_found(urn))?;
        construct.transition(next)?;
        Ok(())
    }

    /// Moves an in-flight construct to its failed status.
    ///
    /// # Errors
    ///
    /// Returns an error if the construct is unknown or not in flight.
    pub async fn fail(&self, urn: &Urn) -> Result<ConstructStatus> {
        let mut state = self.state.lock().await;
        let construct = state.construct_mut(urn).ok_or_else(|| not_found(urn))?;
        construct.transition_failed()?;
        Ok(construct.status())
    }

    /// Moves an in-flight construct to its completed status.
    ///
    /// # Errors
    ///
    /// Returns an error if the construct is unknown or not in flight.
    pub async fn complete(&self, urn: &Urn) -> Result<ConstructStatus> {
        let mut state = self.state.lock().await;
        let construct = state.construct_mut(urn).ok_or_else(|| not_found(urn))?;
        construct.transition_complete()?;
        Ok(construct.status())
    }

    /// Records a construct's outputs and feeds them to waiting inputs.
    ///
    /// Only constructs that have not begun provisioning receive the values.
    /// Returns the number of inputs resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ConstructNotFound`] if the URN is unknown.
    pub async fn register_outputs(
        &self,
        urn: &Urn,
        outputs: BTreeMap<String, serde_json::Value>,
    ) -> Result<usize> {
        let mut state = self.state.lock().await;
        state
            .construct_mut(urn)
            .ok_or_else(|| not_found(urn))?
            .record_outputs(outputs.clone());

        let resolved: usize = state
            .constructs
            .values_mut()
            .map(|c| c.resolve_inputs_from(urn, &outputs))
            .sum();
        if resolved > 0 {
            debug!(producer = %urn, resolved, "Resolved dependent inputs");
        }
        Ok(resolved)
    }

    /// Moves every construct left in flight to its failed status.
    ///
    /// Returns the URNs that were interrupted.
    pub async fn finalize(&self) -> Vec<Urn> {
        let mut state = self.state.lock().await;
        let mut interrupted = Vec::new();
        for construct in state.constructs.values_mut() {
            if !construct.status().is_in_flight() {
                continue;
            }
            let urn = construct.urn().clone();
            match construct.transition_failed() {
                Ok(()) => {
                    warn!(urn = %urn, status = %construct.status(), "Construct interrupted");
                    interrupted.push(urn);
                }
                Err(e) => warn!(urn = %urn, error = %e, "Could not finalize construct"),
            }
        }
        interrupted
    }

    /// Increments the run version counter.
    pub async fn bump_version(&self) -> u64 {
        let mut state = self.state.lock().await;
        state.version += 1;
        state.version
    }

    /// Appends a run record to the history.
    pub async fn record_run(&self, record: RunRecord) {
        self.state.lock().await.add_history(record);
    }

    /// Prunes deleted constructs and persists the whole document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot write the document.
    pub async fn save(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let removed = state.prune_deleted();
        if !removed.is_empty() {
            info!(count = removed.len(), "Removed deleted constructs from state");
        }
        state.last_updated = chrono::Utc::now();
        self.store.save(&state).await
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }
}

fn not_found(urn: &Urn) -> OrchestratorError {
    OrchestratorError::State(StateError::ConstructNotFound {
        urn: urn.to_string(),
    })
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("store", &self.store.location())
            .finish_non_exhaustive()
    }
}
