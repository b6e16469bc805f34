//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use super::lock::{LockInfo, generate_holder_id};
use super::types::EnvironmentState;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the environment state.
    ///
    /// Returns `None` if no state exists yet (first run).
    async fn load(&self) -> Result<Option<EnvironmentState>>;

    /// Saves the whole environment state.
    async fn save(&self, state: &EnvironmentState) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the state lock for `holder` running `command`.
    async fn acquire_lock(&self, holder: &str, command: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of owner.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Human-readable location of the state.
    fn location(&self) -> String;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<EnvironmentState>> {
        (**self).load().await
    }

    async fn save(&self, state: &EnvironmentState) -> Result<()> {
        (**self).save(state).await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str, command: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder, command).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        (**self).force_unlock().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    fn location(&self) -> String {
        (**self).location()
    }
}

/// Runs `body` while holding the state lock.
///
/// The lock is released however `body` ends. If it panics, the panic is
/// re-raised once the lock is gone.
///
/// # Errors
///
/// Returns an error if the lock is held elsewhere, or whatever `body` returns.
pub async fn with_state_lock<T, F>(store: Arc<dyn StateStore>, command: &str, body: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let lock = store.acquire_lock(&generate_holder_id(), command).await?;
    debug!(lock_id = %lock.lock_id, command, "Acquired state lock");

    let joined = tokio::spawn(body).await;

    if let Err(e) = store.release_lock(&lock.lock_id).await {
        warn!("Failed to release state lock {}: {e}", lock.lock_id);
    }

    match joined {
        Ok(result) => result,
        Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
        Err(join) => Err(OrchestratorError::internal(format!("{command} was aborted: {join}"))),
    }
}
