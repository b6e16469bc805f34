//! State management module for the construct orchestrator.
//!
//! This module provides persistent storage of every construct's last-known
//! status, the lock that enforces a single writer, and the in-memory manager
//! that owns the document while a run is in progress.

mod store;
mod local;
mod lock;
mod manager;
mod types;

pub use store::{StateStore, with_state_lock};
pub use local::LocalStateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use manager::StateManager;
pub use types::{EnvironmentState, MAX_HISTORY, RunCommand, RunRecord};
