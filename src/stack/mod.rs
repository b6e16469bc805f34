//! Stack engine integration.
//!
//! This module wraps the infrastructure engine that provisions a construct's
//! generated program: the engine abstraction, a CLI-backed implementation,
//! the cancellation-aware process runner it uses, and the reader that turns
//! an exported snapshot into outputs and per-resource state.

mod command_engine;
mod engine;
mod process;
mod reader;
mod resource_id;

pub use command_engine::{CommandStackEngine, DEFAULT_ENGINE, DEFAULT_TYPE_CHECKER};
pub use engine::{ResultCode, StackEngine, StackReference, StackResult};
pub use process::{ProcessCommand, ProcessOutput};
pub use reader::{OUTPUTS_KEY, ROOT_STACK_TYPE, StackState, StackStateReader, URNS_KEY};
pub use resource_id::ResourceId;
