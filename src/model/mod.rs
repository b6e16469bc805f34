//! Core data model: URNs and construct lifecycle state.

mod construct;
mod urn;

pub use construct::{
    ConstructAction, ConstructSpec, ConstructState, ConstructStatus, Input, InputStatus,
};
pub use urn::{Urn, UrnKind};
