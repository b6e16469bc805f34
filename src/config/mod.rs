//! Configuration module for the construct orchestrator.
//!
//! This module handles everything about the environment description:
//! - Parsing the YAML description and `.env` overrides
//! - Validation of declared constructs and their references
//! - Hashing construct declarations for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{CURRENT_SCHEMA_VERSION, EnvironmentDescription, STATE_FILE_NAME};
pub use parser::{
    ConfigParser, DEFAULT_DESCRIPTION_FILES, ENV_DEFAULT_REGION, ENV_ENVIRONMENT,
    find_description_file,
};
pub use validator::{ConfigValidator, ValidationResult};
pub use hash::ConstructHasher;
