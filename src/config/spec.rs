//! Environment description types.
//!
//! These types map one-to-one onto the YAML environment description consumed
//! by `corch up` and `corch plan`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::model::{ConstructSpec, Urn};

/// Schema version understood by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// File name of the persisted state document.
pub const STATE_FILE_NAME: &str = "state.json";

/// Declarative description of one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDescription {
    /// Schema version of the description.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// URN of the application environment that owns every construct.
    pub app_urn: Urn,

    /// Environment name (e.g. `dev`, `prod`).
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Default region for every stack.
    pub default_region: String,

    /// Desired constructs keyed by URN.
    #[serde(default)]
    pub constructs: BTreeMap<Urn, ConstructSpec>,
}

const fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

fn default_environment() -> String {
    String::from("dev")
}

impl EnvironmentDescription {
    /// Returns the declared construct URNs in deterministic order.
    pub fn urns(&self) -> impl Iterator<Item = &Urn> {
        self.constructs.keys()
    }

    /// Returns the declaration of a construct.
    #[must_use]
    pub fn construct(&self, urn: &Urn) -> Option<&ConstructSpec> {
        self.constructs.get(urn)
    }

    /// Returns the location of the state file under `state_dir`.
    #[must_use]
    pub fn state_path(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(self.app_urn.path()).join(STATE_FILE_NAME)
    }

    /// Returns the directory that receives evaluated artifacts.
    #[must_use]
    pub fn output_dir(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(self.app_urn.path()).join("out")
    }
}
