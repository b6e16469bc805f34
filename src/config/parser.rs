//! Environment description parser.
//!
//! Loads the YAML description, an optional sibling `.env` file, and applies
//! environment variable overrides.

use crate::error::{ConfigError, OrchestratorError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::EnvironmentDescription;

/// Overrides the default region of the loaded description.
pub const ENV_DEFAULT_REGION: &str = "CORCH_DEFAULT_REGION";

/// Overrides the environment name of the loaded description.
pub const ENV_ENVIRONMENT: &str = "CORCH_ENVIRONMENT";

/// Parser for environment descriptions.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path used to find the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory that is searched for a `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads an environment description from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EnvironmentDescription> {
        let path = path.as_ref();
        info!("Loading environment description from: {}", path.display());

        if !path.exists() {
            return Err(OrchestratorError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses an environment description from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a URN cannot be parsed.
    pub fn parse_yaml(
        &self,
        content: &str,
        source: Option<&Path>,
    ) -> Result<EnvironmentDescription> {
        debug!("Parsing environment description");

        let description: EnvironmentDescription = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            OrchestratorError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            app = %description.app_urn,
            constructs = description.constructs.len(),
            "Parsed environment description"
        );
        Ok(description)
    }

    /// Loads `.env`, then the description, then applies overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be loaded.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<EnvironmentDescription> {
        let path = path.as_ref();
        let parser = match (&self.base_path, path.parent()) {
            (None, Some(parent)) if !parent.as_os_str().is_empty() => {
                Self::new().with_base_path(parent)
            }
            _ => Self {
                base_path: self.base_path.clone(),
            },
        };
        parser.load_dotenv()?;

        let mut description = parser.load_file(path)?;
        Self::apply_env_overrides(&mut description);
        Ok(description)
    }

    fn apply_env_overrides(description: &mut EnvironmentDescription) {
        if let Ok(region) = std::env::var(ENV_DEFAULT_REGION) {
            debug!("Overriding defaultRegion from environment");
            description.default_region = region;
        }

        if let Ok(environment) = std::env::var(ENV_ENVIRONMENT) {
            debug!("Overriding environment from environment");
            description.environment = environment;
        }
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                OrchestratorError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// File names searched for when no description path is given.
pub const DEFAULT_DESCRIPTION_FILES: &[&str] = &[
    "corch.yaml",
    "corch.yml",
    "environment.yaml",
    "environment.yml",
];

/// Finds an environment description in `start_dir` or one of its parents.
///
/// # Errors
///
/// Returns an error if no description file is found.
pub fn find_description_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_DESCRIPTION_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found environment description: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(OrchestratorError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_DESCRIPTION_FILES[0]),
    }))
}
