//! Environment description validation.
//!
//! Catches structural mistakes before any state is loaded or any engine is
//! invoked.

use crate::error::{ConfigError, OrchestratorError, Result};
use crate::model::{ConstructSpec, Urn, UrnKind};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::spec::{CURRENT_SCHEMA_VERSION, EnvironmentDescription};

/// Validator for environment descriptions.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates an environment description.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, description: &EnvironmentDescription) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_header(description, &mut result);
        for (urn, spec) in &description.constructs {
            Self::validate_construct(description, urn, spec, &mut result);
        }
        Self::validate_stack_names(description, &mut result);

        if let Some(first) = result.errors.first() {
            return Err(OrchestratorError::Config(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            }));
        }

        debug!(warnings = result.warnings.len(), "Environment validation passed");
        Ok(result)
    }

    fn validate_header(description: &EnvironmentDescription, result: &mut ValidationResult) {
        if description.schema_version != CURRENT_SCHEMA_VERSION {
            result.errors.push(ValidationError {
                field: String::from("schemaVersion"),
                message: format!(
                    "Unsupported schema version {} (expected {CURRENT_SCHEMA_VERSION})",
                    description.schema_version
                ),
            });
        }

        if description.default_region.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("defaultRegion"),
                message: String::from("Default region cannot be empty"),
            });
        }

        if description.environment.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("environment"),
                message: String::from("Environment cannot be empty"),
            });
        }

        if description.constructs.is_empty() {
            result
                .warnings
                .push(String::from("No constructs declared in environment description"));
        }
    }

    fn validate_construct(
        description: &EnvironmentDescription,
        urn: &Urn,
        spec: &ConstructSpec,
        result: &mut ValidationResult,
    ) {
        let field = format!("constructs.{urn}");

        if urn.kind_of() != Some(UrnKind::Resource) {
            result.errors.push(ValidationError {
                field: field.clone(),
                message: format!("'{urn}' is not a resource URN"),
            });
        }

        for (list, edges) in [("dependsOn", &spec.depends_on), ("bindings", &spec.bindings)] {
            let mut seen = HashSet::new();
            for target in edges {
                if target == urn {
                    result.errors.push(ValidationError {
                        field: format!("{field}.{list}"),
                        message: format!("'{urn}' cannot reference itself"),
                    });
                } else if !description.constructs.contains_key(target) {
                    result.errors.push(ValidationError {
                        field: format!("{field}.{list}"),
                        message: format!("'{urn}' references undeclared construct '{target}'"),
                    });
                }
                if !seen.insert(target) {
                    result.errors.push(ValidationError {
                        field: format!("{field}.{list}"),
                        message: format!("'{target}' is listed more than once"),
                    });
                }
            }
        }

        for (name, input) in &spec.inputs {
            let Some(producer) = &input.depends_on else {
                continue;
            };
            if producer == urn {
                result.errors.push(ValidationError {
                    field: format!("{field}.inputs.{name}"),
                    message: format!("Input '{name}' cannot depend on its own construct"),
                });
            } else if !description.constructs.contains_key(producer) {
                result.errors.push(ValidationError {
                    field: format!("{field}.inputs.{name}"),
                    message: format!("Input '{name}' depends on undeclared construct '{producer}'"),
                });
            }
        }
    }
}

impl ConfigValidator {
    /// Each construct owns a stack and a program directory named by [`Urn::stack_name`].
    fn validate_stack_names(description: &EnvironmentDescription, result: &mut ValidationResult) {
        let mut names: HashMap<String, &Urn> = HashMap::new();
        for urn in description.constructs.keys() {
            if let Some(other) = names.insert(urn.stack_name(), urn) {
                result.errors.push(ValidationError {
                    field: format!("constructs.{urn}"),
                    message: format!(
                        "'{urn}' and '{other}' map to the same stack name '{}'",
                        urn.stack_name()
                    ),
                });
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn urn(id: &str) -> Urn {
        Urn::parse(&format!("urn:acme:shop:dev:web:construct/klotho.aws.Thing:{id}"))
            .expect("valid urn")
    }

    fn description(constructs: Vec<(Urn, ConstructSpec)>) -> EnvironmentDescription {
        EnvironmentDescription {
            schema_version: CURRENT_SCHEMA_VERSION,
            app_urn: Urn::parse("urn:acme:shop:dev:web").expect("valid urn"),
            environment: String::from("dev"),
            default_region: String::from("us-east-1"),
            constructs: constructs.into_iter().collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_valid_description() {
        let api = ConstructSpec {
            depends_on: vec![urn("db")],
            ..ConstructSpec::default()
        };
        let d = description(vec![(urn("db"), ConstructSpec::default()), (urn("api"), api)]);

        let result = ConfigValidator::new().validate(&d).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_rejects_self_dependency() {
        let spec = ConstructSpec {
            bindings: vec![urn("db")],
            ..ConstructSpec::default()
        };
        let d = description(vec![(urn("db"), spec)]);
        assert!(ConfigValidator::new().validate(&d).is_err());
    }

    #[test]
    fn test_rejects_undeclared_dependency() {
        let spec = ConstructSpec {
            depends_on: vec![urn("queue")],
            ..ConstructSpec::default()
        };
        let d = description(vec![(urn("api"), spec)]);
        assert!(ConfigValidator::new().validate(&d).is_err());
    }

    #[test]
    fn test_rejects_duplicate_dependency() {
        let spec = ConstructSpec {
            depends_on: vec![urn("db"), urn("db")],
            ..ConstructSpec::default()
        };
        let d = description(vec![(urn("db"), ConstructSpec::default()), (urn("api"), spec)]);
        assert!(ConfigValidator::new().validate(&d).is_err());
    }

    #[test]
    fn test_same_resource_id_on_different_subtypes_is_valid() {
        let bucket = Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Bucket:assets")
            .expect("valid urn");
        let queue = Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Queue:assets")
            .expect("valid urn");
        let d = description(vec![
            (bucket, ConstructSpec::default()),
            (queue, ConstructSpec::default()),
        ]);
        assert!(ConfigValidator::new().validate(&d).is_ok());
    }

    #[test]
    fn test_rejects_colliding_stack_names() {
        let d = description(vec![
            (urn("my-db"), ConstructSpec::default()),
            (urn("my_db"), ConstructSpec::default()),
        ]);
        let err = ConfigValidator::new().validate(&d).expect_err("collision");
        assert!(err.to_string().contains("same stack name"));
    }

    #[test]
    fn test_rejects_input_fed_by_own_construct() {
        let spec = ConstructSpec {
            inputs: BTreeMap::from([(
                String::from("url"),
                crate::model::Input {
                    depends_on: Some(urn("api")),
                    value: serde_json::Value::Null,
                    status: crate::model::InputStatus::Pending,
                },
            )]),
            ..ConstructSpec::default()
        };
        let d = description(vec![(urn("api"), spec)]);
        let err = ConfigValidator::new().validate(&d).expect_err("self input");
        assert!(err.to_string().contains("own construct"));
    }

    #[test]
    fn test_rejects_empty_region_and_bad_schema() {
        let mut d = description(vec![]);
        d.default_region = String::new();
        d.schema_version = 7;
        let err = ConfigValidator::new().validate(&d).expect_err("invalid");
        assert!(err.to_string().contains("schema version"));
    }
}
