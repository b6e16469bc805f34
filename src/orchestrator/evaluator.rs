//! Construct evaluation.
//!
//! Evaluation turns a construct (with its resolved inputs) into a program the
//! stack engine can run. The default evaluator writes the construct as JSON
//! into its output directory and hands it to an external generator command.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{EvaluateError, OrchestratorError, Result};
use crate::model::{ConstructState, Urn};
use crate::stack::ProcessCommand;

use super::progress::ProgressReporter;

/// File the construct description is written to before generation.
pub const CONSTRUCT_FILE_NAME: &str = "construct.json";

/// Turns constructs into runnable programs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConstructEvaluator: Send + Sync {
    /// Produces the program for `construct` under `out_dir`.
    ///
    /// Returns the directory the stack engine should run in.
    async fn evaluate(
        &self,
        construct: &ConstructState,
        region: &str,
        out_dir: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// What the generator receives.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationInput<'a> {
    urn: &'a Urn,
    region: &'a str,
    inputs: BTreeMap<&'a str, &'a serde_json::Value>,
    bindings: &'a [Urn],
    options: &'a BTreeMap<String, serde_json::Value>,
}

/// Evaluator that runs an external generator command.
#[derive(Debug, Clone, Default)]
pub struct CommandEvaluator {
    generator: Option<Vec<String>>,
}

impl CommandEvaluator {
    /// Creates an evaluator for `generator`, split on whitespace.
    ///
    /// With no generator, only the construct file is written and the output
    /// directory is expected to already hold the program.
    #[must_use]
    pub fn new(generator: Option<&str>) -> Self {
        let generator = generator
            .map(|g| g.split_whitespace().map(ToString::to_string).collect::<Vec<_>>())
            .filter(|words| !words.is_empty());
        Self { generator }
    }
}

#[async_trait]
impl ConstructEvaluator for CommandEvaluator {
    async fn evaluate(
        &self,
        construct: &ConstructState,
        region: &str,
        out_dir: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let input = EvaluationInput {
            urn: construct.urn(),
            region,
            inputs: construct
                .inputs()
                .iter()
                .map(|(name, input)| (name.as_str(), &input.value))
                .collect(),
            bindings: construct.bindings(),
            options: construct.options(),
        };
        let content = serde_json::to_string_pretty(&input)
            .map_err(|e| OrchestratorError::internal(format!("failed to encode construct: {e}")))?;
        let construct_file = out_dir.join(CONSTRUCT_FILE_NAME);
        tokio::fs::write(&construct_file, content).await?;
        debug!(urn = %construct.urn(), path = %construct_file.display(), "Wrote construct file");

        let Some((program, args)) = self.generator.as_ref().and_then(|g| g.split_first()) else {
            debug!(urn = %construct.urn(), "No generator configured, using existing program");
            return Ok(out_dir.to_path_buf());
        };

        info!(urn = %construct.urn(), generator = %program, "Generating program");
        let output = ProcessCommand::new(program.as_str(), out_dir)
            .args(args.iter().cloned())
            .env("CORCH_CONSTRUCT_FILE", construct_file.to_string_lossy())
            .env("CORCH_OUTPUT_DIR", out_dir.to_string_lossy())
            .env("CORCH_CONSTRUCT_URN", construct.urn().to_string())
            .run(progress, cancel)
            .await?;

        if !output.success {
            return Err(EvaluateError::GeneratorFailed {
                urn: construct.urn().to_string(),
                message: output.first_error_line(),
            }
            .into());
        }
        Ok(out_dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstructSpec, Input, InputStatus};
    use tempfile::TempDir;

    fn construct() -> ConstructState {
        let mut spec = ConstructSpec::default();
        spec.inputs.insert(
            String::from("size"),
            Input {
                value: serde_json::json!(20),
                status: InputStatus::Resolved,
                depends_on: None,
            },
        );
        ConstructState::new(
            Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Postgres:db").expect("valid urn"),
            spec,
            "h",
        )
    }

    #[tokio::test]
    async fn test_without_generator_writes_construct_file() {
        let dir = TempDir::new().expect("temp dir");
        let evaluator = CommandEvaluator::new(None);

        let iac_dir = evaluator
            .evaluate(
                &construct(),
                "us-east-1",
                dir.path(),
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await
            .expect("evaluate");

        assert_eq!(iac_dir, dir.path());
        let written: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(CONSTRUCT_FILE_NAME)).expect("file"),
        )
        .expect("json");
        assert_eq!(written["inputs"]["size"], 20);
        assert_eq!(written["region"], "us-east-1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generator_failure() {
        let dir = TempDir::new().expect("temp dir");
        let evaluator = CommandEvaluator {
            generator: Some(vec![
                String::from("sh"),
                String::from("-c"),
                String::from("echo 'bad template' >&2; exit 1"),
            ]),
        };

        let err = evaluator
            .evaluate(
                &construct(),
                "us-east-1",
                dir.path(),
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await
            .expect_err("generator fails");
        assert!(matches!(
            err,
            OrchestratorError::Evaluate(EvaluateError::GeneratorFailed { ref message, .. }) if message == "bad template"
        ));
    }
}
