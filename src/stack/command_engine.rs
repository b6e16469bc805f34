//! Stack engine backed by the engine's command-line tool.
//!
//! Stacks live in a local file backend under the engine home directory, so
//! no account or remote service is needed. Secrets use an empty passphrase
//! unless the caller's environment provides one.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result, RunError, StackError};
use crate::orchestrator::ProgressReporter;

use super::engine::{ResultCode, StackEngine, StackReference, StackResult};
use super::process::{ProcessCommand, ProcessOutput};

/// Default engine executable.
pub const DEFAULT_ENGINE: &str = "pulumi";

/// Command that type-checks a generated program without emitting it.
pub const DEFAULT_TYPE_CHECKER: &str = "npx tsc";

/// Entry point of a generated program.
const PROGRAM_ENTRY: &str = "index.ts";

/// Config key the engine reads the deployment region from.
const REGION_CONFIG_KEY: &str = "aws:region";

/// Runs the engine's CLI as a child process for every operation.
#[derive(Debug, Clone)]
pub struct CommandStackEngine {
    program: String,
    base_args: Vec<String>,
    home_dir: PathBuf,
    package_manager: Option<String>,
    type_checker: String,
}

impl CommandStackEngine {
    /// Creates an engine that runs `command` with its home under `home_dir`.
    ///
    /// `command` is split on whitespace; words after the first are passed
    /// before every sub-command.
    #[must_use]
    pub fn new(command: &str, home_dir: impl Into<PathBuf>) -> Self {
        let mut words = command.split_whitespace().map(ToString::to_string);
        Self {
            program: words.next().unwrap_or_else(|| String::from(DEFAULT_ENGINE)),
            base_args: words.collect(),
            home_dir: home_dir.into(),
            package_manager: Some(String::from("npm")),
            type_checker: String::from(DEFAULT_TYPE_CHECKER),
        }
    }

    /// Creates an engine with its home under `~/.corch/<program>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn with_default_home(command: &str) -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| OrchestratorError::internal("cannot determine home directory"))?;
        let mut engine = Self::new(command, PathBuf::new());
        let binary = Path::new(&engine.program)
            .file_name()
            .map_or_else(|| engine.program.clone(), |name| name.to_string_lossy().into_owned());
        engine.home_dir = home.join(".corch").join(binary);
        Ok(engine)
    }

    /// Sets the package manager used to install program dependencies.
    ///
    /// `None` skips dependency installation.
    #[must_use]
    pub fn with_package_manager(mut self, package_manager: Option<String>) -> Self {
        self.package_manager = package_manager;
        self
    }

    /// Sets the command used to type-check programs for a compile dry run.
    #[must_use]
    pub fn with_type_checker(mut self, command: impl Into<String>) -> Self {
        self.type_checker = command.into();
        self
    }

    fn backend_dir(&self) -> PathBuf {
        self.home_dir.join("state")
    }

    fn command(&self, stack: &StackReference) -> ProcessCommand {
        let mut command = ProcessCommand::new(&self.program, &stack.iac_dir)
            .args(self.base_args.iter().cloned())
            .env("PULUMI_HOME", self.home_dir.to_string_lossy())
            .env(
                "PULUMI_BACKEND_URL",
                format!("file://{}", self.backend_dir().display()),
            );
        if std::env::var_os("PULUMI_CONFIG_PASSPHRASE").is_none()
            && std::env::var_os("PULUMI_CONFIG_PASSPHRASE_FILE").is_none()
        {
            command = command.env("PULUMI_CONFIG_PASSPHRASE", "");
        }
        command
    }

    /// Runs one engine sub-command and fails on a non-zero exit.
    async fn run(
        &self,
        stack: &StackReference,
        name: &str,
        command: ProcessCommand,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let output = command
            .run(progress, cancel)
            .await
            .map_err(|e| cancelled_as(e, name, stack))?;
        if !output.success {
            return Err(StackError::CommandFailed {
                command: name.to_string(),
                stack: stack.name.clone(),
                message: output.first_error_line(),
            }
            .into());
        }
        Ok(output)
    }

    /// Selects (creating if needed) the stack, installs dependencies and sets the region.
    async fn prepare(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::fs::create_dir_all(self.backend_dir()).await?;

        let select = self.command(stack).args([
            "stack",
            "select",
            "--create",
            "--non-interactive",
            stack.name.as_str(),
        ]);
        self.run(stack, "stack select", select, progress, cancel)
            .await?;
        info!(stack = %stack.name, "Created/selected stack");

        self.install_dependencies(stack, progress, cancel).await?;

        let config = self.command(stack).args([
            "config",
            "set",
            REGION_CONFIG_KEY,
            stack.region.as_str(),
            "--stack",
            stack.name.as_str(),
        ]);
        self.run(stack, "config set", config, progress, cancel)
            .await?;
        debug!(stack = %stack.name, region = %stack.region, "Set stack region");
        Ok(())
    }

    async fn install_dependencies(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(package_manager) = &self.package_manager else {
            return Ok(());
        };
        if !stack.iac_dir.join("package.json").exists() {
            debug!(stack = %stack.name, "No package manifest, skipping dependency install");
            return Ok(());
        }

        let install = ProcessCommand::new(package_manager, &stack.iac_dir).args([
            "install",
            "--no-fund",
            "--no-audit",
        ]);
        self.run(stack, "install", install, progress, cancel).await?;
        Ok(())
    }
}

fn cancelled_as(error: OrchestratorError, command: &str, stack: &StackReference) -> OrchestratorError {
    match error {
        OrchestratorError::Run(RunError::Cancelled) => StackError::Cancelled {
            command: command.to_string(),
            stack: stack.name.clone(),
        }
        .into(),
        other => other,
    }
}

#[async_trait]
impl StackEngine for CommandStackEngine {
    async fn preview(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.prepare(stack, progress, cancel).await?;
        info!(stack = %stack.name, "Starting preview");
        let preview = self.command(stack).args([
            "preview",
            "--refresh",
            "--non-interactive",
            "--stack",
            stack.name.as_str(),
        ]);
        self.run(stack, "preview", preview, progress, cancel)
            .await?;
        info!(stack = %stack.name, "Successfully previewed stack");
        Ok(())
    }

    async fn compile(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.install_dependencies(stack, progress, cancel).await?;
        if !stack.iac_dir.join(PROGRAM_ENTRY).exists() {
            debug!(stack = %stack.name, "No program entry point, skipping type check");
            return Ok(());
        }

        let mut words = self.type_checker.split_whitespace();
        let Some(program) = words.next() else {
            return Ok(());
        };
        let check = ProcessCommand::new(program, &stack.iac_dir)
            .args(words)
            .args(["--noEmit", PROGRAM_ENTRY]);
        self.run(stack, "type check", check, progress, cancel).await?;
        info!(stack = %stack.name, "Program type-checked");
        Ok(())
    }

    async fn up(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<StackResult> {
        self.prepare(stack, progress, cancel).await?;
        info!(stack = %stack.name, "Starting update");
        let up = self.command(stack).args([
            "up",
            "--yes",
            "--skip-preview",
            "--refresh",
            "--non-interactive",
            "--stack",
            stack.name.as_str(),
        ]);
        let output = up
            .run(progress, cancel)
            .await
            .map_err(|e| cancelled_as(e, "up", stack))?;
        if !output.success {
            warn!(stack = %stack.name, error = %output.first_error_line(), "Update did not succeed");
            return Ok(StackResult {
                result: ResultCode::Failed,
                snapshot: serde_json::Value::Null,
            });
        }

        info!(stack = %stack.name, "Successfully deployed stack");
        let snapshot = self.export_state(stack, progress, cancel).await?;
        Ok(StackResult {
            result: ResultCode::Succeeded,
            snapshot,
        })
    }

    async fn destroy(
        &self,
        stack: &StackReference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.prepare(stack, progress, cancel).await?;
        info!(stack = %stack.name, "Starting destroy");
        let destroy = self.command(stack).args([
            "destroy",
            "--yes",
            "--skip-preview",
            "--refresh",
            "--non-interactive",
            "--stack",
            stack.name.as_str(),
        ]);
        self.run(stack, "destroy", destroy, progress, cancel)
            .await?;

        let remove = self
            .command(stack)
            .args(["stack", "rm", "--yes", "--non-interactive", stack.name.as_str()]);
        self.run(stack, "stack rm", remove, progress, cancel)
            .await?;
        info!(stack = %stack.name, "Successfully destroyed and removed stack");
        Ok(())
    }

    async fn export_state(
        &self,
        stack: &StackReference,
        _progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let export = self
            .command(stack)
            .args(["stack", "export", "--stack", stack.name.as_str()]);
        // Export output is the snapshot itself; keep it off the progress stream.
        let output = self
            .run(stack, "stack export", export, &ProgressReporter::disabled(), cancel)
            .await?;
        serde_json::from_str(&output.stdout).map_err(|e| {
            StackError::MalformedSnapshot {
                message: format!("stack export for {} is not JSON: {e}", stack.name),
            }
            .into()
        })
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::Urn;
    use tempfile::TempDir;

    /// Writes a fake engine that logs its arguments and answers `stack export`.
    fn fake_engine(dir: &Path, fail_on: &str) -> String {
        let script = dir.join("fake-engine");
        let body = format!(
            r#"#!/bin/sh
echo "$@" >> "{log}"
case "$*" in
  *"{fail_on}"*) echo "error: boom" >&2; echo "second line" >&2; exit 1 ;;
  "stack export"*) echo '{{"version":3,"deployment":{{"resources":[]}}}}' ;;
  *) echo "ok $1" ;;
esac
"#,
            log = dir.join("calls.log").display(),
        );
        std::fs::write(&script, body).expect("write script");
        format!("sh {}", script.display())
    }

    fn reference(dir: &Path) -> StackReference {
        StackReference::new(
            Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Bucket:assets")
                .expect("valid urn"),
            dir,
            "eu-west-1",
        )
    }

    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_up_prepares_then_exports() {
        let dir = TempDir::new().expect("temp dir");
        let engine = CommandStackEngine::new(
            &fake_engine(dir.path(), "never-matches"),
            dir.path().join("home"),
        );

        let result = engine
            .up(&reference(dir.path()), &ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .expect("up");

        assert!(result.succeeded());
        assert_eq!(result.snapshot["version"], 3);
        let calls = calls(dir.path());
        assert!(calls[0].starts_with("stack select --create"));
        assert!(calls[1].contains("aws:region eu-west-1"));
        assert!(calls[2].starts_with("up --yes"));
        assert!(calls[3].starts_with("stack export"));
    }

    #[tokio::test]
    async fn test_command_failure_reports_first_line() {
        let dir = TempDir::new().expect("temp dir");
        let engine = CommandStackEngine::new(
            &fake_engine(dir.path(), "destroy"),
            dir.path().join("home"),
        );

        let err = engine
            .destroy(&reference(dir.path()), &ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .expect_err("destroy fails");

        match err {
            OrchestratorError::Stack(StackError::CommandFailed { command, message, .. }) => {
                assert_eq!(command, "destroy");
                assert_eq!(message, "error: boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!calls(dir.path()).iter().any(|c| c.starts_with("stack rm")));
    }

    #[tokio::test]
    async fn test_failed_update_is_a_result_not_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let engine = CommandStackEngine::new(
            &fake_engine(dir.path(), "up --yes"),
            dir.path().join("home"),
        );

        let result = engine
            .up(&reference(dir.path()), &ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .expect("engine ran");
        assert_eq!(result.result, ResultCode::Failed);
    }

    #[tokio::test]
    async fn test_compile_type_checks_without_touching_stack() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("index.ts"), "export {};").expect("write program");
        let script = fake_engine(dir.path(), "never-matches");
        let engine = CommandStackEngine::new(&script, dir.path().join("home"))
            .with_package_manager(None)
            .with_type_checker(script.clone());

        engine
            .compile(&reference(dir.path()), &ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .expect("compiles");

        assert_eq!(calls(dir.path()), vec![String::from("--noEmit index.ts")]);
    }

    #[tokio::test]
    async fn test_compile_reports_type_errors() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("index.ts"), "export {};").expect("write program");
        let script = fake_engine(dir.path(), "--noEmit");
        let engine = CommandStackEngine::new(&script, dir.path().join("home"))
            .with_package_manager(None)
            .with_type_checker(script.clone());

        let err = engine
            .compile(&reference(dir.path()), &ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .expect_err("type errors");
        assert!(matches!(
            err,
            OrchestratorError::Stack(StackError::CommandFailed { ref command, .. }) if command == "type check"
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().expect("temp dir");
        let engine = CommandStackEngine::new(
            &fake_engine(dir.path(), "never-matches"),
            dir.path().join("home"),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .preview(&reference(dir.path()), &ProgressReporter::disabled(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(
            err,
            OrchestratorError::Stack(StackError::Cancelled { ref command, .. }) if command == "stack select"
        ));
    }
}
