//! Cancellation-aware child process runner.
//!
//! Engine and generator commands run in their own process group so that a
//! cancelled run can take down the whole tree (package managers and language
//! hosts included), not just the direct child.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{OrchestratorError, Result, RunError};
use crate::orchestrator::ProgressReporter;

/// A command to run in a working directory.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    envs: BTreeMap<String, String>,
}

/// Result of a finished command.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Whether the command exited successfully.
    pub success: bool,
    /// Collected standard output.
    pub stdout: String,
    /// Collected standard error.
    pub stderr: String,
    /// Exit code if available.
    pub exit_code: Option<i32>,
}

impl ProcessCommand {
    /// Creates a command for `program` running in `cwd`.
    #[must_use]
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            envs: BTreeMap::new(),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Returns the command line for logs and errors.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs the command to completion.
    ///
    /// Standard output lines are streamed to `progress` as they arrive. A
    /// non-zero exit is reported through [`ProcessOutput::success`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Cancelled`] if `cancel` fires first, or an IO
    /// error if the process cannot be spawned.
    pub async fn run(
        &self,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Run(RunError::Cancelled));
        }

        debug!(command = %self.display(), cwd = %self.cwd.display(), "Running command");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .envs(&self.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .map(|out| collect_lines(out, Some(progress.clone())));
        let stderr = child.stderr.take().map(|err| collect_lines(err, None));

        let status = tokio::select! {
            status = child.wait() => status?,
            () = cancel.cancelled() => {
                warn!(command = %self.display(), "Cancelling command");
                terminate_group(pid);
                if let Err(e) = child.start_kill() {
                    trace!(error = %e, "Child already exited");
                }
                if let Err(e) = child.wait().await {
                    trace!(error = %e, "Failed to reap cancelled child");
                }
                for reader in [stdout, stderr].into_iter().flatten() {
                    reader.abort();
                }
                return Err(OrchestratorError::Run(RunError::Cancelled));
            }
        };

        let stdout = join_lines(stdout).await?;
        let stderr = join_lines(stderr).await?;

        Ok(ProcessOutput {
            success: status.success(),
            stdout,
            stderr,
            exit_code: status.code(),
        })
    }
}

impl ProcessOutput {
    /// Returns the first non-empty line of stderr, falling back to stdout.
    #[must_use]
    pub fn first_error_line(&self) -> String {
        self.stderr
            .lines()
            .chain(self.stdout.lines())
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map_or_else(
                || format!("exited with code {}", self.exit_code.unwrap_or(-1)),
                ToString::to_string,
            )
    }
}

fn collect_lines<R>(reader: R, progress: Option<ProgressReporter>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut collected = String::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(progress) = &progress {
                        progress.output(line.as_str());
                    } else {
                        trace!(line = %line, "stderr");
                    }
                    collected.push_str(&line);
                    collected.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read command output");
                    break;
                }
            }
        }
        collected
    })
}

async fn join_lines(handle: Option<JoinHandle<String>>) -> Result<String> {
    match handle {
        Some(handle) => handle
            .await
            .map_err(|e| OrchestratorError::internal(format!("output reader failed: {e}"))),
        None => Ok(String::new()),
    }
}

/// Sends SIGTERM to the child's whole process group.
#[cfg(unix)]
fn terminate_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
        Ok(()) => debug!(pgid, "Terminated process group"),
        Err(Errno::ESRCH) => debug!(pgid, "Process group already gone"),
        Err(e) => warn!(pgid, error = %e, "Could not signal process group"),
    }
}

#[cfg(not(unix))]
const fn terminate_group(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::orchestrator::ProgressEvent;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_streams_stdout_and_reports_exit() {
        let dir = TempDir::new().expect("temp dir");
        let (progress, mut rx) = ProgressReporter::channel();

        let output = ProcessCommand::new("sh", dir.path())
            .args(["-c", "echo one; echo two; echo oops >&2; exit 3"])
            .run(&progress, &CancellationToken::new())
            .await
            .expect("spawned");

        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "one\ntwo\n");
        assert_eq!(output.first_error_line(), "oops");

        let first = rx.recv().await.expect("event");
        assert!(matches!(first, ProgressEvent::Output { ref line, .. } if line == "one"));
    }

    #[tokio::test]
    async fn test_env_and_cwd_are_applied() {
        let dir = TempDir::new().expect("temp dir");
        let output = ProcessCommand::new("sh", dir.path())
            .args(["-c", "echo $CORCH_TEST_VALUE; pwd"])
            .env("CORCH_TEST_VALUE", "hello")
            .run(&ProgressReporter::disabled(), &CancellationToken::new())
            .await
            .expect("spawned");

        assert!(output.success);
        assert!(output.stdout.starts_with("hello\n"));
    }

    #[tokio::test]
    async fn test_cancel_stops_long_running_tree() {
        let dir = TempDir::new().expect("temp dir");
        let cancel = CancellationToken::new();
        let child = cancel.child_token();

        let run = tokio::spawn(async move {
            ProcessCommand::new("sh", dir.path())
                .args(["-c", "sleep 30 & sleep 30"])
                .run(&ProgressReporter::disabled(), &child)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("cancelled promptly")
            .expect("task joined");
        assert!(result.expect_err("cancelled").is_cancelled());
    }

    #[tokio::test]
    async fn test_terminate_group_sends_sigterm() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .expect("spawned");
        let pid = child.id();

        terminate_group(pid);
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("exited promptly")
            .expect("reaped");
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGTERM as i32));

        // The group no longer exists.
        terminate_group(pid);
        terminate_group(None);
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ProcessCommand::new("definitely-not-a-real-binary", ".")
            .run(&ProgressReporter::disabled(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
    }
}
