//! Progress events emitted while a run is in progress.
//!
//! Events go over an unbounded channel to whoever renders them. A reporter
//! without a receiver silently drops events, so library callers that do not
//! care about progress pay nothing for it.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::{ConstructAction, ConstructStatus, Urn};

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A run has been planned.
    RunStarted {
        /// `up` or `down`.
        command: String,
        /// Number of waves.
        waves: usize,
        /// Number of constructs in scope.
        constructs: usize,
    },
    /// A wave is being dispatched.
    WaveStarted {
        /// Zero-based wave index.
        index: usize,
        /// Number of constructs in the wave.
        size: usize,
    },
    /// Work on a construct has begun.
    ConstructStarted {
        /// Construct URN.
        urn: Urn,
        /// Action being applied.
        action: ConstructAction,
    },
    /// A line of output from a tool working on a construct.
    Output {
        /// Construct URN, if the line is scoped to one.
        urn: Option<Urn>,
        /// The output line.
        line: String,
    },
    /// Work on a construct has ended.
    ConstructFinished {
        /// Construct URN.
        urn: Urn,
        /// How it ended.
        outcome: ConstructOutcome,
    },
    /// The run is over.
    RunFinished {
        /// Whether every construct succeeded.
        success: bool,
    },
}

/// How a single construct's work ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ConstructOutcome {
    /// The construct reached a terminal status.
    Completed(ConstructStatus),
    /// The construct was previewed only.
    Previewed,
    /// The construct's program was installed and type-checked only.
    Compiled,
    /// The construct's program files were written only.
    Generated,
    /// Nothing to do.
    Skipped,
    /// The construct failed.
    Failed(String),
}

impl ConstructOutcome {
    /// Returns true unless the construct failed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Returns true for outcomes of a dry run.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        matches!(self, Self::Previewed | Self::Compiled | Self::Generated)
    }
}

impl std::fmt::Display for ConstructOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed(status) => write!(f, "{status}"),
            Self::Previewed => write!(f, "previewed"),
            Self::Compiled => write!(f, "compiled"),
            Self::Generated => write!(f, "generated"),
            Self::Skipped => write!(f, "unchanged"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Cloneable sender for progress events, optionally scoped to one construct.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    urn: Option<Urn>,
}

impl ProgressReporter {
    /// Creates a reporter and the receiver its events arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx), urn: None }, rx)
    }

    /// Creates a reporter that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns a reporter whose output lines are attributed to `urn`.
    #[must_use]
    pub fn for_construct(&self, urn: &Urn) -> Self {
        Self {
            tx: self.tx.clone(),
            urn: Some(urn.clone()),
        }
    }

    /// Sends an event.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is rendering anymore.
            let _ = tx.send(event);
        }
    }

    /// Sends one line of tool output.
    pub fn output(&self, line: impl Into<String>) {
        self.emit(ProgressEvent::Output {
            urn: self.urn.clone(),
            line: line.into(),
        });
    }
}
