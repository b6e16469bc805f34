//! Error types for the construct orchestrator.
//!
//! This module provides the error hierarchy for every stage of a run:
//! environment configuration, state persistence, planning, construct
//! evaluation, stack engine invocation, and orchestration itself.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::ConstructStatus;

/// The main error type for the construct orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Construct evaluation errors.
    #[error("Evaluation error: {0}")]
    Evaluate(#[from] EvaluateError),

    /// Stack engine errors.
    #[error("Stack engine error: {0}")]
    Stack(#[from] StackError),

    /// Run-level errors.
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// A failure scoped to a single construct and phase.
    #[error("construct {urn} failed during {phase}: {source}")]
    Construct {
        /// URN of the construct being processed.
        urn: String,
        /// Phase in which the failure happened.
        phase: Phase,
        /// Underlying error.
        #[source]
        source: Box<OrchestratorError>,
    },

    /// Several constructs of the same wave failed.
    #[error("{} constructs failed: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<OrchestratorError>),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Phase of per-construct orchestration, used for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Turning the construct into a deployable artifact.
    Evaluate,
    /// Previewing the artifact.
    Preview,
    /// Installing and type-checking the artifact.
    Compile,
    /// Creating or updating the stack.
    Deploy,
    /// Destroying the stack.
    Destroy,
    /// Recording the outcome in state.
    Record,
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment description was not found.
    #[error("Environment description not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The environment description could not be parsed.
    #[error("Failed to parse environment description: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Environment validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A URN string could not be parsed.
    #[error("Invalid URN '{urn}': {reason}")]
    InvalidUrn {
        /// The offending URN string.
        urn: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Schema version differs from the stored state.
    #[error("State schema version mismatch: state has {state}, environment has {environment}")]
    SchemaMismatch {
        /// Schema version recorded in state.
        state: u32,
        /// Schema version declared by the environment.
        environment: u32,
    },

    /// Default region differs from the stored state while resources are deployed.
    #[error("Cannot change region ({from} -> {to}) with deployed constructs: {deployed}")]
    RegionMismatch {
        /// Region recorded in state.
        from: String,
        /// Region declared by the environment.
        to: String,
        /// Constructs that are still deployed.
        deployed: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Reading or writing the state backend failed.
    #[error("State storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// A construct is not present in state.
    #[error("Construct {urn} not found in state")]
    ConstructNotFound {
        /// URN of the missing construct.
        urn: String,
    },

    /// A status change is not permitted by the lifecycle table.
    #[error("Invalid transition for {urn}: {from} -> {to}")]
    InvalidTransition {
        /// URN of the construct.
        urn: String,
        /// Current status.
        from: ConstructStatus,
        /// Rejected target status.
        to: ConstructStatus,
    },

    /// A construct's declaration cannot change while it is being provisioned.
    #[error("Construct {urn} is {status} and cannot be redeclared")]
    ConstructFrozen {
        /// URN of the construct.
        urn: String,
        /// Current in-flight status.
        status: ConstructStatus,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected involving {urn}")]
    CircularDependency {
        /// A construct that is part of the cycle.
        urn: String,
    },

    /// A construct depends on something outside the run.
    #[error("Construct {urn} depends on {dependency}, which is not part of this run")]
    UnknownDependency {
        /// The dependent construct.
        urn: String,
        /// The missing dependency.
        dependency: String,
    },
}

/// Construct evaluation errors.
#[derive(Debug, Error)]
pub enum EvaluateError {
    /// Some inputs have not been resolved yet.
    #[error("Construct {urn} has unresolved inputs: {inputs}")]
    UnresolvedInputs {
        /// URN of the construct.
        urn: String,
        /// Comma-separated input names.
        inputs: String,
    },

    /// The generator failed to produce an artifact.
    #[error("Generator failed for {urn}: {message}")]
    GeneratorFailed {
        /// URN of the construct.
        urn: String,
        /// Description of the failure.
        message: String,
    },
}

/// Stack engine errors.
#[derive(Debug, Error)]
pub enum StackError {
    /// An engine command exited unsuccessfully.
    #[error("Stack command '{command}' failed for {stack}: {message}")]
    CommandFailed {
        /// Engine sub-command.
        command: String,
        /// Stack name.
        stack: String,
        /// First line of the engine's error output.
        message: String,
    },

    /// The engine reported a failed result.
    #[error("Stack {stack} finished with result '{result}'")]
    Failed {
        /// Stack name.
        stack: String,
        /// Result code reported by the engine.
        result: String,
    },

    /// The exported snapshot has no meta resource or synthetic maps.
    #[error("Stack snapshot is missing {what}")]
    MissingMeta {
        /// What could not be found.
        what: String,
    },

    /// The exported snapshot could not be decoded.
    #[error("Malformed stack snapshot: {message}")]
    MalformedSnapshot {
        /// Description of the decoding problem.
        message: String,
    },

    /// The engine invocation was cancelled.
    #[error("Stack command '{command}' for {stack} was cancelled")]
    Cancelled {
        /// Engine sub-command.
        command: String,
        /// Stack name.
        stack: String,
    },
}

/// Run-level errors.
#[derive(Debug, Error)]
pub enum RunError {
    /// The run was aborted.
    #[error("Run aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// The requested mode is not supported.
    #[error("Unsupported: {operation}")]
    Unsupported {
        /// The unsupported operation.
        operation: String,
    },

    /// The run was cancelled before completion.
    #[error("Run cancelled")]
    Cancelled,
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

fn join_errors(errors: &[OrchestratorError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl OrchestratorError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wraps this error with the construct and phase it happened in.
    #[must_use]
    pub fn in_construct(self, urn: impl Into<String>, phase: Phase) -> Self {
        Self::Construct {
            urn: urn.into(),
            phase,
            source: Box::new(self),
        }
    }

    /// Returns true if this error belongs to the configuration class.
    ///
    /// Configuration errors abort a run before any provisioning begins.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Plan(_))
    }

    /// Returns true if this error was caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Run(RunError::Cancelled) | Self::Stack(StackError::Cancelled { .. }) => true,
            Self::Construct { source, .. } => source.is_cancelled(),
            Self::Multiple(errors) => errors.iter().any(Self::is_cancelled),
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            Self::Evaluate => "evaluate",
            Self::Preview => "preview",
            Self::Compile => "compile",
            Self::Deploy => "deploy",
            Self::Destroy => "destroy",
            Self::Record => "record",
        };
        write!(f, "{phase}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_context_keeps_chain() {
        let inner = OrchestratorError::Stack(StackError::Failed {
            stack: String::from("db"),
            result: String::from("failed"),
        });
        let err = inner.in_construct("urn:acme:shop:dev:web:construct/bucket:db", Phase::Deploy);
        let message = err.to_string();

        assert!(message.contains("during deploy"));
        assert!(message.contains("finished with result 'failed'"));
    }

    #[test]
    fn test_is_cancelled_looks_through_context() {
        let err = OrchestratorError::Stack(StackError::Cancelled {
            command: String::from("up"),
            stack: String::from("api"),
        })
        .in_construct("urn:a:b", Phase::Deploy);

        assert!(err.is_cancelled());
        assert!(!OrchestratorError::internal("boom").is_cancelled());
    }

    #[test]
    fn test_configuration_class() {
        let err = OrchestratorError::Plan(PlanError::CircularDependency {
            urn: String::from("urn:a:b"),
        });
        assert!(err.is_configuration());
    }
}
