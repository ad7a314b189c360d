//! Error types for the articleflow pipeline.
//!
//! The taxonomy separates failures of external services ([`AdapterError`]),
//! invalid state updates ([`StateConflictError`]), stage-level outcomes
//! ([`StageFailure`]) and task lookups ([`TaskError`]).

use crate::core::{ExecutionStatus, StageKind, TaskId};
use crate::state::{SectionStatus, StateField};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for articleflow operations.
#[derive(Debug, Error)]
pub enum ArticleflowError {
    /// An external service call failed.
    #[error("{0}")]
    Adapter(#[from] AdapterError),

    /// A state delta was rejected.
    #[error("{0}")]
    StateConflict(#[from] StateConflictError),

    /// A stage failed.
    #[error("{0}")]
    Stage(#[from] StageFailure),

    /// A task lookup failed.
    #[error("{0}")]
    Task(#[from] TaskError),

    /// A stage read a field it did not declare.
    #[error("{0}")]
    UndeclaredField(#[from] UndeclaredFieldError),

    /// A prompt template could not be rendered.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// Invalid configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a failed external call may succeed if repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    /// Timeouts, rate limits, 5xx responses.
    Transient,
    /// Bad requests, authentication failures, undecodable responses.
    Permanent,
}

/// Failure of a text, search or image service call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// A retryable failure.
    #[error("{service} transient error: {message}")]
    Transient {
        /// The service that failed (e.g. "text", "search").
        service: String,
        /// Error description.
        message: String,
    },

    /// A non-retryable failure.
    #[error("{service} permanent error: {message}")]
    Permanent {
        /// The service that failed.
        service: String,
        /// Error description.
        message: String,
    },
}

impl AdapterError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> AdapterErrorKind {
        match self {
            Self::Transient { .. } => AdapterErrorKind::Transient,
            Self::Permanent { .. } => AdapterErrorKind::Permanent,
        }
    }

    /// Returns true if the call may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the error message without the service prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Permanent { message, .. } => message,
        }
    }
}

impl From<TemplateError> for AdapterError {
    fn from(err: TemplateError) -> Self {
        Self::permanent("template", err.to_string())
    }
}

impl From<UndeclaredFieldError> for AdapterError {
    fn from(err: UndeclaredFieldError) -> Self {
        Self::permanent("state", err.to_string())
    }
}

/// Error raised when a delta would break an [`ArticleState`](crate::state::ArticleState) invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateConflictError {
    /// The delta would move a section backward.
    #[error("Section '{section}' cannot regress from {from} to {to}")]
    StatusRegression {
        /// The section id.
        section: String,
        /// Current status.
        from: SectionStatus,
        /// Requested status.
        to: SectionStatus,
    },

    /// The delta references a section missing from the outline.
    #[error("Section '{section}' is not in the outline")]
    UnknownSection {
        /// The section id.
        section: String,
    },

    /// The delta writes content for a stage the section has not reached.
    #[error("Section '{section}' cannot hold {content} while {status}")]
    ContentAheadOfStatus {
        /// The section id.
        section: String,
        /// The content being written (e.g. "code blocks").
        content: &'static str,
        /// The status the section would have after the delta.
        status: SectionStatus,
    },

    /// An outline entry with this id already exists with different content.
    #[error("Outline already contains a different section '{section}'")]
    OutlineConflict {
        /// The section id.
        section: String,
    },

    /// An asset with this id already exists with different content.
    #[error("Asset '{asset}' already exists with different content")]
    AssetConflict {
        /// The asset id.
        asset: String,
    },
}

impl StateConflictError {
    /// Creates a status regression error.
    #[must_use]
    pub fn regression(section: impl Into<String>, from: SectionStatus, to: SectionStatus) -> Self {
        Self::StatusRegression {
            section: section.into(),
            from,
            to,
        }
    }

    /// Creates an unknown section error.
    #[must_use]
    pub fn unknown_section(section: impl Into<String>) -> Self {
        Self::UnknownSection {
            section: section.into(),
        }
    }
}

/// Outcome of a stage that could not do its job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// The failing stage.
    pub stage: StageKind,
    /// Why it failed.
    pub reason: String,
    /// Whether the pipeline may continue.
    pub recoverable: bool,
}

impl StageFailure {
    /// Creates a recoverable failure.
    #[must_use]
    pub fn recoverable(stage: StageKind, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            recoverable: true,
        }
    }

    /// Creates an unrecoverable failure.
    #[must_use]
    pub fn unrecoverable(stage: StageKind, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            recoverable: false,
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.recoverable {
            "recoverable"
        } else {
            "unrecoverable"
        };
        write!(f, "Stage {} failed ({kind}): {}", self.stage, self.reason)
    }
}

impl std::error::Error for StageFailure {}

/// Errors returned by the task manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Unknown or expired task.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// The task has not reached a terminal state.
    #[error("Task {id} is not ready (status: {status})")]
    NotReady {
        /// The task id.
        id: TaskId,
        /// Current status.
        status: ExecutionStatus,
    },

    /// The topic was empty.
    #[error("Topic must not be empty")]
    InvalidTopic,
}

/// Error raised when a stage reads state it did not declare.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Undeclared dependency: stage '{stage}' attempted to read '{field}' which was not declared")]
pub struct UndeclaredFieldError {
    /// The stage attempting access.
    pub stage: StageKind,
    /// The undeclared field.
    pub field: StateField,
}

impl UndeclaredFieldError {
    /// Creates a new undeclared field error.
    #[must_use]
    pub fn new(stage: StageKind, field: StateField) -> Self {
        Self { stage, field }
    }
}

/// Errors raised while rendering a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// No template with this name is registered.
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// The template references a variable that was not supplied.
    #[error("Template '{template}' is missing variable '{variable}'")]
    MissingVariable {
        /// The template name.
        template: String,
        /// The missing variable.
        variable: String,
    },
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration: {field} {reason}")]
pub struct ConfigError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub reason: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
