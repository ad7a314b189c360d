//! Progress events emitted while a task runs.

use crate::core::{StageKind, TaskId};
use crate::state::DeltaSummary;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// Something that happened during a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The task was accepted and is waiting for a worker slot.
    TaskQueued,
    /// The task got a worker slot.
    TaskStarted,
    /// A stage began.
    StageStarted {
        /// The stage.
        stage: StageKind,
    },
    /// Free-form progress within a stage.
    StageProgress {
        /// The stage.
        stage: StageKind,
        /// Human-readable message.
        message: String,
    },
    /// A stage was not run.
    StageSkipped {
        /// The stage.
        stage: StageKind,
        /// Why it was skipped.
        reason: String,
    },
    /// A stage finished and its delta was committed.
    StageCompleted {
        /// The stage.
        stage: StageKind,
        /// What the delta changed.
        delta_summary: DeltaSummary,
    },
    /// A stage, or part of one, failed.
    StageFailed {
        /// The stage.
        stage: StageKind,
        /// Error description.
        error: String,
        /// Whether the pipeline carried on.
        recoverable: bool,
    },
    /// The task finished. `incomplete` is set if any recoverable errors occurred.
    TaskCompleted {
        /// Whether the article has gaps.
        incomplete: bool,
    },
    /// The task failed at a critical stage.
    TaskFailed {
        /// The failing stage.
        stage: StageKind,
        /// Why.
        reason: String,
    },
    /// The task was cancelled.
    TaskCancelled {
        /// Cancellation reason.
        reason: String,
    },
}

impl ProgressEvent {
    /// Returns the dotted event name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TaskQueued => "task.queued",
            Self::TaskStarted => "task.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageProgress { .. } => "stage.progress",
            Self::StageSkipped { .. } => "stage.skipped",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskCancelled { .. } => "task.cancelled",
        }
    }

    /// Returns the stage the event refers to, if any.
    #[must_use]
    pub const fn stage(&self) -> Option<StageKind> {
        match self {
            Self::StageStarted { stage }
            | Self::StageProgress { stage, .. }
            | Self::StageSkipped { stage, .. }
            | Self::StageCompleted { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::TaskFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns true if no event can follow this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TaskCompleted { .. } | Self::TaskFailed { .. } | Self::TaskCancelled { .. }
        )
    }
}

/// A progress event with its position in the task's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Zero-based position in the log.
    pub index: usize,
    /// The task.
    pub task_id: TaskId,
    /// When the event was appended.
    pub at: Timestamp,
    /// The event.
    pub event: ProgressEvent,
}

impl EventEnvelope {
    /// Wraps an event.
    #[must_use]
    pub fn new(index: usize, task_id: TaskId, event: ProgressEvent) -> Self {
        Self {
            index,
            task_id,
            at: now_utc(),
            event,
        }
    }
}
