//! Execution records kept by the task manager.

use crate::cancellation::CancellationToken;
use crate::config::ArticleConfig;
use crate::core::{ExecutionStatus, StageKind, TaskId};
use crate::errors::StageFailure;
use crate::events::{ProgressEvent, ProgressLog};
use crate::state::{AssembledDocument, ArticleSnapshot};
use crate::utils::{now_utc, Timestamp};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// The manager's record of one submitted task.
#[derive(Debug)]
pub(crate) struct WorkflowExecution {
    pub(crate) id: TaskId,
    /// Submission order within the manager.
    pub(crate) seq: u64,
    pub(crate) topic: String,
    pub(crate) config: Arc<ArticleConfig>,
    pub(crate) status: ExecutionStatus,
    pub(crate) created_at: Timestamp,
    pub(crate) started_at: Option<Timestamp>,
    pub(crate) completed_at: Option<Timestamp>,
    /// Monotonic completion time for expiry.
    pub(crate) finished: Option<Instant>,
    pub(crate) failure: Option<StageFailure>,
    pub(crate) incomplete: bool,
    pub(crate) retrieved: bool,
    pub(crate) state: Option<ArticleSnapshot>,
    pub(crate) log: Arc<ProgressLog>,
    pub(crate) cancel: Arc<CancellationToken>,
}

impl WorkflowExecution {
    pub(crate) fn new(
        id: TaskId,
        seq: u64,
        topic: String,
        config: ArticleConfig,
        log: Arc<ProgressLog>,
    ) -> Self {
        Self {
            id,
            seq,
            topic,
            config: Arc::new(config),
            status: ExecutionStatus::Queued,
            created_at: now_utc(),
            started_at: None,
            completed_at: None,
            finished: None,
            failure: None,
            incomplete: false,
            retrieved: false,
            state: None,
            log,
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(now_utc());
    }

    pub(crate) fn finish(
        &mut self,
        status: ExecutionStatus,
        state: ArticleSnapshot,
        failure: Option<StageFailure>,
        incomplete: bool,
    ) {
        self.status = status;
        self.state = Some(state);
        self.failure = failure;
        self.incomplete = incomplete;
        self.completed_at = Some(now_utc());
        self.finished = Some(Instant::now());
    }

    /// The stage of the most recent `StageStarted` event.
    pub(crate) fn current_stage(&self) -> Option<StageKind> {
        if self.status.is_terminal() || self.status == ExecutionStatus::Queued {
            return None;
        }
        self.log
            .events_since(0)
            .into_iter()
            .rev()
            .find_map(|e| match e.event {
                ProgressEvent::StageStarted { stage } => Some(stage),
                _ => None,
            })
    }

    pub(crate) fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            id: self.id,
            topic: self.topic.clone(),
            status: self.status,
            current_stage: self.current_stage(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failure: self.failure.clone(),
            incomplete: self.incomplete,
            retrieved: self.retrieved,
            events: self.log.len(),
        }
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    /// Task id.
    pub id: TaskId,
    /// The requested topic.
    pub topic: String,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// The stage running now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageKind>,
    /// Submission time.
    pub created_at: Timestamp,
    /// When a worker slot was acquired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the task reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// The critical failure, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    /// Whether the result is partial.
    pub incomplete: bool,
    /// Whether the result was already fetched.
    pub retrieved: bool,
    /// Number of progress events so far.
    pub events: usize,
}

/// The outcome of a finished task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Task id.
    pub id: TaskId,
    /// Terminal status.
    pub status: ExecutionStatus,
    /// The final, possibly partial, state.
    pub state: ArticleSnapshot,
    /// Whether the article is partial.
    pub incomplete: bool,
    /// The critical failure, for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

impl TaskResult {
    /// The assembled document, if the task got that far.
    #[must_use]
    pub fn document(&self) -> Option<&AssembledDocument> {
        self.state.document()
    }

    /// The Markdown text, if any.
    #[must_use]
    pub fn markdown(&self) -> Option<&str> {
        self.document().map(|d| d.markdown.as_str())
    }
}
