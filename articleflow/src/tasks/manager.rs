//! Task lifecycle: submit, status, cancel, result and expiry.

use super::execution::{ExecutionSummary, TaskResult, WorkflowExecution};
use crate::cancellation::CancellationToken;
use crate::config::{ArticleConfig, TaskManagerConfig};
use crate::core::{ExecutionStatus, StageKind, TaskId};
use crate::engine::{EngineOutcome, WorkflowEngine};
use crate::errors::{ArticleflowError, StageFailure, TaskError};
use crate::events::{EventSink, LoggingEventSink, ProgressEvent, ProgressLog};
use crate::state::{ArticleBrief, ArticleState, StageErrorRecord, StateDelta};
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const CANCELLED_BY_CALLER: &str = "cancelled by caller";

struct ManagerInner {
    config: TaskManagerConfig,
    engine: WorkflowEngine,
    tasks: DashMap<TaskId, WorkflowExecution>,
    permits: Arc<Semaphore>,
    sink: Arc<dyn EventSink>,
    next_seq: AtomicU64,
}

/// Owns every execution and bounds how many run at once.
///
/// Cloning is cheap; clones share the same tasks.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.inner.tasks.len())
            .field("available_permits", &self.inner.permits.available_permits())
            .finish()
    }
}

impl TaskManager {
    /// Creates a manager whose progress events are mirrored to `tracing`.
    pub fn new(config: TaskManagerConfig, engine: WorkflowEngine) -> Result<Self, ArticleflowError> {
        Self::with_sink(config, engine, Arc::new(LoggingEventSink::info()))
    }

    /// Creates a manager mirroring progress events to `sink`.
    pub fn with_sink(
        config: TaskManagerConfig,
        engine: WorkflowEngine,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ArticleflowError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                permits: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
                config,
                engine,
                tasks: DashMap::new(),
                sink,
                next_seq: AtomicU64::new(0),
            }),
        })
    }

    /// The manager configuration.
    #[must_use]
    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    /// Queues a new article and returns its id immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, topic: impl Into<String>, config: ArticleConfig) -> Result<TaskId, ArticleflowError> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(TaskError::InvalidTopic.into());
        }
        config.validate()?;

        let id = TaskId::new();
        let log = Arc::new(ProgressLog::new(id, Arc::clone(&self.inner.sink)));
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let execution = WorkflowExecution::new(id, seq, topic, config, Arc::clone(&log));
        let job = Job {
            id,
            topic: execution.topic.clone(),
            config: Arc::clone(&execution.config),
            log: Arc::clone(&log),
            cancel: Arc::clone(&execution.cancel),
        };
        self.inner.tasks.insert(id, execution);
        log.append(ProgressEvent::TaskQueued);
        tracing::info!(task_id = %id, topic = %job.topic, "Task queued");

        tokio::spawn(run_task(Arc::clone(&self.inner), job));
        Ok(id)
    }

    /// Current summary of a task.
    pub fn status(&self, id: TaskId) -> Result<ExecutionSummary, TaskError> {
        self.inner
            .tasks
            .get(&id)
            .map(|task| task.summary())
            .ok_or(TaskError::NotFound(id))
    }

    /// Requests cooperative cancellation.
    ///
    /// Returns `Ok(false)` if the task already finished or was already
    /// cancelled.
    pub fn cancel(&self, id: TaskId) -> Result<bool, TaskError> {
        self.cancel_with_reason(id, CANCELLED_BY_CALLER)
    }

    /// Requests cancellation with a caller-supplied reason.
    pub fn cancel_with_reason(&self, id: TaskId, reason: impl Into<String>) -> Result<bool, TaskError> {
        let cancel = {
            let task = self.inner.tasks.get(&id).ok_or(TaskError::NotFound(id))?;
            if task.status.is_terminal() {
                return Ok(false);
            }
            Arc::clone(&task.cancel)
        };
        let requested = cancel.cancel(reason);
        if requested {
            tracing::info!(task_id = %id, "Cancellation requested");
        }
        Ok(requested)
    }

    /// The final state of a finished task.
    ///
    /// Marks the task retrieved, which makes it eligible for reaping.
    pub fn result(&self, id: TaskId) -> Result<TaskResult, TaskError> {
        let mut task = self.inner.tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        let Some(state) = task.state.clone().filter(|_| task.status.is_terminal()) else {
            return Err(TaskError::NotReady {
                id,
                status: task.status,
            });
        };
        task.retrieved = true;
        Ok(TaskResult {
            id,
            status: task.status,
            state,
            incomplete: task.incomplete,
            failure: task.failure.clone(),
        })
    }

    /// The task's progress log, for replay or live subscription.
    pub fn progress(&self, id: TaskId) -> Result<Arc<ProgressLog>, TaskError> {
        self.inner
            .tasks
            .get(&id)
            .map(|task| Arc::clone(&task.log))
            .ok_or(TaskError::NotFound(id))
    }

    /// Waits until the task reaches a terminal status.
    pub async fn wait(&self, id: TaskId) -> Result<ExecutionSummary, TaskError> {
        let log = self.progress(id)?;
        log.closed().await;
        self.status(id)
    }

    /// Summaries of every known task, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<ExecutionSummary> {
        let mut tasks: Vec<(u64, ExecutionSummary)> = self
            .inner
            .tasks
            .iter()
            .map(|task| (task.seq, task.summary()))
            .collect();
        tasks.sort_by_key(|(seq, _)| *seq);
        tasks.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Number of known tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Returns true if no tasks are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    /// Drops terminal tasks that were retrieved or outlived the expiry window.
    ///
    /// Returns the number of tasks removed.
    pub fn reap_expired(&self) -> usize {
        reap(&self.inner)
    }

    /// Starts a background sweep every `reap_interval`.
    ///
    /// The sweep stops once every manager handle is dropped.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.reap_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    tracing::debug!("Task manager dropped, stopping reaper");
                    break;
                };
                reap(&inner);
            }
        })
    }
}

fn reap(inner: &ManagerInner) -> usize {
    let expiry = inner.config.expiry();
    let before = inner.tasks.len();
    inner.tasks.retain(|_, task| {
        let Some(finished) = task.finished else {
            return true;
        };
        !(task.retrieved || finished.elapsed() >= expiry)
    });
    let removed = before.saturating_sub(inner.tasks.len());
    if removed > 0 {
        tracing::debug!(removed, "Reaped finished tasks");
    }
    removed
}

/// Everything a worker needs, cloned out of the record.
struct Job {
    id: TaskId,
    topic: String,
    config: Arc<ArticleConfig>,
    log: Arc<ProgressLog>,
    cancel: Arc<CancellationToken>,
}

async fn run_task(inner: Arc<ManagerInner>, job: Job) {
    let Job {
        id,
        topic,
        config,
        log,
        cancel,
    } = job;

    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        permit = Arc::clone(&inner.permits).acquire_owned() => permit.ok(),
    };
    let Some(_permit) = permit else {
        let reason = cancel.reason().unwrap_or_else(|| CANCELLED_BY_CALLER.to_string());
        tracing::info!(task_id = %id, reason = %reason, "Task cancelled while queued");
        let outcome = EngineOutcome {
            status: ExecutionStatus::Cancelled,
            state: ArticleState::new(topic, ArticleBrief::from(&*config)),
            failure: None,
            cancel_reason: Some(reason),
        };
        finish(&inner, id, &log, &outcome);
        return;
    };

    if let Some(mut task) = inner.tasks.get_mut(&id) {
        task.mark_running();
    }
    log.append(ProgressEvent::TaskStarted);
    tracing::info!(task_id = %id, "Task started");

    let run = AssertUnwindSafe(inner.engine.run(&topic, &config, &log, &cancel))
        .catch_unwind()
        .await;
    let outcome = run.unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let stage = last_started(&log).unwrap_or(StageKind::Research);
        let reason = format!("stage panicked: {message}");
        tracing::error!(task_id = %id, stage = %stage, panic = %message, "Workflow panicked");
        // The engine's partial state unwound with it; only the failure is kept.
        let mut state = ArticleState::new(topic.clone(), ArticleBrief::from(&*config));
        let record = StageErrorRecord::unrecoverable(stage, reason.clone());
        if let Err(e) = state.apply_delta(&StateDelta::new().with_error(record)) {
            tracing::error!(task_id = %id, error = %e, "Failed to record panic");
        }
        EngineOutcome {
            status: ExecutionStatus::Failed,
            state,
            failure: Some(StageFailure::unrecoverable(stage, reason)),
            cancel_reason: None,
        }
    });

    finish(&inner, id, &log, &outcome);
}

/// Stores the outcome, then closes the log so waiters see the final record.
fn finish(inner: &ManagerInner, id: TaskId, log: &ProgressLog, outcome: &EngineOutcome) {
    let incomplete = outcome.incomplete();
    if let Some(mut task) = inner.tasks.get_mut(&id) {
        task.finish(
            outcome.status,
            outcome.state.snapshot(),
            outcome.failure.clone(),
            incomplete,
        );
    }
    tracing::info!(task_id = %id, status = %outcome.status, incomplete, "Task finished");
    log.append(outcome.terminal_event());
}

fn last_started(log: &ProgressLog) -> Option<StageKind> {
    log.events_since(0).into_iter().rev().find_map(|e| match e.event {
        ProgressEvent::StageStarted { stage } => Some(stage),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEventSink;
    use crate::testing::{fixtures, ScriptedTextGenerator};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn manager(text: ScriptedTextGenerator, config: TaskManagerConfig) -> TaskManager {
        TaskManager::with_sink(
            config,
            fixtures::engine(text, fixtures::redis_search()),
            Arc::new(NoOpEventSink),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_topic() {
        let manager = manager(ScriptedTextGenerator::new(), TaskManagerConfig::default());
        let err = manager.submit("   ", fixtures::fast_config()).unwrap_err();
        assert!(matches!(err, ArticleflowError::Task(TaskError::InvalidTopic)));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_invalid_manager_config_is_rejected() {
        let engine = fixtures::engine(ScriptedTextGenerator::new(), fixtures::redis_search());
        let err = TaskManager::new(TaskManagerConfig::new().with_max_concurrent_tasks(0), engine).unwrap_err();
        assert!(matches!(err, ArticleflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let manager = manager(ScriptedTextGenerator::new(), TaskManagerConfig::default());
        let id = TaskId::new();
        assert_eq!(manager.status(id).unwrap_err(), TaskError::NotFound(id));
        assert_eq!(manager.cancel(id).unwrap_err(), TaskError::NotFound(id));
        assert!(manager.result(id).is_err());
        assert!(manager.progress(id).is_err());
    }

    #[derive(Debug)]
    struct PanickingCode;

    #[async_trait::async_trait]
    impl crate::stages::Stage for PanickingCode {
        fn kind(&self) -> StageKind {
            StageKind::Code
        }

        fn reads(&self) -> &'static [crate::state::StateField] {
            &[crate::state::StateField::Outline]
        }

        async fn execute(&self, _ctx: &crate::stages::StageContext<'_>) -> crate::stages::StageResult {
            panic!("code block index out of range")
        }
    }

    #[tokio::test]
    async fn test_engine_panic_fails_task_with_recorded_error() {
        let engine = fixtures::engine(fixtures::happy_text(&["Intro"]), fixtures::redis_search())
            .with_stage(Arc::new(PanickingCode));
        let manager =
            TaskManager::with_sink(TaskManagerConfig::default(), engine, Arc::new(NoOpEventSink)).unwrap();

        let id = manager.submit("Redis basics", fixtures::fast_config()).unwrap();
        let summary = manager.wait(id).await.unwrap();
        let result = manager.result(id).unwrap();

        assert_eq!(summary.status, ExecutionStatus::Failed);
        assert!(result.incomplete);
        let failure = result.failure.clone().unwrap();
        assert_eq!(failure.stage, StageKind::Code);
        assert_eq!(failure.reason, "stage panicked: code block index out of range");
        let errors = result.state.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, StageKind::Code);
        assert!(!errors[0].recoverable);
        assert!(matches!(
            manager.progress(id).unwrap().last().unwrap().event,
            ProgressEvent::TaskFailed { stage: StageKind::Code, .. }
        ));
    }

    #[tokio::test]
    async fn test_result_is_not_ready_while_running() {
        let text = fixtures::happy_text(&["Intro"]).with_delay(Duration::from_millis(200));
        let manager = manager(text, TaskManagerConfig::default());
        let id = manager.submit("Redis basics", fixtures::fast_config()).unwrap();

        assert!(matches!(manager.result(id), Err(TaskError::NotReady { .. })));

        let summary = manager.wait(id).await.unwrap();
        assert_eq!(summary.status, ExecutionStatus::Succeeded);
        assert!(summary.completed_at.is_some());
        assert!(summary.current_stage.is_none());
    }

    #[tokio::test]
    async fn test_cancel_while_queued_runs_no_stage() {
        let text = fixtures::happy_text(&["Intro"]).with_delay(Duration::from_millis(100));
        let manager = manager(text, TaskManagerConfig::new().with_max_concurrent_tasks(1));
        let first = manager.submit("Redis basics", fixtures::fast_config()).unwrap();
        let second = manager.submit("Kafka basics", fixtures::fast_config()).unwrap();

        assert!(manager.cancel(second).unwrap());
        let summary = manager.wait(second).await.unwrap();

        assert_eq!(summary.status, ExecutionStatus::Cancelled);
        let names: Vec<_> = manager
            .progress(second)
            .unwrap()
            .events_since(0)
            .into_iter()
            .map(|e| e.event.name())
            .collect();
        assert_eq!(names, vec!["task.queued", "task.cancelled"]);

        let result = manager.result(second).unwrap();
        assert!(result.incomplete);
        assert!(result.state.outline().is_empty());

        manager.cancel(first).unwrap();
        manager.wait(first).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_after_completion_returns_false() {
        let manager = manager(fixtures::happy_text(&["Intro"]), TaskManagerConfig::default());
        let id = manager.submit("Redis basics", fixtures::fast_config()).unwrap();
        manager.wait(id).await.unwrap();

        assert!(!manager.cancel(id).unwrap());
        assert_eq!(manager.status(id).unwrap().status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_reap_removes_retrieved_tasks() {
        let manager = manager(fixtures::happy_text(&["Intro"]), TaskManagerConfig::default());
        let kept = manager.submit("Redis basics", fixtures::fast_config()).unwrap();
        let fetched = manager.submit("Kafka basics", fixtures::fast_config()).unwrap();
        manager.wait(kept).await.unwrap();
        manager.wait(fetched).await.unwrap();

        manager.result(fetched).unwrap();
        assert_eq!(manager.reap_expired(), 1);

        assert!(manager.status(kept).is_ok());
        assert_eq!(manager.status(fetched).unwrap_err(), TaskError::NotFound(fetched));
    }

    #[tokio::test]
    async fn test_reap_removes_expired_tasks() {
        let config = TaskManagerConfig::new().with_expiry_seconds(0);
        let manager = manager(fixtures::happy_text(&["Intro"]), config);
        let id = manager.submit("Redis basics", fixtures::fast_config()).unwrap();
        manager.wait(id).await.unwrap();

        assert_eq!(manager.reap_expired(), 1);
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_stops_when_manager_dropped() {
        let config = TaskManagerConfig::new().with_reap_interval_seconds(1);
        let manager = manager(ScriptedTextGenerator::new(), config);
        let handle = manager.spawn_reaper();
        drop(manager);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_submission() {
        let manager = manager(fixtures::happy_text(&["Intro"]), TaskManagerConfig::default());
        let first = manager.submit("Redis basics", fixtures::fast_config()).unwrap();
        let second = manager.submit("Kafka basics", fixtures::fast_config()).unwrap();
        manager.wait(first).await.unwrap();
        manager.wait(second).await.unwrap();

        let ids: Vec<_> = manager.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first, second]);
    }
}
