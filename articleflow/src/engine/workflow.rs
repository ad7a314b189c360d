//! The workflow engine: runs the stages over one article state.

use super::machine::{MachineState, StageMachine, Step};
use crate::adapters::AdapterSet;
use crate::cancellation::CancellationToken;
use crate::config::{ArticleConfig, EngineConfig};
use crate::core::{ExecutionStatus, StageKind};
use crate::errors::StageFailure;
use crate::events::{ProgressEvent, ProgressLog};
use crate::observability::SpanTimer;
use crate::stages::{default_stages, Stage, StageContext, StageOutcome, StageResult};
use crate::state::{ArticleBrief, ArticleState, DeltaSummary, ReadView, StageErrorRecord, StateDelta};
use crate::templates::PromptTemplates;
use std::sync::Arc;
use tracing::instrument;

const ILLUSTRATION_DISABLED: &str = "illustration disabled";

/// How an engine run ended, with the state it produced.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    /// Terminal status.
    pub status: ExecutionStatus,
    /// The final (possibly partial) state.
    pub state: ArticleState,
    /// The critical failure, for `Failed`.
    pub failure: Option<StageFailure>,
    /// The cancellation reason, for `Cancelled`.
    pub cancel_reason: Option<String>,
}

impl EngineOutcome {
    /// Returns true if the article is partial: the run did not succeed,
    /// some stage recorded an error, or a section has no prose.
    #[must_use]
    pub fn incomplete(&self) -> bool {
        self.status.is_incomplete()
            || !self.state.errors().is_empty()
            || self.state.document().map_or(true, |d| !d.gaps.is_empty())
    }

    /// The event that closes the task's progress log.
    #[must_use]
    pub fn terminal_event(&self) -> ProgressEvent {
        match self.status {
            ExecutionStatus::Cancelled => ProgressEvent::TaskCancelled {
                reason: self
                    .cancel_reason
                    .clone()
                    .unwrap_or_else(|| "cancelled".to_string()),
            },
            ExecutionStatus::Succeeded => ProgressEvent::TaskCompleted {
                incomplete: self.incomplete(),
            },
            _ => {
                let (stage, reason) = self.failure.as_ref().map_or_else(
                    || (StageKind::Assemble, "execution did not finish".to_string()),
                    |f| (f.stage, f.reason.clone()),
                );
                ProgressEvent::TaskFailed { stage, reason }
            }
        }
    }
}

/// Runs the article pipeline.
///
/// The engine owns the state by value for the whole run and is its only
/// writer; stages see it through a [`ReadView`] and return deltas.
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    adapters: AdapterSet,
    templates: Arc<PromptTemplates>,
    stages: Vec<Arc<dyn Stage>>,
}

impl WorkflowEngine {
    /// Creates an engine with the built-in stages.
    #[must_use]
    pub fn new(adapters: AdapterSet, templates: PromptTemplates, config: &EngineConfig) -> Self {
        Self {
            adapters: adapters.with_timeout(config.adapter_timeout()),
            templates: Arc::new(templates),
            stages: default_stages(),
        }
    }

    /// Replaces the stage of the same kind.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        let kind = stage.kind();
        match self.stages.iter_mut().find(|s| s.kind() == kind) {
            Some(slot) => *slot = stage,
            None => self.stages.push(stage),
        }
        self
    }

    /// The stage registered for a kind.
    #[must_use]
    pub fn stage(&self, kind: StageKind) -> Option<&Arc<dyn Stage>> {
        self.stages.iter().find(|s| s.kind() == kind)
    }

    /// The adapters handed to stages.
    #[must_use]
    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Runs every stage for `topic` and returns the final state.
    ///
    /// Progress goes to `log`. The terminal task event is not appended;
    /// see [`EngineOutcome::terminal_event`].
    #[instrument(skip_all, fields(task_id = %log.task_id(), topic = %topic))]
    pub async fn run(
        &self,
        topic: &str,
        config: &ArticleConfig,
        log: &ProgressLog,
        cancel: &CancellationToken,
    ) -> EngineOutcome {
        let timer = SpanTimer::start("workflow");
        let mut state = ArticleState::new(topic, ArticleBrief::from(config));
        let mut machine = StageMachine::new();
        let mut broken: Option<StageFailure> = None;

        let first = if cancel.is_cancelled() {
            cancel_step(cancel)
        } else {
            Step::Continue
        };
        if let Err(e) = machine.step(first) {
            tracing::error!(error = %e, "Stage machine rejected start");
        }

        while let Some(kind) = machine.current() {
            if cancel.is_cancelled() {
                advance(&mut machine, cancel_step(cancel), kind, &mut broken);
                break;
            }
            if kind == StageKind::Illustrate && !config.illustrate {
                log.append(ProgressEvent::StageSkipped {
                    stage: kind,
                    reason: ILLUSTRATION_DISABLED.to_string(),
                });
                advance(&mut machine, Step::Continue, kind, &mut broken);
                continue;
            }
            let Some(stage) = self.stage(kind) else {
                log.append(ProgressEvent::StageSkipped {
                    stage: kind,
                    reason: "no stage registered".to_string(),
                });
                advance(&mut machine, Step::Continue, kind, &mut broken);
                continue;
            };

            log.append(ProgressEvent::StageStarted { stage: kind });
            let stage_timer = SpanTimer::start(kind.as_str());
            let result = {
                let view = ReadView::new(&state, kind, stage.reads());
                let ctx = StageContext::new(view, &self.adapters, &self.templates, config, log, cancel);
                stage.execute(&ctx).await
            };
            tracing::debug!(
                stage = %kind,
                duration_ms = stage_timer.elapsed_ms(),
                "Stage executed"
            );

            // A cancel that arrived mid-stage never hides a failure or a finished article.
            let step = match Self::commit(&mut state, kind, result, log) {
                Step::Continue | Step::SkipToAssemble
                    if cancel.is_cancelled() && kind != StageKind::Assemble =>
                {
                    cancel_step(cancel)
                }
                step => step,
            };
            advance(&mut machine, step, kind, &mut broken);
        }

        let (status, failure, cancel_reason) = match machine.state() {
            MachineState::Completed => (ExecutionStatus::Succeeded, None, None),
            MachineState::Cancelled { reason } => (ExecutionStatus::Cancelled, None, Some(reason.clone())),
            MachineState::Failed { stage, reason } => (
                ExecutionStatus::Failed,
                Some(StageFailure::unrecoverable(*stage, reason.clone())),
                None,
            ),
            MachineState::Idle | MachineState::Running(_) => (ExecutionStatus::Failed, broken, None),
        };

        tracing::info!(
            status = %status,
            errors = state.errors().len(),
            duration_ms = timer.elapsed_ms(),
            "Workflow finished"
        );
        EngineOutcome {
            status,
            state,
            failure,
            cancel_reason,
        }
    }

    /// Commits a stage result and decides the next step.
    fn commit(
        state: &mut ArticleState,
        kind: StageKind,
        result: StageResult,
        log: &ProgressLog,
    ) -> Step {
        let StageResult {
            delta,
            events,
            outcome,
        } = result;
        let critical = kind.is_critical();

        let summary = match state.apply_delta(&delta) {
            Ok(summary) => Some(summary),
            Err(conflict) => {
                let message = format!("delta rejected: {conflict}");
                tracing::warn!(stage = %kind, error = %conflict, "Discarding conflicting delta");
                record(state, StageErrorRecord::new(kind, message.clone(), !critical));
                log.extend(events.clone());
                log.append(ProgressEvent::StageFailed {
                    stage: kind,
                    error: message.clone(),
                    recoverable: !critical,
                });
                if critical {
                    return Step::Fail {
                        stage: kind,
                        reason: message,
                    };
                }
                None
            }
        };
        if summary.is_some() {
            log.extend(events);
        }

        let completed = |summary: Option<DeltaSummary>| {
            if let Some(delta_summary) = summary {
                log.append(ProgressEvent::StageCompleted {
                    stage: kind,
                    delta_summary,
                });
            }
        };

        match outcome {
            StageOutcome::Continue => {
                completed(summary);
                Step::Continue
            }
            StageOutcome::SkipRemaining { reason } => {
                completed(summary);
                tracing::info!(stage = %kind, reason = %reason, "Skipping to assemble");
                for skipped in StageKind::ALL
                    .iter()
                    .filter(|s| **s > kind && **s < StageKind::Assemble)
                {
                    log.append(ProgressEvent::StageSkipped {
                        stage: *skipped,
                        reason: reason.clone(),
                    });
                }
                Step::SkipToAssemble
            }
            StageOutcome::Fail(failure) => {
                tracing::warn!(stage = %kind, critical, reason = %failure.reason, "Stage failed");
                record(state, StageErrorRecord::new(kind, failure.reason.clone(), !critical));
                log.append(ProgressEvent::StageFailed {
                    stage: kind,
                    error: failure.reason.clone(),
                    recoverable: !critical,
                });
                if critical {
                    Step::Fail {
                        stage: kind,
                        reason: failure.reason,
                    }
                } else {
                    Step::Continue
                }
            }
        }
    }
}

fn cancel_step(cancel: &CancellationToken) -> Step {
    Step::Cancel {
        reason: cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
    }
}

fn record(state: &mut ArticleState, error: StageErrorRecord) {
    if let Err(e) = state.apply_delta(&StateDelta::new().with_error(error)) {
        tracing::error!(error = %e, "Failed to record stage error");
    }
}

fn advance(machine: &mut StageMachine, step: Step, kind: StageKind, broken: &mut Option<StageFailure>) {
    if let Err(e) = machine.step(step) {
        tracing::error!(stage = %kind, error = %e, "Stage machine rejected transition");
        *broken = Some(StageFailure::unrecoverable(kind, e.to_string()));
        // Force a terminal state so the loop ends.
        let _ = machine.step(Step::Fail {
            stage: kind,
            reason: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEventSink;
    use crate::testing::{fixtures, ScriptedTextGenerator, StaticSearchProvider};
    use crate::core::TaskId;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct FailingReview;

    #[async_trait]
    impl Stage for FailingReview {
        fn kind(&self) -> StageKind {
            StageKind::Review
        }

        fn reads(&self) -> &'static [crate::state::StateField] {
            &[crate::state::StateField::Topic]
        }

        async fn execute(&self, _ctx: &StageContext<'_>) -> StageResult {
            StageResult::fail(
                StateDelta::new(),
                StageFailure::unrecoverable(StageKind::Review, "reviewer unavailable"),
            )
        }
    }

    #[derive(Debug)]
    struct ConflictingCode;

    #[async_trait]
    impl Stage for ConflictingCode {
        fn kind(&self) -> StageKind {
            StageKind::Code
        }

        fn reads(&self) -> &'static [crate::state::StateField] {
            &[crate::state::StateField::Outline]
        }

        async fn execute(&self, _ctx: &StageContext<'_>) -> StageResult {
            StageResult::ok(StateDelta::new().with_section_delta(
                "no-such-section",
                crate::state::SectionDelta::new().with_status(crate::state::SectionStatus::Coded),
            ))
        }
    }

    /// Cancels the run from inside a stage, then returns `then`'s result.
    #[derive(Debug)]
    struct CancelsDuring {
        kind: StageKind,
        token: Arc<CancellationToken>,
        then: Arc<dyn Stage>,
    }

    #[async_trait]
    impl Stage for CancelsDuring {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn reads(&self) -> &'static [crate::state::StateField] {
            self.then.reads()
        }

        async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
            self.token.cancel("user pressed stop");
            self.then.execute(ctx).await
        }
    }

    #[derive(Debug)]
    struct UnusablePlan;

    #[async_trait]
    impl Stage for UnusablePlan {
        fn kind(&self) -> StageKind {
            StageKind::Plan
        }

        fn reads(&self) -> &'static [crate::state::StateField] {
            &[crate::state::StateField::Topic]
        }

        async fn execute(&self, _ctx: &StageContext<'_>) -> StageResult {
            StageResult::fail(
                StateDelta::new(),
                StageFailure::unrecoverable(StageKind::Plan, "outline unusable"),
            )
        }
    }

    fn log() -> ProgressLog {
        ProgressLog::new(TaskId::new(), Arc::new(NoOpEventSink))
    }

    #[tokio::test]
    async fn test_run_succeeds_with_scripted_adapters() {
        let engine = fixtures::engine(fixtures::happy_text(&["Intro", "Usage"]), fixtures::redis_search());
        let log = log();

        let outcome = engine
            .run("Redis basics", &fixtures::fast_config(), &log, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Succeeded);
        assert!(outcome.state.document().is_some());
        let started: Vec<_> = log
            .events_since(0)
            .into_iter()
            .filter_map(|e| match e.event {
                ProgressEvent::StageStarted { stage } => Some(stage),
                _ => None,
            })
            .collect();
        assert_eq!(started, StageKind::ALL.to_vec());
        assert!(matches!(outcome.terminal_event(), ProgressEvent::TaskCompleted { .. }));
    }

    #[tokio::test]
    async fn test_non_critical_failure_is_recorded_and_pipeline_continues() {
        let engine = fixtures::engine(fixtures::happy_text(&["Intro"]), fixtures::redis_search())
            .with_stage(Arc::new(FailingReview));
        let log = log();

        let outcome = engine
            .run("Redis basics", &fixtures::fast_config(), &log, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Succeeded);
        let review_errors: Vec<_> = outcome.state.errors_for(StageKind::Review).collect();
        assert_eq!(review_errors.len(), 1);
        assert!(review_errors[0].recoverable);
        assert!(outcome.incomplete());
    }

    #[tokio::test]
    async fn test_conflicting_delta_is_discarded() {
        let engine = fixtures::engine(fixtures::happy_text(&["Intro"]), fixtures::redis_search())
            .with_stage(Arc::new(ConflictingCode));
        let log = log();

        let outcome = engine
            .run("Redis basics", &fixtures::fast_config(), &log, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Succeeded);
        let code_errors: Vec<_> = outcome.state.errors_for(StageKind::Code).collect();
        assert_eq!(code_errors.len(), 1);
        assert!(code_errors[0].message.contains("delta rejected"));
        assert!(!log.events_since(0).iter().any(|e| matches!(
            e.event,
            ProgressEvent::StageCompleted {
                stage: StageKind::Code,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_touches_nothing() {
        let engine = fixtures::engine(ScriptedTextGenerator::new(), StaticSearchProvider::new());
        let cancel = CancellationToken::new();
        cancel.cancel("changed my mind");
        let log = log();

        let outcome = engine.run("Redis basics", &fixtures::fast_config(), &log, &cancel).await;

        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert!(log.is_empty());
        assert_eq!(
            outcome.terminal_event(),
            ProgressEvent::TaskCancelled {
                reason: "changed my mind".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_skip_remaining_emits_skipped_events() {
        let text = ScriptedTextGenerator::new()
            .respond(crate::templates::names::RESEARCH_QUERIES, r#"{"queries": ["redis"]}"#)
            .respond(crate::templates::names::RESEARCH_SUMMARY, r#"{"background": "b"}"#)
            .respond(crate::templates::names::PLAN, fixtures::plan_json(&["Intro"]))
            .fail(
                crate::templates::names::WRITE,
                crate::errors::AdapterError::permanent("text", "quota"),
            );
        let engine = fixtures::engine(text, fixtures::redis_search());
        let log = log();

        let outcome = engine
            .run("Redis basics", &fixtures::fast_config(), &log, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, ExecutionStatus::Succeeded);
        let skipped: Vec<_> = log
            .events_since(0)
            .into_iter()
            .filter_map(|e| match e.event {
                ProgressEvent::StageSkipped { stage, .. } => Some(stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            skipped,
            vec![StageKind::Code, StageKind::Illustrate, StageKind::Review]
        );
        assert_eq!(outcome.state.document().unwrap().gaps, vec!["intro"]);
        assert!(matches!(
            outcome.terminal_event(),
            ProgressEvent::TaskCompleted { incomplete: true }
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_failing_plan_keeps_the_failure() {
        let token = Arc::new(CancellationToken::new());
        let engine = fixtures::engine(fixtures::happy_text(&["Intro"]), fixtures::redis_search())
            .with_stage(Arc::new(CancelsDuring {
                kind: StageKind::Plan,
                token: Arc::clone(&token),
                then: Arc::new(UnusablePlan),
            }));
        let log = log();

        let outcome = engine.run("Redis basics", &fixtures::fast_config(), &log, &token).await;

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        let failure = outcome.failure.clone().unwrap();
        assert_eq!(failure.stage, StageKind::Plan);
        assert!(failure.reason.contains("outline unusable"));
        assert!(matches!(
            outcome.terminal_event(),
            ProgressEvent::TaskFailed { stage: StageKind::Plan, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_assemble_still_completes() {
        let token = Arc::new(CancellationToken::new());
        let engine = fixtures::engine(fixtures::happy_text(&["Intro", "Usage"]), fixtures::redis_search())
            .with_stage(Arc::new(CancelsDuring {
                kind: StageKind::Assemble,
                token: Arc::clone(&token),
                then: Arc::new(crate::stages::AssembleStage),
            }));
        let log = log();

        let outcome = engine.run("Redis basics", &fixtures::fast_config(), &log, &token).await;

        assert_eq!(outcome.status, ExecutionStatus::Succeeded);
        assert!(outcome.state.document().is_some());
        assert!(matches!(outcome.terminal_event(), ProgressEvent::TaskCompleted { .. }));
    }

    #[tokio::test]
    async fn test_cancel_during_write_stops_before_code() {
        let token = Arc::new(CancellationToken::new());
        let engine = fixtures::engine(fixtures::happy_text(&["Intro"]), fixtures::redis_search())
            .with_stage(Arc::new(CancelsDuring {
                kind: StageKind::Write,
                token: Arc::clone(&token),
                then: Arc::new(crate::stages::WriteStage),
            }));
        let log = log();

        let outcome = engine.run("Redis basics", &fixtures::fast_config(), &log, &token).await;

        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert_eq!(outcome.cancel_reason.as_deref(), Some("user pressed stop"));
        assert!(outcome.state.document().is_none());
    }
}
