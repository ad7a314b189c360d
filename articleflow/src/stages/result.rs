//! What a stage hands back to the engine.

use crate::core::StageKind;
use crate::errors::StageFailure;
use crate::events::ProgressEvent;
use crate::state::{StageErrorRecord, StateDelta};

/// How the engine should proceed after a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Move on to the next stage.
    Continue,
    /// Jump straight to Assemble.
    SkipRemaining {
        /// Why the remaining stages are pointless.
        reason: String,
    },
    /// The stage could not do its job.
    Fail(StageFailure),
}

/// Output of one stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Proposed state changes.
    pub delta: StateDelta,
    /// Events appended to the log after the delta is committed.
    pub events: Vec<ProgressEvent>,
    /// What happens next.
    pub outcome: StageOutcome,
}

impl StageResult {
    /// A successful result.
    #[must_use]
    pub fn ok(delta: StateDelta) -> Self {
        Self {
            delta,
            events: Vec::new(),
            outcome: StageOutcome::Continue,
        }
    }

    /// A result that skips to Assemble.
    #[must_use]
    pub fn skip_remaining(delta: StateDelta, reason: impl Into<String>) -> Self {
        Self {
            delta,
            events: Vec::new(),
            outcome: StageOutcome::SkipRemaining {
                reason: reason.into(),
            },
        }
    }

    /// A failed result. The delta is still committed.
    #[must_use]
    pub fn fail(delta: StateDelta, failure: StageFailure) -> Self {
        Self {
            delta,
            events: Vec::new(),
            outcome: StageOutcome::Fail(failure),
        }
    }

    /// Appends an event.
    #[must_use]
    pub fn with_event(mut self, event: ProgressEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Appends several events.
    #[must_use]
    pub fn with_events(mut self, events: impl IntoIterator<Item = ProgressEvent>) -> Self {
        self.events.extend(events);
        self
    }

    /// Returns true if the outcome is `Fail`.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, StageOutcome::Fail(_))
    }
}

/// Collects a stage's delta together with the failure events that
/// accompany recorded errors.
#[derive(Debug)]
pub(crate) struct StageOutput {
    stage: StageKind,
    pub(crate) delta: StateDelta,
    pub(crate) events: Vec<ProgressEvent>,
}

impl StageOutput {
    pub(crate) fn new(stage: StageKind) -> Self {
        Self {
            stage,
            delta: StateDelta::new(),
            events: Vec::new(),
        }
    }

    /// Records a recoverable error, optionally tied to a section.
    pub(crate) fn recoverable(&mut self, section: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(stage = %self.stage, section = ?section, error = %message, "Recoverable stage error");
        let mut record = StageErrorRecord::recoverable(self.stage, message.clone());
        if let Some(section) = section {
            record = record.for_section(section);
        }
        self.delta.record_error(record);
        self.events.push(ProgressEvent::StageFailed {
            stage: self.stage,
            error: message,
            recoverable: true,
        });
    }

    pub(crate) fn ok(self) -> StageResult {
        StageResult::ok(self.delta).with_events(self.events)
    }

    pub(crate) fn skip_remaining(self, reason: impl Into<String>) -> StageResult {
        StageResult::skip_remaining(self.delta, reason).with_events(self.events)
    }

    pub(crate) fn fail(self, failure: StageFailure) -> StageResult {
        StageResult::fail(self.delta, failure).with_events(self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_result_constructors() {
        assert_eq!(StageResult::ok(StateDelta::new()).outcome, StageOutcome::Continue);
        assert!(matches!(
            StageResult::skip_remaining(StateDelta::new(), "nothing drafted").outcome,
            StageOutcome::SkipRemaining { .. }
        ));
        let failed = StageResult::fail(
            StateDelta::new(),
            StageFailure::unrecoverable(StageKind::Plan, "bad outline"),
        );
        assert!(failed.is_failure());
    }

    #[test]
    fn test_stage_output_records_error_and_event() {
        let mut output = StageOutput::new(StageKind::Write);
        output.recoverable(Some("intro"), "timed out");
        let result = output.ok();

        assert_eq!(result.delta.errors.len(), 1);
        assert_eq!(result.delta.errors[0].section_id.as_deref(), Some("intro"));
        assert_eq!(
            result.events,
            vec![ProgressEvent::StageFailed {
                stage: StageKind::Write,
                error: "timed out".to_string(),
                recoverable: true,
            }]
        );
    }
}
