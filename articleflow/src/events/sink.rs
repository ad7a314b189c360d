//! Event sink trait and implementations.

use super::{EventEnvelope, ProgressEvent};
use tracing::{debug, info, warn, Level};

/// Receives every envelope appended to a progress log.
///
/// Sinks are called synchronously while the log is appended to and must
/// not block.
pub trait EventSink: Send + Sync {
    /// Receives one envelope.
    fn emit(&self, envelope: &EventEnvelope);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _envelope: &EventEnvelope) {}
}

/// Mirrors progress events into `tracing`.
///
/// Failures and cancellations are logged at `WARN`. Everything else is
/// logged at the sink's level, so a `DEBUG` sink keeps per-section
/// progress out of `info` output.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::info()
    }
}

impl LoggingEventSink {
    /// Logs routine events at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Routine events at `DEBUG`.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Routine events at `INFO`.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn level_for(&self, event: &ProgressEvent) -> Level {
        match event {
            ProgressEvent::StageFailed { .. }
            | ProgressEvent::TaskFailed { .. }
            | ProgressEvent::TaskCancelled { .. } => Level::WARN,
            _ => self.level,
        }
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, envelope: &EventEnvelope) {
        let name = envelope.event.name();
        let stage = envelope.event.stage().map_or("-", |s| s.as_str());
        let task = envelope.task_id;
        let index = envelope.index;
        let level = self.level_for(&envelope.event);
        if level == Level::WARN {
            warn!(task_id = %task, index, stage, event = ?envelope.event, "{name}");
        } else if level >= Level::DEBUG {
            debug!(task_id = %task, index, stage, event = ?envelope.event, "{name}");
        } else {
            info!(task_id = %task, index, stage, "{name}");
        }
    }
}

/// A collecting event sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<EventEnvelope>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected envelopes.
    #[must_use]
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.read().clone()
    }

    /// Returns the number of collected envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the dotted names of the collected events.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.event.name()).collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, envelope: &EventEnvelope) {
        self.events.write().push(envelope.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StageKind, TaskId};

    fn envelope(index: usize, event: ProgressEvent) -> EventEnvelope {
        EventEnvelope::new(index, TaskId::new(), event)
    }

    #[test]
    fn test_failures_escalate_to_warn() {
        let sink = LoggingEventSink::debug();
        let failed = ProgressEvent::StageFailed {
            stage: StageKind::Code,
            error: "timeout".into(),
            recoverable: true,
        };
        assert_eq!(sink.level_for(&failed), Level::WARN);
        assert_eq!(
            sink.level_for(&ProgressEvent::TaskCancelled {
                reason: "stop".into()
            }),
            Level::WARN
        );
        assert_eq!(sink.level_for(&ProgressEvent::TaskStarted), Level::DEBUG);

        NoOpEventSink.emit(&envelope(0, ProgressEvent::TaskQueued));
        sink.emit(&envelope(1, failed));
        LoggingEventSink::default().emit(&envelope(
            2,
            ProgressEvent::StageStarted {
                stage: StageKind::Research,
            },
        ));
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&envelope(0, ProgressEvent::TaskQueued));
        sink.emit(&envelope(1, ProgressEvent::TaskStarted));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.names(), vec!["task.queued", "task.started"]);
    }
}
