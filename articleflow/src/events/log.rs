//! Replayable per-task progress log.

use super::{EventEnvelope, EventSink, ProgressEvent};
use crate::core::TaskId;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Append-only event log for one task.
///
/// Every appended event is retained for the task's lifetime, so late
/// subscribers can replay from any index. The log closes after a terminal
/// event; later appends are dropped.
pub struct ProgressLog {
    task_id: TaskId,
    events: RwLock<Vec<EventEnvelope>>,
    closed: AtomicBool,
    len_tx: watch::Sender<usize>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ProgressLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressLog")
            .field("task_id", &self.task_id)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ProgressLog {
    /// Creates an empty log that mirrors events to `sink`.
    #[must_use]
    pub fn new(task_id: TaskId, sink: Arc<dyn EventSink>) -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            task_id,
            events: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            len_tx,
            sink,
        }
    }

    /// The task the log belongs to.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Appends an event and returns its index.
    ///
    /// Returns `None` if the log was already closed.
    pub fn append(&self, event: ProgressEvent) -> Option<usize> {
        let envelope = {
            let mut events = self.events.write();
            if self.closed.load(Ordering::SeqCst) {
                tracing::warn!(
                    task_id = %self.task_id,
                    event = event.name(),
                    "Dropping event appended after terminal event"
                );
                return None;
            }
            let envelope = EventEnvelope::new(events.len(), self.task_id, event);
            if envelope.event.is_terminal() {
                self.closed.store(true, Ordering::SeqCst);
            }
            events.push(envelope.clone());
            envelope
        };

        self.sink.emit(&envelope);
        self.len_tx.send_replace(envelope.index + 1);
        Some(envelope.index)
    }

    /// Appends several events in order.
    pub fn extend(&self, events: impl IntoIterator<Item = ProgressEvent>) {
        for event in events {
            self.append(event);
        }
    }

    /// Number of events appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events were appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns true once a terminal event was appended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the event at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<EventEnvelope> {
        self.events.read().get(index).cloned()
    }

    /// Returns every event with an index of at least `index`.
    #[must_use]
    pub fn events_since(&self, index: usize) -> Vec<EventEnvelope> {
        self.events
            .read()
            .get(index..)
            .map(<[EventEnvelope]>::to_vec)
            .unwrap_or_default()
    }

    /// Returns the most recent event.
    #[must_use]
    pub fn last(&self) -> Option<EventEnvelope> {
        self.events.read().last().cloned()
    }

    /// Streams events from `from` onward, live.
    ///
    /// The stream replays stored events first, then yields new ones as they
    /// are appended, and ends after the terminal event.
    pub fn subscribe(self: &Arc<Self>, from: usize) -> BoxStream<'static, EventEnvelope> {
        let rx = self.len_tx.subscribe();
        stream::unfold(
            (Arc::clone(self), rx, from),
            |(log, mut rx, next)| async move {
                loop {
                    if let Some(envelope) = log.get(next) {
                        return Some((envelope, (log, rx, next + 1)));
                    }
                    if log.is_closed() {
                        return None;
                    }
                    if rx.changed().await.is_err() {
                        return None;
                    }
                }
            },
        )
        .boxed()
    }

    /// Waits until a terminal event is appended and returns it.
    pub async fn closed(&self) -> Option<EventEnvelope> {
        let mut rx = self.len_tx.subscribe();
        while !self.is_closed() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.last().filter(|e| e.event.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use crate::events::{CollectingEventSink, NoOpEventSink};
    use pretty_assertions::assert_eq;
    use std::task::Poll;
    use tokio_test::task;

    fn log() -> Arc<ProgressLog> {
        Arc::new(ProgressLog::new(TaskId::new(), Arc::new(NoOpEventSink)))
    }

    fn started(stage: StageKind) -> ProgressEvent {
        ProgressEvent::StageStarted { stage }
    }

    #[test]
    fn test_append_assigns_sequential_indices() {
        let log = log();
        assert_eq!(log.append(ProgressEvent::TaskQueued), Some(0));
        assert_eq!(log.append(ProgressEvent::TaskStarted), Some(1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(1).unwrap().event, ProgressEvent::TaskStarted);
    }

    #[test]
    fn test_events_since_replays_tail() {
        let log = log();
        log.extend([
            ProgressEvent::TaskQueued,
            ProgressEvent::TaskStarted,
            started(StageKind::Research),
        ]);

        let tail: Vec<_> = log.events_since(1).into_iter().map(|e| e.index).collect();
        assert_eq!(tail, vec![1, 2]);
        assert!(log.events_since(10).is_empty());
    }

    #[test]
    fn test_appends_after_terminal_event_are_dropped() {
        let log = log();
        log.append(ProgressEvent::TaskCompleted { incomplete: false });
        assert!(log.is_closed());
        assert_eq!(log.append(ProgressEvent::TaskStarted), None);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_sink_receives_every_event() {
        let sink = Arc::new(CollectingEventSink::new());
        let log = ProgressLog::new(TaskId::new(), sink.clone());
        log.extend([ProgressEvent::TaskQueued, ProgressEvent::TaskStarted]);
        assert_eq!(sink.names(), vec!["task.queued", "task.started"]);
    }

    #[test]
    fn test_subscribe_yields_live_events_and_ends_after_terminal() {
        let log = log();
        log.append(ProgressEvent::TaskQueued);

        let mut sub = task::spawn(log.subscribe(0));
        match sub.poll_next() {
            Poll::Ready(Some(envelope)) => assert_eq!(envelope.index, 0),
            other => panic!("expected replayed event, got {other:?}"),
        }
        assert!(sub.poll_next().is_pending());

        log.append(ProgressEvent::TaskStarted);
        assert!(sub.is_woken());
        match sub.poll_next() {
            Poll::Ready(Some(envelope)) => assert_eq!(envelope.event, ProgressEvent::TaskStarted),
            other => panic!("expected live event, got {other:?}"),
        }

        log.append(ProgressEvent::TaskCancelled {
            reason: "user".to_string(),
        });
        assert!(matches!(sub.poll_next(), Poll::Ready(Some(_))));
        assert!(matches!(sub.poll_next(), Poll::Ready(None)));
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_from_index() {
        let log = log();
        log.extend([
            ProgressEvent::TaskQueued,
            ProgressEvent::TaskStarted,
            started(StageKind::Plan),
            ProgressEvent::TaskCompleted { incomplete: false },
        ]);

        let replayed: Vec<_> = log.subscribe(2).map(|e| e.index).collect().await;
        assert_eq!(replayed, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_closed_waits_for_terminal_event() {
        let log = log();
        let waiter = {
            let log = Arc::clone(&log);
            tokio::spawn(async move { log.closed().await })
        };

        log.append(ProgressEvent::TaskStarted);
        log.append(ProgressEvent::TaskFailed {
            stage: StageKind::Plan,
            reason: "bad outline".to_string(),
        });

        let terminal = waiter.await.unwrap().unwrap();
        assert_eq!(terminal.index, 1);
        assert!(terminal.event.is_terminal());
    }
}
