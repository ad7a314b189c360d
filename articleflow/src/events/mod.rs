//! Progress events and the per-task replayable log.
//!
//! Every task owns one [`ProgressLog`]. Events are appended by the engine,
//! mirrored to an [`EventSink`] and kept for replay until the task is reaped.

mod log;
mod progress;
mod sink;

pub use log::ProgressLog;
pub use progress::{EventEnvelope, ProgressEvent};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
