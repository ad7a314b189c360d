//! Pipeline execution: the stage state machine, retry policy and the
//! workflow engine that ties them together.

mod machine;
mod retry;
mod workflow;

pub use machine::{InvalidTransition, MachineState, StageMachine, Step};
pub use retry::{with_retry, Backoff, BackoffStrategy, JitterStrategy, RetryConfig};
pub use workflow::{EngineOutcome, WorkflowEngine};
