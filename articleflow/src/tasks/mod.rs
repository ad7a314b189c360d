//! Task management for article executions.
//!
//! The [`TaskManager`] accepts topics, runs each one on its own tokio task
//! under a concurrency limit and keeps the outcome until it is retrieved or
//! expires.

mod execution;
mod manager;

pub use execution::{ExecutionSummary, TaskResult};
pub use manager::TaskManager;
