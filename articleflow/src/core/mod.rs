//! Core domain types shared by every layer of the pipeline.
//!
//! This module contains:
//! - Stage kinds in pipeline order
//! - Execution lifecycle status
//! - Task identifiers

mod ids;
mod status;

pub use ids::TaskId;
pub use status::{ExecutionStatus, StageKind};
