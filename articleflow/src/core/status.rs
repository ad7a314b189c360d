//! Stage kind and execution status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the seven pipeline stages.
///
/// The declaration order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Web research and citation gathering.
    Research,
    /// Outline planning.
    Plan,
    /// Per-section prose drafting.
    Write,
    /// Code example generation.
    Code,
    /// Diagrams and images.
    Illustrate,
    /// Quality review and revision.
    Review,
    /// Final document assembly.
    Assemble,
}

impl StageKind {
    /// All stages in pipeline order.
    pub const ALL: [Self; 7] = [
        Self::Research,
        Self::Plan,
        Self::Write,
        Self::Code,
        Self::Illustrate,
        Self::Review,
        Self::Assemble,
    ];

    /// Returns the stage name used in events and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Plan => "plan",
            Self::Write => "write",
            Self::Code => "code",
            Self::Illustrate => "illustrate",
            Self::Review => "review",
            Self::Assemble => "assemble",
        }
    }

    /// Returns true if a failure of this stage aborts the whole execution.
    ///
    /// Nothing downstream can run without an outline, and an article that
    /// cannot be assembled has no deliverable.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::Plan | Self::Assemble)
    }

    /// Returns the position of the stage in the pipeline.
    #[must_use]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Submitted, waiting for a worker slot.
    #[default]
    Queued,
    /// Stages are running.
    Running,
    /// All stages finished and the document was assembled.
    Succeeded,
    /// A critical stage failed.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ExecutionStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the result is partial.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_index() {
        for (i, stage) in StageKind::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
        assert!(StageKind::Research < StageKind::Assemble);
    }

    #[test]
    fn test_critical_stages() {
        let critical: Vec<_> = StageKind::ALL.iter().filter(|s| s.is_critical()).collect();
        assert_eq!(critical, vec![&StageKind::Plan, &StageKind::Assemble]);
    }

    #[test]
    fn test_stage_kind_serialize() {
        let json = serde_json::to_string(&StageKind::Illustrate).unwrap();
        assert_eq!(json, r#""illustrate""#);
        assert_eq!(StageKind::Illustrate.to_string(), "illustrate");
    }

    #[test]
    fn test_execution_status_is_terminal() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_execution_status_incomplete() {
        assert!(ExecutionStatus::Failed.is_incomplete());
        assert!(!ExecutionStatus::Succeeded.is_incomplete());
    }
}
