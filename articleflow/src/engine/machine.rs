//! The explicit stage state machine.

use crate::core::StageKind;
use thiserror::Error;

/// Where an execution is in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineState {
    /// Not started.
    Idle,
    /// Running the stage at this index of [`StageKind::ALL`].
    Running(usize),
    /// Assemble finished.
    Completed,
    /// A critical stage failed.
    Failed {
        /// The failing stage.
        stage: StageKind,
        /// Why.
        reason: String,
    },
    /// Cancelled by the caller.
    Cancelled {
        /// Cancellation reason.
        reason: String,
    },
}

impl MachineState {
    /// Returns true if no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// An input to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Start, or move to the next stage.
    Continue,
    /// Jump to Assemble.
    SkipToAssemble,
    /// Stop with a failure.
    Fail {
        /// The failing stage.
        stage: StageKind,
        /// Why.
        reason: String,
    },
    /// Stop because the caller cancelled.
    Cancel {
        /// Cancellation reason.
        reason: String,
    },
}

/// A step that is not valid in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition {step:?} from {from:?}")]
pub struct InvalidTransition {
    /// The state the machine was in.
    pub from: MachineState,
    /// The rejected step.
    pub step: Step,
}

/// Drives an execution through `Research -> ... -> Assemble`.
#[derive(Debug, Clone)]
pub struct StageMachine {
    state: MachineState,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    /// Creates an idle machine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: MachineState::Idle,
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// The stage that should run now, if any.
    #[must_use]
    pub fn current(&self) -> Option<StageKind> {
        match self.state {
            MachineState::Running(index) => StageKind::ALL.get(index).copied(),
            _ => None,
        }
    }

    /// Returns true once the machine reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies a step and returns the new state.
    pub fn step(&mut self, step: Step) -> Result<&MachineState, InvalidTransition> {
        let assemble = StageKind::Assemble.index();
        let next = match (&self.state, &step) {
            (MachineState::Idle, Step::Continue) => Some(MachineState::Running(0)),
            (MachineState::Running(i), Step::Continue) if *i >= assemble => Some(MachineState::Completed),
            (MachineState::Running(i), Step::Continue) => Some(MachineState::Running(i + 1)),
            (MachineState::Running(i), Step::SkipToAssemble) if *i < assemble => {
                Some(MachineState::Running(assemble))
            }
            (MachineState::Running(_), Step::Fail { stage, reason }) => Some(MachineState::Failed {
                stage: *stage,
                reason: reason.clone(),
            }),
            (MachineState::Idle | MachineState::Running(_), Step::Cancel { reason }) => {
                Some(MachineState::Cancelled {
                    reason: reason.clone(),
                })
            }
            _ => None,
        };
        let Some(next) = next else {
            return Err(InvalidTransition {
                from: self.state.clone(),
                step,
            });
        };
        tracing::trace!(from = ?self.state, to = ?next, "Stage machine transition");
        self.state = next;
        Ok(&self.state)
    }
}
