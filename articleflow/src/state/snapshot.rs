//! Immutable shared snapshots of the article state.

use super::article::ArticleState;
use serde::{Serialize, Serializer};
use std::ops::Deref;
use std::sync::Arc;

/// A frozen copy of an [`ArticleState`].
///
/// Cloning is cheap; every clone shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSnapshot(Arc<ArticleState>);

impl ArticleSnapshot {
    /// Freezes a state.
    #[must_use]
    pub fn new(state: ArticleState) -> Self {
        Self(Arc::new(state))
    }

    /// Returns a mutable copy of the frozen state.
    #[must_use]
    pub fn to_state(&self) -> ArticleState {
        (*self.0).clone()
    }

    /// Returns true if both snapshots share one allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ArticleSnapshot {
    type Target = ArticleState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<ArticleState> for ArticleSnapshot {
    fn from(state: ArticleState) -> Self {
        Self::new(state)
    }
}

impl Serialize for ArticleSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ArticleBrief, Section, StateDelta};

    #[test]
    fn test_snapshot_is_detached_from_state() {
        let mut state = ArticleState::new("Redis basics", ArticleBrief::default());
        let snapshot = state.snapshot();

        state
            .apply_delta(&StateDelta::new().with_section(Section::new("intro", "Intro", "i")))
            .unwrap();

        assert!(snapshot.outline().is_empty());
        assert_eq!(state.outline().len(), 1);
    }

    #[test]
    fn test_snapshot_clones_share_allocation() {
        let snapshot = ArticleState::new("t", ArticleBrief::default()).snapshot();
        let clone = snapshot.clone();
        assert!(snapshot.ptr_eq(&clone));
        assert_eq!(clone.topic(), "t");
    }

    #[test]
    fn test_snapshot_serializes_as_state() {
        let state = ArticleState::new("t", ArticleBrief::default());
        let snapshot = state.snapshot();
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            serde_json::to_value(&state).unwrap()
        );
    }
}
