//! Read access to the article state restricted to declared fields.

use super::article::{
    ArticleBrief, ArticleMetadata, ArticleState, Asset, AssetId, Citation, ResearchNotes,
    ReviewReport, Section, SectionContent, SectionId, StageErrorRecord,
};
use crate::core::StageKind;
use crate::errors::UndeclaredFieldError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A readable part of the article state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    /// The topic string.
    Topic,
    /// Article type, audience, length and source material.
    Brief,
    /// Title and subtitle.
    Metadata,
    /// Research notes.
    Research,
    /// The outline.
    Outline,
    /// Section contents.
    Sections,
    /// Citations.
    Citations,
    /// Assets.
    Assets,
    /// The review report.
    Review,
    /// The error audit trail.
    Errors,
}

impl StateField {
    /// Every field.
    pub const ALL: &'static [Self] = &[
        Self::Topic,
        Self::Brief,
        Self::Metadata,
        Self::Research,
        Self::Outline,
        Self::Sections,
        Self::Citations,
        Self::Assets,
        Self::Review,
        Self::Errors,
    ];
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Topic => "topic",
            Self::Brief => "brief",
            Self::Metadata => "metadata",
            Self::Research => "research",
            Self::Outline => "outline",
            Self::Sections => "sections",
            Self::Citations => "citations",
            Self::Assets => "assets",
            Self::Review => "review",
            Self::Errors => "errors",
        };
        f.write_str(name)
    }
}

/// Immutable view of the state for one stage.
///
/// Reading a field the stage did not declare returns
/// [`UndeclaredFieldError`].
#[derive(Debug, Clone, Copy)]
pub struct ReadView<'a> {
    state: &'a ArticleState,
    stage: StageKind,
    declared: &'static [StateField],
}

impl<'a> ReadView<'a> {
    /// Creates a view for a stage.
    #[must_use]
    pub fn new(state: &'a ArticleState, stage: StageKind, declared: &'static [StateField]) -> Self {
        Self {
            state,
            stage,
            declared,
        }
    }

    /// The stage the view belongs to.
    #[must_use]
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// The fields this view may read.
    #[must_use]
    pub fn declared(&self) -> &'static [StateField] {
        self.declared
    }

    /// Returns true if the field was declared.
    #[must_use]
    pub fn can_read(&self, field: StateField) -> bool {
        self.declared.contains(&field)
    }

    fn check(&self, field: StateField) -> Result<&'a ArticleState, UndeclaredFieldError> {
        if self.can_read(field) {
            Ok(self.state)
        } else {
            Err(UndeclaredFieldError::new(self.stage, field))
        }
    }

    /// The topic.
    pub fn topic(&self) -> Result<&'a str, UndeclaredFieldError> {
        Ok(self.check(StateField::Topic)?.topic())
    }

    /// The brief.
    pub fn brief(&self) -> Result<&'a ArticleBrief, UndeclaredFieldError> {
        Ok(self.check(StateField::Brief)?.brief())
    }

    /// Title and subtitle.
    pub fn metadata(&self) -> Result<Option<&'a ArticleMetadata>, UndeclaredFieldError> {
        Ok(self.check(StateField::Metadata)?.metadata())
    }

    /// Research notes.
    pub fn research(&self) -> Result<Option<&'a ResearchNotes>, UndeclaredFieldError> {
        Ok(self.check(StateField::Research)?.research())
    }

    /// The outline.
    pub fn outline(&self) -> Result<&'a [Section], UndeclaredFieldError> {
        Ok(self.check(StateField::Outline)?.outline())
    }

    /// Section contents.
    pub fn sections(&self) -> Result<&'a BTreeMap<SectionId, SectionContent>, UndeclaredFieldError> {
        Ok(self.check(StateField::Sections)?.sections())
    }

    /// Citations.
    pub fn citations(&self) -> Result<&'a [Citation], UndeclaredFieldError> {
        Ok(self.check(StateField::Citations)?.citations())
    }

    /// Assets.
    pub fn assets(&self) -> Result<&'a BTreeMap<AssetId, Asset>, UndeclaredFieldError> {
        Ok(self.check(StateField::Assets)?.assets())
    }

    /// The review report.
    pub fn review(&self) -> Result<Option<&'a ReviewReport>, UndeclaredFieldError> {
        Ok(self.check(StateField::Review)?.review())
    }

    /// The error audit trail.
    pub fn errors(&self) -> Result<&'a [StageErrorRecord], UndeclaredFieldError> {
        Ok(self.check(StateField::Errors)?.errors())
    }
}
