//! The shared article state and its merge contract.
//!
//! Stages never mutate [`ArticleState`] directly: they read through a
//! [`ReadView`] and return a [`StateDelta`] which the engine applies.

mod article;
mod delta;
mod snapshot;
mod view;

pub use article::{
    ArticleBrief, ArticleMetadata, ArticleState, Asset, AssetId, AssetKind, AssetSource,
    AssembledDocument, Citation, CodeBlock, IllustrationRequest, ResearchNotes, ReviewIssue,
    ReviewReport, Section, SectionContent, SectionId, SectionStatus, StageErrorRecord,
};
pub use delta::{DeltaSummary, SectionDelta, StateDelta};
pub use snapshot::ArticleSnapshot;
pub use view::{ReadView, StateField};
