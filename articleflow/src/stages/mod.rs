//! Stage trait and the seven article stages.
//!
//! A stage reads the state through the [`ReadView`](crate::state::ReadView)
//! in its [`StageContext`] and proposes changes as a
//! [`StateDelta`](crate::state::StateDelta). Only the engine writes.

mod assemble;
mod code;
mod context;
mod illustrate;
mod markdown;
pub mod parsing;
mod plan;
mod research;
mod result;
mod review;
mod write;

pub use assemble::AssembleStage;
pub use code::{find_placeholders, replace_placeholders, CodePlaceholder, CodeStage};
pub use context::{ProgressReporter, StageContext};
pub use illustrate::IllustrateStage;
pub use markdown::{normalize_spacing, render_document, DocumentParts};
pub use plan::{parse_outline, ParsedOutline, PlanStage};
pub use research::{dedupe_hits, ResearchStage};
pub use result::{StageOutcome, StageResult};
pub use review::{parse_review, ReviewStage};
pub use write::WriteStage;

use crate::core::StageKind;
use crate::state::StateField;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// One step of the article pipeline.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Which pipeline slot the stage fills.
    fn kind(&self) -> StageKind;

    /// State fields the stage may read.
    fn reads(&self) -> &'static [StateField];

    /// Executes the stage.
    ///
    /// Failures are reported through [`StageResult::outcome`] and recorded
    /// errors, never by panicking.
    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult;
}

/// The built-in stages in pipeline order.
#[must_use]
pub fn default_stages() -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(ResearchStage),
        Arc::new(PlanStage),
        Arc::new(WriteStage),
        Arc::new(CodeStage),
        Arc::new(IllustrateStage),
        Arc::new(ReviewStage),
        Arc::new(AssembleStage),
    ]
}
