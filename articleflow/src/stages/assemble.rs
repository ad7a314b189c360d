//! Assemble: render the final Markdown document.

use super::markdown::{render_document, DocumentParts};
use super::result::StageOutput;
use super::{Stage, StageContext, StageResult};
use crate::core::StageKind;
use crate::errors::{StageFailure, UndeclaredFieldError};
use crate::state::{ReadView, StateField};

/// Builds the document. Pure: never calls an adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleStage;

fn parts<'a>(view: &ReadView<'a>) -> Result<DocumentParts<'a>, UndeclaredFieldError> {
    Ok(DocumentParts {
        topic: view.topic()?,
        metadata: view.metadata()?,
        outline: view.outline()?,
        sections: view.sections()?,
        assets: view.assets()?,
        citations: view.citations()?,
    })
}

#[async_trait::async_trait]
impl Stage for AssembleStage {
    fn kind(&self) -> StageKind {
        StageKind::Assemble
    }

    fn reads(&self) -> &'static [StateField] {
        StateField::ALL
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let mut output = StageOutput::new(StageKind::Assemble);
        let parts = match parts(ctx.view()) {
            Ok(parts) => parts,
            Err(e) => return output.fail(StageFailure::unrecoverable(StageKind::Assemble, e.to_string())),
        };
        if parts.outline.is_empty() {
            return output.fail(StageFailure::unrecoverable(
                StageKind::Assemble,
                "outline is empty, nothing to assemble",
            ));
        }

        let document = render_document(&parts);
        ctx.progress().report(format!(
            "Assembled {} words across {} sections",
            document.word_count,
            parts.outline.len()
        ));
        if !document.gaps.is_empty() {
            tracing::warn!(gaps = ?document.gaps, "Document has empty sections");
        }

        output.delta.document = Some(document);
        output.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageOutcome;
    use crate::testing::{fixtures, ScriptedTextGenerator, StaticSearchProvider};

    #[tokio::test]
    async fn test_assemble_builds_document_without_adapters() {
        let text = ScriptedTextGenerator::new();
        let harness = fixtures::StageHarness::new(text.clone(), StaticSearchProvider::new());
        let state = fixtures::drafted_state("Redis basics", &[("Intro", "Hello there.")]);

        let result = harness.run(&AssembleStage, &state).await;

        assert_eq!(result.outcome, StageOutcome::Continue);
        let doc = result.delta.document.unwrap();
        assert!(doc.markdown.contains("## Intro"));
        assert!(doc.gaps.is_empty());
        assert_eq!(text.calls(), 0);
    }

    #[tokio::test]
    async fn test_assemble_fails_on_empty_outline() {
        let harness = fixtures::StageHarness::new(ScriptedTextGenerator::new(), StaticSearchProvider::new());

        let result = harness.run(&AssembleStage, &fixtures::empty_state("Redis basics")).await;

        assert!(matches!(result.outcome, StageOutcome::Fail(ref f) if !f.recoverable));
        assert!(result.delta.document.is_none());
    }
}
