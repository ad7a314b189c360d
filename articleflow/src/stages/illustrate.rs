//! Illustrate: diagrams and images for sections that asked for one.

use super::parsing::strip_fences;
use super::result::StageOutput;
use super::{Stage, StageContext, StageResult};
use crate::core::StageKind;
use crate::engine::with_retry;
use crate::state::{
    Asset, AssetKind, AssetSource, IllustrationRequest, Section, SectionDelta, SectionStatus,
    StateField,
};
use crate::templates::{names, TemplateVars};
use crate::utils::short_digest;
use async_trait::async_trait;
use futures::future::join_all;

/// Produces visual assets.
#[derive(Debug, Clone, Copy, Default)]
pub struct IllustrateStage;

impl IllustrateStage {
    async fn illustrate(
        &self,
        ctx: &StageContext<'_>,
        topic: &str,
        section: &Section,
        request: &IllustrationRequest,
    ) -> Result<Asset, String> {
        let settings = &ctx.config().illustration;
        let vars = TemplateVars::new()
            .text("topic", topic)
            .text("section_title", section.title.as_str())
            .text("description", request.description.as_str());
        ctx.progress()
            .report(format!("Creating {} for '{}'", request.kind, section.title));

        let source = match request.kind {
            AssetKind::Diagram => {
                let key = format!("illustrate:diagram:{}", section.id);
                let response = ctx
                    .generate(names::DIAGRAM, &vars, &settings.retry, &key, false)
                    .await
                    .map_err(|e| format!("diagram failed: {e}"))?;
                let source = strip_fences(&response);
                if source.is_empty() {
                    return Err("diagram came back empty".to_string());
                }
                AssetSource::Mermaid(source.to_string())
            }
            AssetKind::Image => {
                let prompt = ctx.render(names::IMAGE, &vars).map_err(|e| e.to_string())?;
                let key = format!("illustrate:image:{}", section.id);
                let image = with_retry(&settings.retry, &key, || {
                    ctx.adapters().generate_image(&prompt, &settings.image_style)
                })
                .await
                .map_err(|e| format!("image failed: {e}"))?;
                AssetSource::Url(image.url)
            }
        };

        let content = match &source {
            AssetSource::Mermaid(s) | AssetSource::Url(s) => s.as_str(),
        };
        Ok(Asset {
            id: short_digest(&[&request.kind.to_string(), &section.id, content]),
            kind: request.kind,
            section_id: section.id.clone(),
            description: request.description.clone(),
            source,
        })
    }
}

#[async_trait]
impl Stage for IllustrateStage {
    fn kind(&self) -> StageKind {
        StageKind::Illustrate
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Topic, StateField::Outline, StateField::Sections]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let mut output = StageOutput::new(StageKind::Illustrate);
        let view = ctx.view();
        let (Ok(topic), Ok(outline), Ok(sections)) = (view.topic(), view.outline(), view.sections())
        else {
            output.recoverable(None, "illustrate inputs are not readable");
            return output.ok();
        };

        let targets: Vec<&Section> = outline
            .iter()
            .filter(|s| {
                sections
                    .get(&s.id)
                    .is_some_and(|c| !c.is_blank() && c.status < SectionStatus::Illustrated)
            })
            .collect();

        let runs: Vec<_> = targets
            .iter()
            .map(|section| async move {
                match &section.illustration {
                    Some(request) if !ctx.is_cancelled() => {
                        Some(self.illustrate(ctx, topic, section, request).await)
                    }
                    _ => None,
                }
            })
            .collect();
        let results = join_all(runs).await;

        for (section, result) in targets.iter().zip(results) {
            let mut change = SectionDelta::new().with_status(SectionStatus::Illustrated);
            match result {
                Some(Ok(asset)) => {
                    change = change.with_illustration(asset.id.as_str());
                    output.delta.assets.push(asset);
                }
                Some(Err(reason)) => output.recoverable(Some(section.id.as_str()), reason),
                None if section.illustration.is_some() => continue,
                None => {}
            }
            output.delta.update_section(section.id.as_str(), change);
        }
        output.ok()
    }
}
