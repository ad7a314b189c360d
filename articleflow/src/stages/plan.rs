//! Plan: turn research into an outline.

use super::parsing::{extract_json, slugify, str_field, string_list};
use super::result::StageOutput;
use super::{Stage, StageContext, StageResult};
use crate::config::ArticleType;
use crate::core::StageKind;
use crate::errors::StageFailure;
use crate::state::{ArticleMetadata, AssetKind, Citation, IllustrationRequest, Section, StateField};
use crate::templates::{names, TemplateVars};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

const NONE: &str = "none";

/// A parsed planner response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutline {
    /// Title and subtitle.
    pub metadata: ArticleMetadata,
    /// Outline sections in order.
    pub sections: Vec<Section>,
}

/// Parses a planner response.
///
/// The title falls back to `topic`. Section ids are slugified from the given
/// id or the title. At most `max_sections` sections are kept.
pub fn parse_outline(response: &str, topic: &str, max_sections: usize) -> Result<ParsedOutline, String> {
    let value = extract_json(response).ok_or_else(|| "response is not a JSON object".to_string())?;
    let entries = value
        .get("sections")
        .and_then(Value::as_array)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "outline has no sections".to_string())?;

    let mut seen = HashSet::new();
    let mut sections = Vec::with_capacity(entries.len().min(max_sections));
    for (n, entry) in entries.iter().take(max_sections).enumerate() {
        let title = str_field(entry, "title").ok_or_else(|| format!("section {} has no title", n + 1))?;
        let id = str_field(entry, "id")
            .map(slugify)
            .filter(|id| !id.is_empty())
            .or_else(|| Some(slugify(title)).filter(|id| !id.is_empty()))
            .unwrap_or_else(|| format!("section-{}", n + 1));
        if !seen.insert(id.clone()) {
            return Err(format!("duplicate section id '{id}'"));
        }

        let intent = str_field(entry, "intent")
            .or_else(|| str_field(entry, "description"))
            .unwrap_or_default();
        let mut section = Section::new(id, title, intent);
        section.illustration = parse_illustration(entry, title)?;
        section.code_examples = string_list(entry, "code_examples");
        sections.push(section);
    }

    Ok(ParsedOutline {
        metadata: ArticleMetadata {
            title: str_field(&value, "title").unwrap_or(topic).to_string(),
            subtitle: str_field(&value, "subtitle").unwrap_or_default().to_string(),
        },
        sections,
    })
}

fn parse_illustration(entry: &Value, title: &str) -> Result<Option<IllustrationRequest>, String> {
    let Some(request) = entry.get("illustration").filter(|v| v.is_object()) else {
        return Ok(None);
    };
    let kind = match str_field(request, "kind").or_else(|| str_field(request, "type")) {
        Some(k) if k.eq_ignore_ascii_case("diagram") => AssetKind::Diagram,
        Some(k) if k.eq_ignore_ascii_case("image") => AssetKind::Image,
        Some(other) => return Err(format!("section '{title}' has unknown illustration kind '{other}'")),
        None => return Ok(None),
    };
    Ok(Some(IllustrationRequest {
        kind,
        description: str_field(request, "description").unwrap_or(title).to_string(),
    }))
}

fn sources(citations: &[Citation]) -> Vec<String> {
    citations
        .iter()
        .map(|c| format!("{} ({})", c.title, c.url))
        .collect()
}

/// Produces the outline. Critical: a second malformed outline fails the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanStage;

#[async_trait]
impl Stage for PlanStage {
    fn kind(&self) -> StageKind {
        StageKind::Plan
    }

    fn reads(&self) -> &'static [StateField] {
        &[
            StateField::Topic,
            StateField::Brief,
            StateField::Research,
            StateField::Citations,
        ]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let mut output = StageOutput::new(StageKind::Plan);
        let view = ctx.view();
        let (topic, brief, research, citations) =
            match (view.topic(), view.brief(), view.research(), view.citations()) {
                (Ok(t), Ok(b), Ok(r), Ok(c)) => (t, b, r, c),
                _ => {
                    return output.fail(StageFailure::unrecoverable(
                        StageKind::Plan,
                        "plan inputs are not readable",
                    ))
                }
            };
        let settings = &ctx.config().plan;
        let section_count = brief.length.suggested_sections().min(settings.max_sections);

        let vars = TemplateVars::new()
            .text("topic", topic)
            .text("length", brief.length.to_string())
            .text("article_type", brief.article_type.to_string())
            .text("audience", brief.audience.to_string())
            .text(
                "background",
                research.map_or(NONE, |r| r.background.as_str()).trim(),
            )
            .list(
                "key_concepts",
                research.map(|r| r.key_concepts.clone()).unwrap_or_default(),
            )
            .list("sources", sources(citations))
            .text("source_material", brief.source_material.as_deref().unwrap_or(NONE))
            .number("section_count", section_count)
            .flag("include_code", brief.article_type != ArticleType::Explainer);

        ctx.progress().report(format!("Planning about {section_count} sections"));
        let response = match ctx
            .generate(names::PLAN, &vars, &settings.retry, "plan", true)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return output.fail(StageFailure::unrecoverable(
                    StageKind::Plan,
                    format!("outline generation failed: {e}"),
                ))
            }
        };

        let parsed = match parse_outline(&response, topic, settings.max_sections) {
            Ok(parsed) => parsed,
            Err(reason) => {
                output.recoverable(None, format!("malformed outline: {reason}"));
                ctx.progress().report("Retrying with a stricter outline prompt");
                let strict = vars.text("previous_error", reason);
                let retried = match ctx
                    .generate(names::PLAN_STRICT, &strict, &settings.retry, "plan:strict", true)
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        return output.fail(StageFailure::unrecoverable(
                            StageKind::Plan,
                            format!("outline generation failed: {e}"),
                        ))
                    }
                };
                match parse_outline(&retried, topic, settings.max_sections) {
                    Ok(parsed) => parsed,
                    Err(reason) => {
                        return output.fail(StageFailure::unrecoverable(
                            StageKind::Plan,
                            format!("malformed outline after retry: {reason}"),
                        ))
                    }
                }
            }
        };

        tracing::info!(sections = parsed.sections.len(), title = %parsed.metadata.title, "Outline planned");
        output.delta.metadata = Some(parsed.metadata);
        output.delta.outline = parsed.sections;
        output.ok()
    }
}
