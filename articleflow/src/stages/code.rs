//! Code: generate examples for the `[CODE: id - description]` placeholders.

use super::parsing::{extract_json, str_field, strip_fences};
use super::result::StageOutput;
use super::{Stage, StageContext, StageResult};
use crate::core::StageKind;
use crate::errors::AdapterError;
use crate::state::{CodeBlock, Section, SectionContent, SectionDelta, SectionStatus, StateField};
use crate::templates::{names, TemplateVars};
use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::expect_used)]
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[CODE:\s*([\w.-]+?)\s*-\s+([^\]]+?)\s*\]").expect("code placeholder pattern is valid")
});

/// A code placeholder found in section prose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePlaceholder {
    /// Block id.
    pub id: String,
    /// What the example should show.
    pub description: String,
}

/// Finds the distinct placeholders in `text`, in order of appearance.
#[must_use]
pub fn find_placeholders(text: &str) -> Vec<CodePlaceholder> {
    let mut found: Vec<CodePlaceholder> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        let id = caps[1].to_string();
        if found.iter().any(|p| p.id == id) {
            continue;
        }
        found.push(CodePlaceholder {
            id,
            description: caps[2].to_string(),
        });
    }
    found
}

/// Replaces every placeholder using `replace(id)`.
pub fn replace_placeholders(text: &str, mut replace: impl FnMut(&str) -> String) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| replace(&caps[1]))
        .into_owned()
}

fn parse_block(response: &str, id: &str, default_language: &str) -> Option<CodeBlock> {
    let block = match extract_json(response) {
        Some(value) => CodeBlock {
            id: id.to_string(),
            language: str_field(&value, "language").unwrap_or(default_language).to_string(),
            code: strip_fences(str_field(&value, "code")?).to_string(),
            output: str_field(&value, "output").map(str::to_string),
            explanation: str_field(&value, "explanation").unwrap_or_default().to_string(),
        },
        None => CodeBlock {
            id: id.to_string(),
            language: default_language.to_string(),
            code: strip_fences(response).to_string(),
            output: None,
            explanation: String::new(),
        },
    };
    (!block.code.is_empty()).then_some(block)
}

/// Attaches code blocks to drafted sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeStage;

impl CodeStage {
    async fn code_section(
        &self,
        ctx: &StageContext<'_>,
        section: &Section,
        content: &SectionContent,
    ) -> Result<Vec<CodeBlock>, String> {
        let settings = &ctx.config().code;
        let audience = ctx.view().brief().map(|b| b.audience.to_string()).unwrap_or_default();
        let mut blocks = Vec::new();

        for placeholder in find_placeholders(&content.text) {
            if ctx.is_cancelled() {
                return Err("cancelled".to_string());
            }
            ctx.progress()
                .report(format!("Coding '{}' in '{}'", placeholder.id, section.title));
            let vars = TemplateVars::new()
                .text("language", settings.language.as_str())
                .text("section_title", section.title.as_str())
                .text("audience", audience.as_str())
                .text("description", placeholder.description.as_str())
                .text("section_text", content.text.as_str());
            let key = format!("code:{}:{}", section.id, placeholder.id);
            let response: Result<String, AdapterError> =
                ctx.generate(names::CODE, &vars, &settings.retry, &key, true).await;
            let response = response.map_err(|e| format!("example '{}' failed: {e}", placeholder.id))?;
            let block = parse_block(&response, &placeholder.id, &settings.language)
                .ok_or_else(|| format!("example '{}' came back empty", placeholder.id))?;
            blocks.push(block);
        }
        Ok(blocks)
    }
}

#[async_trait]
impl Stage for CodeStage {
    fn kind(&self) -> StageKind {
        StageKind::Code
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Outline, StateField::Sections, StateField::Brief]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let mut output = StageOutput::new(StageKind::Code);
        let (Ok(outline), Ok(sections)) = (ctx.view().outline(), ctx.view().sections()) else {
            output.recoverable(None, "code inputs are not readable");
            return output.ok();
        };

        let targets: Vec<(&Section, &SectionContent)> = outline
            .iter()
            .filter_map(|s| sections.get(&s.id).map(|c| (s, c)))
            .filter(|(_, c)| c.status == SectionStatus::Drafted)
            .collect();

        let runs: Vec<_> = targets
            .iter()
            .map(|(section, content)| self.code_section(ctx, section, content))
            .collect();
        let results = join_all(runs).await;

        for ((section, _), result) in targets.iter().zip(results) {
            match result {
                Ok(blocks) => output.delta.update_section(
                    section.id.as_str(),
                    SectionDelta::new()
                        .with_status(SectionStatus::Coded)
                        .with_code_blocks(blocks),
                ),
                Err(reason) if ctx.is_cancelled() => {
                    tracing::debug!(section = %section.id, reason = %reason, "Code generation interrupted");
                }
                Err(reason) => output.recoverable(Some(section.id.as_str()), reason),
            }
        }
        output.ok()
    }
}
