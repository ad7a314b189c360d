//! Review: score the draft and revise the sections it flags.

use super::parsing::{extract_json, str_field, strip_fences};
use super::result::StageOutput;
use super::{Stage, StageContext, StageResult};
use crate::core::StageKind;
use crate::state::{
    ReviewIssue, ReviewReport, Section, SectionContent, SectionDelta, SectionId, SectionStatus,
    StateField,
};
use crate::templates::{names, TemplateVars};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

const DEFAULT_SCORE: u8 = 80;

/// Parses a reviewer response. Missing fields default to an approving score.
pub fn parse_review(response: &str) -> Option<ReviewReport> {
    let value = extract_json(response)?;
    let score = value
        .get("score")
        .and_then(Value::as_f64)
        .map_or(DEFAULT_SCORE, |s| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let clamped = s.round().clamp(0.0, 100.0) as u8;
            clamped
        });
    let approved = value.get("approved").and_then(Value::as_bool).unwrap_or(true);
    let issues = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_issue).collect())
        .unwrap_or_default();

    Some(ReviewReport {
        score,
        approved,
        issues,
        revised_sections: Vec::new(),
    })
}

fn parse_issue(item: &Value) -> Option<ReviewIssue> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(ReviewIssue {
            section_id: None,
            description: s.trim().to_string(),
        }),
        Value::Object(_) => Some(ReviewIssue {
            section_id: str_field(item, "section_id")
                .or_else(|| str_field(item, "section"))
                .map(str::to_string),
            description: str_field(item, "description")?.to_string(),
        }),
        _ => None,
    }
}

fn render_article(outline: &[Section], sections: &BTreeMap<SectionId, SectionContent>) -> String {
    outline
        .iter()
        .filter_map(|s| {
            let content = sections.get(&s.id).filter(|c| !c.is_blank())?;
            Some(format!("## {} (id: {})\n\n{}", s.title, s.id, content.text.trim()))
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Reviews the article and applies bounded revisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewStage;

impl ReviewStage {
    async fn revise(
        &self,
        ctx: &StageContext<'_>,
        topic: &str,
        section: &Section,
        content: &SectionContent,
        issues: Vec<String>,
    ) -> Result<String, String> {
        let settings = &ctx.config().review;
        ctx.progress().report(format!("Revising '{}'", section.title));
        let vars = TemplateVars::new()
            .text("topic", topic)
            .text("section_title", section.title.as_str())
            .list("issues", issues)
            .text("section_text", content.text.as_str());
        let key = format!("review:revise:{}", section.id);
        let response = ctx
            .generate(names::REVISE, &vars, &settings.retry, &key, false)
            .await
            .map_err(|e| format!("revision of '{}' failed: {e}", section.id))?;
        let revised = strip_fences(&response);
        if revised.is_empty() {
            return Err(format!("revision of '{}' came back empty", section.id));
        }
        Ok(revised.to_string())
    }
}

#[async_trait]
impl Stage for ReviewStage {
    fn kind(&self) -> StageKind {
        StageKind::Review
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Topic, StateField::Outline, StateField::Sections]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let mut output = StageOutput::new(StageKind::Review);
        let view = ctx.view();
        let (Ok(topic), Ok(outline), Ok(sections)) = (view.topic(), view.outline(), view.sections())
        else {
            output.recoverable(None, "review inputs are not readable");
            return output.ok();
        };
        let settings = &ctx.config().review;

        let reviewable: Vec<(&Section, &SectionContent)> = outline
            .iter()
            .filter_map(|s| sections.get(&s.id).filter(|c| !c.is_blank()).map(|c| (s, c)))
            .collect();
        if reviewable.is_empty() {
            return output.ok();
        }

        let vars = TemplateVars::new()
            .text("topic", topic)
            .list("outline", outline.iter().map(|s| format!("{}: {}", s.id, s.title)))
            .text("article", render_article(outline, sections));
        ctx.progress().report("Reviewing the draft");
        let mut report = match ctx
            .generate(names::REVIEW, &vars, &settings.retry, "review", true)
            .await
        {
            Ok(response) => match parse_review(&response) {
                Some(report) => report,
                None => {
                    output.recoverable(None, "review response was not valid JSON");
                    return output.ok();
                }
            },
            Err(e) => {
                output.recoverable(None, format!("review failed: {e}"));
                return output.ok();
            }
        };
        tracing::info!(score = report.score, approved = report.approved, issues = report.issues.len(), "Draft reviewed");

        let mut revisions = Vec::new();
        if !report.approved {
            for (section, content) in &reviewable {
                if revisions.len() >= settings.max_revisions || ctx.is_cancelled() {
                    break;
                }
                let issues: Vec<String> = report
                    .issues
                    .iter()
                    .filter(|i| i.section_id.as_deref() == Some(section.id.as_str()))
                    .map(|i| i.description.clone())
                    .collect();
                if issues.is_empty() {
                    continue;
                }
                match self.revise(ctx, topic, section, content, issues).await {
                    Ok(text) => revisions.push((section.id.clone(), text)),
                    Err(reason) => output.recoverable(Some(section.id.as_str()), reason),
                }
            }
        }

        for (section, _) in &reviewable {
            output.delta.update_section(
                section.id.as_str(),
                SectionDelta::new().with_status(SectionStatus::Reviewed),
            );
        }
        for (id, text) in revisions {
            report.revised_sections.push(id.clone());
            output
                .delta
                .update_section(id, SectionDelta::new().with_text(text));
        }
        output.delta.review = Some(report);
        output.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AdapterError;
    use crate::stages::StageOutcome;
    use crate::testing::{fixtures, ScriptedTextGenerator, StaticSearchProvider};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_review_defaults_and_issues() {
        let report = parse_review(
            r#"{"score": 64.6, "approved": false, "issues": ["too short", {"section": "usage", "description": "missing TTL"}, {"section_id": "x"}]}"#,
        )
        .unwrap();
        assert_eq!(report.score, 65);
        assert!(!report.approved);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[1].section_id.as_deref(), Some("usage"));

        let lenient = parse_review("{}").unwrap();
        assert_eq!(lenient.score, DEFAULT_SCORE);
        assert!(lenient.approved);
        assert!(parse_review("great article!").is_none());
    }

    #[tokio::test]
    async fn test_review_approves_and_marks_reviewed() {
        let text = ScriptedTextGenerator::new().respond(names::REVIEW, r#"{"score": 91, "approved": true, "issues": []}"#);
        let harness = fixtures::StageHarness::new(text, StaticSearchProvider::new());
        let state = fixtures::drafted_state("Redis basics", &[("Intro", "Hello."), ("Usage", "Use it.")]);

        let result = harness.run(&ReviewStage, &state).await;

        assert_eq!(result.outcome, StageOutcome::Continue);
        assert_eq!(result.delta.review.as_ref().unwrap().score, 91);
        assert!(result
            .delta
            .sections
            .values()
            .all(|s| s.status == Some(SectionStatus::Reviewed) && s.text.is_none()));
    }

    #[tokio::test]
    async fn test_review_revises_flagged_sections() {
        let text = ScriptedTextGenerator::new()
            .respond(
                names::REVIEW,
                r#"{"score": 55, "approved": false, "issues": [{"section_id": "usage", "description": "explain TTL"}]}"#,
            )
            .respond(names::REVISE, "Use it, and set a TTL.");
        let harness = fixtures::StageHarness::new(text, StaticSearchProvider::new());
        let state = fixtures::drafted_state("Redis basics", &[("Intro", "Hello."), ("Usage", "Use it.")]);

        let result = harness.run(&ReviewStage, &state).await;

        let usage = &result.delta.sections["usage"];
        assert_eq!(usage.text.as_deref(), Some("Use it, and set a TTL."));
        assert_eq!(usage.status, Some(SectionStatus::Reviewed));
        assert_eq!(result.delta.review.unwrap().revised_sections, vec!["usage"]);
    }

    #[tokio::test]
    async fn test_review_failure_changes_nothing() {
        let text = ScriptedTextGenerator::new().fail(names::REVIEW, AdapterError::permanent("text", "down"));
        let harness = fixtures::StageHarness::new(text, StaticSearchProvider::new());
        let state = fixtures::drafted_state("Redis basics", &[("Intro", "Hello.")]);

        let result = harness.run(&ReviewStage, &state).await;

        assert!(result.delta.sections.is_empty());
        assert!(result.delta.review.is_none());
        assert_eq!(result.delta.errors.len(), 1);
    }
}
