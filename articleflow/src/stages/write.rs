//! Write: draft prose for every empty section, then deepen the vague ones.

use super::parsing::{extract_json, str_field, strip_fences};
use super::result::StageOutput;
use super::{Stage, StageContext, StageResult};
use crate::core::StageKind;
use crate::errors::AdapterError;
use crate::state::{Citation, Section, SectionDelta, SectionStatus, StateField};
use crate::templates::{names, TemplateVars};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

const MIN_SECTION_WORDS: usize = 150;

/// One section to draft, with its neighbours for continuity.
#[derive(Debug)]
struct Job<'a> {
    section: &'a Section,
    previous: Option<&'a str>,
    next: Option<&'a str>,
}

enum Drafted {
    Text(String),
    Skipped,
    Failed(String),
}

/// The questioner's verdict on one drafted section.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DepthCheck {
    score: Option<u64>,
    vague_points: Vec<String>,
}

impl DepthCheck {
    fn needs_deepening(&self) -> bool {
        !self.vague_points.is_empty()
    }
}

fn describe_vague_point(item: &Value) -> Option<String> {
    if let Value::String(text) = item {
        let text = text.trim();
        return (!text.is_empty()).then(|| text.to_string());
    }
    let question = str_field(item, "question").or_else(|| str_field(item, "issue"))?;
    let mut line = question.to_string();
    if let Some(location) = str_field(item, "location") {
        line.push_str(&format!(" (near \"{location}\")"));
    }
    if let Some(suggestion) = str_field(item, "suggestion") {
        line.push_str(&format!(" Add: {suggestion}"));
    }
    Some(line)
}

/// Parses `{is_detailed_enough, depth_score, vague_points}`.
///
/// A section judged detailed enough has no vague points, whatever else the
/// reply lists.
fn parse_depth_check(response: &str) -> Option<DepthCheck> {
    let value = extract_json(response)?;
    let points: Vec<String> = value
        .get("vague_points")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(describe_vague_point).collect())
        .unwrap_or_default();
    let detailed = value
        .get("is_detailed_enough")
        .and_then(Value::as_bool)
        .unwrap_or(points.is_empty());
    Some(DepthCheck {
        score: value.get("depth_score").and_then(Value::as_u64),
        vague_points: if detailed { Vec::new() } else { points },
    })
}

/// Returns the urls of citations that appear in `text`.
fn cited_urls(text: &str, citations: &[Citation]) -> Vec<String> {
    citations
        .iter()
        .filter(|c| text.contains(c.url.as_str()))
        .map(|c| c.url.clone())
        .collect()
}

/// Drafts section prose with bounded concurrency.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteStage;

impl WriteStage {
    async fn draft(&self, ctx: &StageContext<'_>, job: &Job<'_>, base: &TemplateVars) -> Drafted {
        if ctx.is_cancelled() {
            return Drafted::Skipped;
        }
        let section = job.section;
        ctx.progress().report(format!("Drafting '{}'", section.title));

        let vars = base
            .clone()
            .text("section_title", section.title.as_str())
            .text("section_intent", section.intent.as_str())
            .text("previous_section", job.previous.unwrap_or("none, this is the opening"))
            .text("next_section", job.next.unwrap_or("none, this is the closing"))
            .list("code_examples", section.code_examples.iter().map(String::as_str));
        let key = format!("write:{}", section.id);

        let result: Result<String, AdapterError> = ctx
            .generate(names::WRITE, &vars, &ctx.config().write.retry, &key, false)
            .await;
        match result {
            Ok(text) => {
                let text = strip_fences(&text);
                if text.is_empty() {
                    Drafted::Failed("model returned no text".to_string())
                } else {
                    Drafted::Text(text.to_string())
                }
            }
            Err(e) => Drafted::Failed(e.to_string()),
        }
    }

    async fn question(
        &self,
        ctx: &StageContext<'_>,
        base: &TemplateVars,
        section: &Section,
        text: &str,
    ) -> Result<DepthCheck, String> {
        let vars = base
            .clone()
            .text("section_title", section.title.as_str())
            .text("section_text", text);
        let key = format!("write:question:{}", section.id);
        let response = ctx
            .generate(names::QUESTION, &vars, &ctx.config().write.retry, &key, true)
            .await
            .map_err(|e| e.to_string())?;
        let check = parse_depth_check(&response).ok_or_else(|| "unreadable depth check".to_string())?;
        tracing::debug!(
            section = %section.id,
            score = ?check.score,
            vague = check.vague_points.len(),
            "Depth checked"
        );
        Ok(check)
    }

    async fn deepen(
        &self,
        ctx: &StageContext<'_>,
        base: &TemplateVars,
        section: &Section,
        text: &str,
        vague_points: &[String],
        round: usize,
    ) -> Result<String, String> {
        ctx.progress()
            .report(format!("Deepening '{}' (round {round})", section.title));
        let vars = base
            .clone()
            .text("section_title", section.title.as_str())
            .text("section_text", text)
            .list("vague_points", vague_points.iter().map(String::as_str));
        let key = format!("write:deepen:{}", section.id);
        let response = ctx
            .generate(names::DEEPEN, &vars, &ctx.config().write.retry, &key, false)
            .await
            .map_err(|e| e.to_string())?;
        let deepened = strip_fences(&response);
        if deepened.is_empty() {
            return Err("model returned no text".to_string());
        }
        Ok(deepened.to_string())
    }

    /// Questions each draft and rewrites the vague ones, for at most
    /// `max_questioning_rounds` rounds. Only sections rewritten in a round
    /// are questioned again. Failures keep the previous text.
    async fn deepen_drafts(
        &self,
        ctx: &StageContext<'_>,
        base: &TemplateVars,
        drafts: &mut [(&Section, String)],
        output: &mut StageOutput,
    ) {
        let settings = &ctx.config().write;
        let concurrency = settings.concurrency.max(1);
        let mut pending: Vec<usize> = (0..drafts.len()).collect();

        for round in 1..=settings.max_questioning_rounds {
            if pending.is_empty() || ctx.is_cancelled() {
                break;
            }
            let current: &[(&Section, String)] = &*drafts;
            let questions: Vec<_> = pending
                .iter()
                .map(|&i| self.question(ctx, base, current[i].0, &current[i].1))
                .collect();
            let checks: Vec<_> = stream::iter(questions)
                .buffered(concurrency)
            .collect()
            .await;

            let mut flagged = Vec::new();
            for (&i, check) in pending.iter().zip(checks) {
                let id = current[i].0.id.as_str();
                match check {
                    Ok(check) if check.needs_deepening() => flagged.push((i, check.vague_points)),
                    Ok(_) => {}
                    Err(reason) => {
                        output.recoverable(Some(id), format!("questioning '{id}' failed: {reason}"));
                    }
                }
            }
            if flagged.is_empty() || ctx.is_cancelled() {
                break;
            }

            let deepenings: Vec<_> = flagged
                .iter()
                .map(|(i, points)| {
                    self.deepen(ctx, base, current[*i].0, &current[*i].1, points, round)
                })
                .collect();
            let rewrites: Vec<_> = stream::iter(deepenings)
                .buffered(concurrency)
            .collect()
            .await;

            pending.clear();
            for ((i, _), rewrite) in flagged.iter().zip(rewrites) {
                let section = drafts[*i].0;
                match rewrite {
                    Ok(text) => {
                        drafts[*i].1 = text;
                        pending.push(*i);
                    }
                    Err(reason) => output.recoverable(
                        Some(section.id.as_str()),
                        format!("deepening '{}' failed: {reason}", section.id),
                    ),
                }
            }
            tracing::info!(round, deepened = pending.len(), "Deepening round finished");
        }
    }
}

#[async_trait]
impl Stage for WriteStage {
    fn kind(&self) -> StageKind {
        StageKind::Write
    }

    fn reads(&self) -> &'static [StateField] {
        &[
            StateField::Topic,
            StateField::Brief,
            StateField::Outline,
            StateField::Sections,
            StateField::Research,
            StateField::Citations,
        ]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let mut output = StageOutput::new(StageKind::Write);
        let view = ctx.view();
        let (Ok(topic), Ok(brief), Ok(outline), Ok(sections), Ok(research), Ok(citations)) = (
            view.topic(),
            view.brief(),
            view.outline(),
            view.sections(),
            view.research(),
            view.citations(),
        ) else {
            output.recoverable(None, "write inputs are not readable");
            return output.skip_remaining("nothing could be drafted");
        };

        let jobs: Vec<Job<'_>> = outline
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                sections
                    .get(&s.id)
                    .map_or(true, |c| c.status == SectionStatus::Empty)
            })
            .map(|(i, section)| Job {
                section,
                previous: i.checked_sub(1).map(|p| outline[p].title.as_str()),
                next: outline.get(i + 1).map(|n| n.title.as_str()),
            })
            .collect();
        if jobs.is_empty() {
            return output.ok();
        }

        let target_words = (brief.length.target_words() / outline.len().max(1)).max(MIN_SECTION_WORDS);
        let base = TemplateVars::new()
            .text("topic", topic)
            .text("audience", brief.audience.to_string())
            .text("background", research.map_or("", |r| r.background.as_str()))
            .list(
                "sources",
                citations.iter().map(|c| format!("[{}]({})", c.title, c.url)),
            )
            .number("target_words", target_words);

        let concurrency = ctx.config().write.concurrency.max(1);
        let drafts: Vec<_> = jobs.iter().map(|job| self.draft(ctx, job, &base)).collect();
        let results: Vec<Drafted> = stream::iter(drafts)
            .buffered(concurrency)
            .collect()
            .await;

        let mut drafts: Vec<(&Section, String)> = Vec::new();
        let mut failed = 0;
        for (job, result) in jobs.iter().zip(results) {
            let id = job.section.id.as_str();
            match result {
                Drafted::Text(text) => drafts.push((job.section, text)),
                Drafted::Failed(reason) => {
                    output.recoverable(Some(id), format!("drafting '{id}' failed: {reason}"));
                    failed += 1;
                }
                Drafted::Skipped => {}
            }
        }

        tracing::info!(drafted = drafts.len(), failed, "Sections drafted");
        if drafts.is_empty() && failed > 0 {
            return output.skip_remaining("every section failed to draft");
        }

        self.deepen_drafts(ctx, &base, &mut drafts, &mut output).await;

        for (section, text) in drafts {
            let mut change = SectionDelta::new().with_status(SectionStatus::Drafted);
            for url in cited_urls(&text, citations) {
                change = change.with_citation(url);
            }
            output
                .delta
                .update_section(section.id.as_str(), change.with_text(text));
        }
        output.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageOutcome;
    use crate::testing::{fixtures, ScriptedTextGenerator, StaticSearchProvider};
    use pretty_assertions::assert_eq;

    const DETAILED: &str = r#"{"is_detailed_enough": true, "depth_score": 92, "vague_points": []}"#;
    const VAGUE: &str = r#"{
        "is_detailed_enough": false,
        "depth_score": 40,
        "vague_points": [{
            "location": "keeps data in memory",
            "issue": "no mention of eviction",
            "question": "What happens when memory runs out?",
            "suggestion": "maxmemory policies"
        }]
    }"#;

    fn drafting_text() -> ScriptedTextGenerator {
        ScriptedTextGenerator::new().respond(names::WRITE, "Redis keeps data in memory.")
    }

    #[test]
    fn test_parse_depth_check() {
        let check = parse_depth_check(VAGUE).unwrap();
        assert_eq!(check.score, Some(40));
        assert_eq!(
            check.vague_points,
            vec!["What happens when memory runs out? (near \"keeps data in memory\") Add: maxmemory policies"]
        );
        assert!(!parse_depth_check(DETAILED).unwrap().needs_deepening());

        let listed_but_detailed =
            r#"{"is_detailed_enough": true, "vague_points": ["minor nit"]}"#;
        assert!(!parse_depth_check(listed_but_detailed).unwrap().needs_deepening());
        assert!(parse_depth_check("looks fine to me").is_none());
    }

    #[test]
    fn test_cited_urls() {
        let citations = vec![
            Citation::new("https://redis.io", "Redis", ""),
            Citation::new("https://example.com", "Example", ""),
        ];
        assert_eq!(
            cited_urls("See [the docs](https://redis.io).", &citations),
            vec!["https://redis.io"]
        );
    }

    #[tokio::test]
    async fn test_write_drafts_empty_sections_in_order() {
        let text = drafting_text().respond(names::QUESTION, DETAILED);
        let harness = fixtures::StageHarness::new(text.clone(), StaticSearchProvider::new());
        let state = fixtures::planned_state("Redis basics", &["Intro", "Usage", "Wrap up"]);

        let result = harness.run(&WriteStage, &state).await;

        assert_eq!(result.outcome, StageOutcome::Continue);
        assert_eq!(result.delta.sections.len(), 3);
        assert!(result
            .delta
            .sections
            .values()
            .all(|s| s.status == Some(SectionStatus::Drafted)));
        let prompts = text.prompts(names::WRITE);
        assert!(prompts[0].contains("Previous section: none"));
        assert!(prompts[1].contains("Previous section: Intro"));
        assert!(prompts[1].contains("Next section: Wrap up"));
    }

    #[tokio::test]
    async fn test_write_failure_leaves_section_empty() {
        let text = ScriptedTextGenerator::new()
            .respond(names::WRITE, "Some prose.")
            .respond(names::QUESTION, DETAILED)
            .fail_matching(
                names::WRITE,
                "\"Usage\"",
                crate::errors::AdapterError::permanent("text", "content filtered"),
            );
        let harness = fixtures::StageHarness::new(text, StaticSearchProvider::new());
        let state = fixtures::planned_state("Redis basics", &["Intro", "Usage"]);

        let result = harness.run(&WriteStage, &state).await;

        assert_eq!(result.outcome, StageOutcome::Continue);
        assert!(result.delta.sections.contains_key("intro"));
        assert!(!result.delta.sections.contains_key("usage"));
        assert_eq!(result.delta.errors.len(), 1);
        assert_eq!(result.delta.errors[0].section_id.as_deref(), Some("usage"));
    }

    #[tokio::test]
    async fn test_write_skips_remaining_when_everything_fails() {
        let text = ScriptedTextGenerator::new()
            .fail(names::WRITE, crate::errors::AdapterError::permanent("text", "quota"));
        let harness = fixtures::StageHarness::new(text, StaticSearchProvider::new());
        let state = fixtures::planned_state("Redis basics", &["Intro", "Usage"]);

        let result = harness.run(&WriteStage, &state).await;

        assert!(matches!(result.outcome, StageOutcome::SkipRemaining { .. }));
        assert_eq!(result.delta.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_write_ignores_already_drafted_sections() {
        let text = ScriptedTextGenerator::new()
            .respond(names::WRITE, "Prose.")
            .respond(names::QUESTION, DETAILED);
        let harness = fixtures::StageHarness::new(text.clone(), StaticSearchProvider::new());
        let mut state = fixtures::planned_state("Redis basics", &["Intro", "Usage"]);
        state
            .apply_delta(&crate::state::StateDelta::new().with_section_delta(
                "intro",
                SectionDelta::new().with_status(SectionStatus::Drafted).with_text("done"),
            ))
            .unwrap();

        let result = harness.run(&WriteStage, &state).await;

        assert_eq!(text.prompts(names::WRITE).len(), 1);
        assert_eq!(text.prompts(names::QUESTION).len(), 1);
        assert!(result.delta.sections.contains_key("usage"));
        assert!(!result.delta.sections.contains_key("intro"));
    }

    #[tokio::test]
    async fn test_vague_section_is_deepened_once_then_stops_at_round_limit() {
        let text = drafting_text()
            .respond(names::QUESTION, VAGUE)
            .respond(names::DEEPEN, "Redis keeps data in memory and evicts keys under maxmemory.");
        let harness = fixtures::StageHarness::new(text.clone(), StaticSearchProvider::new())
            .with_config(fixtures::fast_config().with_questioning_rounds(1));
        let state = fixtures::planned_state("Redis basics", &["Intro"]);

        let result = harness.run(&WriteStage, &state).await;

        assert_eq!(result.outcome, StageOutcome::Continue);
        assert_eq!(text.prompts(names::QUESTION).len(), 1);
        let deepen = text.prompts(names::DEEPEN);
        assert_eq!(deepen.len(), 1);
        assert!(deepen[0].contains("What happens when memory runs out?"));
        assert!(deepen[0].contains("Redis keeps data in memory."));
        assert_eq!(
            result.delta.sections["intro"].text.as_deref(),
            Some("Redis keeps data in memory and evicts keys under maxmemory.")
        );
        assert_eq!(result.delta.sections["intro"].status, Some(SectionStatus::Drafted));
        assert!(result.delta.errors.is_empty());
    }

    #[tokio::test]
    async fn test_deepened_section_is_questioned_again_until_detailed() {
        let text = drafting_text()
            .respond_once(names::QUESTION, VAGUE)
            .respond(names::QUESTION, DETAILED)
            .respond(names::DEEPEN, "Deeper prose.");
        let harness = fixtures::StageHarness::new(text.clone(), StaticSearchProvider::new())
            .with_config(fixtures::fast_config().with_questioning_rounds(3));
        let state = fixtures::planned_state("Redis basics", &["Intro"]);

        let result = harness.run(&WriteStage, &state).await;

        let questions = text.prompts(names::QUESTION);
        assert_eq!(questions.len(), 2);
        assert!(questions[1].contains("Deeper prose."));
        assert_eq!(text.prompts(names::DEEPEN).len(), 1);
        assert_eq!(result.delta.sections["intro"].text.as_deref(), Some("Deeper prose."));
    }

    #[tokio::test]
    async fn test_failed_deepening_keeps_draft_and_is_recoverable() {
        let text = drafting_text()
            .respond(names::QUESTION, VAGUE)
            .fail(names::DEEPEN, crate::errors::AdapterError::permanent("text", "quota"));
        let harness = fixtures::StageHarness::new(text.clone(), StaticSearchProvider::new());
        let state = fixtures::planned_state("Redis basics", &["Intro"]);

        let result = harness.run(&WriteStage, &state).await;

        assert_eq!(result.outcome, StageOutcome::Continue);
        assert_eq!(
            result.delta.sections["intro"].text.as_deref(),
            Some("Redis keeps data in memory.")
        );
        assert_eq!(text.prompts(names::DEEPEN).len(), 1);
        assert_eq!(result.delta.errors.len(), 1);
        assert!(result.delta.errors[0].recoverable);
        assert!(result.delta.errors[0].message.starts_with("deepening 'intro' failed"));
    }

    #[tokio::test]
    async fn test_zero_questioning_rounds_skips_questioner() {
        let text = drafting_text();
        let harness = fixtures::StageHarness::new(text.clone(), StaticSearchProvider::new())
            .with_config(fixtures::fast_config().with_questioning_rounds(0));
        let state = fixtures::planned_state("Redis basics", &["Intro", "Usage"]);

        let result = harness.run(&WriteStage, &state).await;

        assert!(text.prompts(names::QUESTION).is_empty());
        assert!(result.delta.errors.is_empty());
        assert_eq!(result.delta.sections.len(), 2);
    }
}
