//! Research: search queries, citations and background notes.
//!
//! Research never blocks the pipeline. Every failure here degrades to a
//! recoverable error and the stage always continues.

use super::parsing::{extract_json, str_field, string_list};
use super::result::StageOutput;
use super::{Stage, StageContext, StageResult};
use crate::adapters::SearchHit;
use crate::core::StageKind;
use crate::engine::with_retry;
use crate::errors::AdapterError;
use crate::state::{ArticleBrief, Citation, ResearchNotes, StateField};
use crate::templates::{names, TemplateVars};
use crate::utils::truncate_chars;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;

const SNIPPET_CHARS: usize = 200;
const FALLBACK_SNIPPETS: usize = 3;

/// Gathers sources for the topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResearchStage;

impl ResearchStage {
    /// The queries used when generation is disabled or fails.
    #[must_use]
    pub fn default_queries(topic: &str) -> Vec<String> {
        vec![
            format!("{topic} tutorial"),
            format!("{topic} best practices"),
            format!("{topic} FAQ"),
        ]
    }

    async fn queries(
        &self,
        ctx: &StageContext<'_>,
        topic: &str,
        brief: &ArticleBrief,
        output: &mut StageOutput,
    ) -> Vec<String> {
        let settings = &ctx.config().research;
        let mut queries = if settings.generate_queries {
            let vars = TemplateVars::new()
                .text("topic", topic)
                .text("audience", brief.audience.to_string())
                .text("article_type", brief.article_type.to_string())
                .number("count", settings.max_queries);
            match ctx
                .generate(names::RESEARCH_QUERIES, &vars, &settings.retry, "research:queries", true)
                .await
            {
                Ok(response) => {
                    let parsed = parse_queries(&response);
                    if parsed.is_empty() {
                        output.recoverable(None, "query generation returned no queries, using defaults");
                        Self::default_queries(topic)
                    } else {
                        parsed
                    }
                }
                Err(e) => {
                    output.recoverable(None, format!("query generation failed, using defaults: {e}"));
                    Self::default_queries(topic)
                }
            }
        } else {
            Self::default_queries(topic)
        };
        queries.truncate(settings.max_queries);
        queries
    }

    async fn summarize(
        &self,
        ctx: &StageContext<'_>,
        topic: &str,
        hits: &[SearchHit],
        output: &mut StageOutput,
    ) -> ResearchNotes {
        let settings = &ctx.config().research;
        if settings.summarize && !hits.is_empty() {
            let results = hits
                .iter()
                .map(|h| format!("[{}]({})\n{}", h.title, h.url, h.snippet))
                .collect::<Vec<_>>()
                .join("\n\n");
            let vars = TemplateVars::new().text("topic", topic).text("results", results);
            match ctx
                .generate(names::RESEARCH_SUMMARY, &vars, &settings.retry, "research:summary", true)
                .await
            {
                Ok(response) => match extract_json(&response) {
                    Some(value) => {
                        let background = str_field(&value, "background")
                            .or_else(|| str_field(&value, "background_knowledge"))
                            .unwrap_or_default()
                            .to_string();
                        let mut key_concepts = string_list(&value, "key_concepts");
                        if key_concepts.is_empty() {
                            key_concepts = string_list(&value, "concepts");
                        }
                        if !background.is_empty() {
                            return ResearchNotes {
                                background,
                                key_concepts,
                            };
                        }
                        output.recoverable(None, "research summary was empty");
                    }
                    None => output.recoverable(None, "research summary was not valid JSON"),
                },
                Err(e) => output.recoverable(None, format!("research summary failed: {e}")),
            }
        }

        ResearchNotes {
            background: hits
                .iter()
                .take(FALLBACK_SNIPPETS)
                .map(|h| truncate_chars(&h.snippet, SNIPPET_CHARS))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            key_concepts: Vec::new(),
        }
    }
}

fn parse_queries(response: &str) -> Vec<String> {
    if let Some(value) = extract_json(response) {
        return string_list(&value, "queries");
    }
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(response.trim()) {
        return items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect();
    }
    Vec::new()
}

/// Deduplicates hits by url, keeping the first occurrence, and caps the count.
#[must_use]
pub fn dedupe_hits(hits: impl IntoIterator<Item = SearchHit>, max: usize) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| !h.url.trim().is_empty() && seen.insert(h.url.clone()))
        .take(max)
        .collect()
}

#[async_trait]
impl Stage for ResearchStage {
    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Topic, StateField::Brief]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageResult {
        let mut output = StageOutput::new(StageKind::Research);
        let (topic, brief) = match (ctx.view().topic(), ctx.view().brief()) {
            (Ok(topic), Ok(brief)) => (topic, brief),
            (Err(e), _) | (_, Err(e)) => {
                output.recoverable(None, e.to_string());
                return output.ok();
            }
        };
        let settings = &ctx.config().research;

        let queries = self.queries(ctx, topic, brief, &mut output).await;
        ctx.progress().report(format!("Searching {} queries", queries.len()));
        if ctx.is_cancelled() {
            return output.ok();
        }

        let searches = queries.iter().map(|query| async move {
            let key = format!("research:search:{query}");
            let result: Result<Vec<SearchHit>, AdapterError> = with_retry(&settings.retry, &key, || {
                ctx.adapters().search(query, settings.results_per_query)
            })
            .await;
            (query, result)
        });

        let mut hits = Vec::new();
        for (query, result) in join_all(searches).await {
            match result {
                Ok(found) => hits.extend(found),
                Err(e) => output.recoverable(None, format!("search '{query}' failed: {e}")),
            }
        }

        let hits = dedupe_hits(hits, settings.max_citations);
        ctx.progress().report(format!("Found {} sources", hits.len()));

        let notes = if ctx.is_cancelled() {
            ResearchNotes::default()
        } else {
            self.summarize(ctx, topic, &hits, &mut output).await
        };

        for hit in &hits {
            output.delta.citations.push(Citation::new(
                hit.url.clone(),
                hit.title.clone(),
                hit.snippet.clone(),
            ));
        }
        output.delta.research = Some(notes);
        output.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, ScriptedTextGenerator, StaticSearchProvider};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_queries() {
        assert_eq!(
            ResearchStage::default_queries("Redis"),
            vec!["Redis tutorial", "Redis best practices", "Redis FAQ"]
        );
    }

    #[test]
    fn test_parse_queries() {
        assert_eq!(parse_queries(r#"{"queries": ["a", "b"]}"#), vec!["a", "b"]);
        assert_eq!(parse_queries(r#"["a", " "]"#), vec!["a"]);
        assert!(parse_queries("nothing").is_empty());
    }

    #[test]
    fn test_dedupe_hits_keeps_first_and_caps() {
        let hits = vec![
            SearchHit::new("A", "https://a", "first"),
            SearchHit::new("A2", "https://a", "second"),
            SearchHit::new("B", "https://b", "b"),
            SearchHit::new("C", "https://c", "c"),
        ];
        let deduped = dedupe_hits(hits, 2);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].snippet, "first");
        assert_eq!(deduped[1].url, "https://b");
    }

    #[tokio::test]
    async fn test_research_collects_citations_and_summary() {
        let text = ScriptedTextGenerator::new()
            .respond(names::RESEARCH_QUERIES, r#"{"queries": ["redis intro", "redis persistence"]}"#)
            .respond(
                names::RESEARCH_SUMMARY,
                r#"{"background": "Redis is an in-memory store.", "key_concepts": ["keys", "TTL"]}"#,
            );
        let search = StaticSearchProvider::new()
            .with_hits(
                "redis intro",
                vec![SearchHit::new("Redis", "https://redis.io", "in-memory")],
            )
            .with_hits(
                "redis persistence",
                vec![
                    SearchHit::new("Redis", "https://redis.io", "dup"),
                    SearchHit::new("RDB", "https://redis.io/rdb", "snapshots"),
                ],
            );

        let harness = fixtures::StageHarness::new(text, search);
        let result = harness.run(&ResearchStage, &fixtures::empty_state("Redis basics")).await;

        assert_eq!(result.outcome, crate::stages::StageOutcome::Continue);
        let urls: Vec<_> = result.delta.citations.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://redis.io", "https://redis.io/rdb"]);
        let notes = result.delta.research.unwrap();
        assert_eq!(notes.background, "Redis is an in-memory store.");
        assert_eq!(notes.key_concepts, vec!["keys", "TTL"]);
        assert!(result.delta.errors.is_empty());
    }

    #[tokio::test]
    async fn test_research_failures_are_recoverable() {
        let text = ScriptedTextGenerator::new()
            .fail(names::RESEARCH_QUERIES, AdapterError::permanent("text", "bad key"));
        let search = StaticSearchProvider::new()
            .with_default_hits(vec![SearchHit::new("Redis", "https://redis.io", "in-memory store")])
            .failing_query("Redis basics FAQ", AdapterError::permanent("search", "blocked"));

        let mut config = fixtures::fast_config();
        config.research.summarize = false;
        let harness = fixtures::StageHarness::new(text, search).with_config(config);

        let result = harness.run(&ResearchStage, &fixtures::empty_state("Redis basics")).await;

        assert_eq!(result.outcome, crate::stages::StageOutcome::Continue);
        assert_eq!(result.delta.citations.len(), 1);
        assert_eq!(result.delta.errors.len(), 2);
        assert!(result.delta.errors.iter().all(|e| e.recoverable));
        assert_eq!(
            result.delta.research.unwrap().background,
            "in-memory store"
        );
    }

    #[tokio::test]
    async fn test_transient_search_failure_exhausts_retries_and_continues() {
        let text = ScriptedTextGenerator::new()
            .respond(names::RESEARCH_QUERIES, r#"{"queries": ["redis intro", "redis persistence"]}"#);
        let search = StaticSearchProvider::new()
            .with_default_hits(vec![SearchHit::new("Redis", "https://redis.io", "in-memory store")])
            .failing_query("redis persistence", AdapterError::transient("search", "503 from upstream"));

        let mut config = fixtures::fast_config();
        config.research.summarize = false;
        let attempts = config.research.retry.max_attempts;
        let harness = fixtures::StageHarness::new(text, search.clone()).with_config(config);

        let result = harness.run(&ResearchStage, &fixtures::empty_state("Redis basics")).await;

        assert_eq!(result.outcome, crate::stages::StageOutcome::Continue);
        let tried = search.queries();
        assert_eq!(tried.iter().filter(|q| *q == "redis persistence").count(), attempts);
        assert_eq!(tried.iter().filter(|q| *q == "redis intro").count(), 1);
        assert_eq!(result.delta.errors.len(), 1);
        assert!(result.delta.errors[0].recoverable);
        assert!(result.delta.errors[0].message.contains("redis persistence"));
        assert_eq!(result.delta.citations.len(), 1);
    }
}
