//! Article states, adapter scripts and a stage harness for tests.

use super::{ScriptedImageGenerator, ScriptedTextGenerator, StaticSearchProvider};
use crate::adapters::{AdapterSet, SearchHit};
use crate::cancellation::CancellationToken;
use crate::config::{ArticleConfig, EngineConfig};
use crate::core::TaskId;
use crate::engine::{JitterStrategy, RetryConfig, WorkflowEngine};
use crate::events::{NoOpEventSink, ProgressLog};
use crate::stages::parsing::slugify;
use crate::stages::{Stage, StageContext, StageResult};
use crate::state::{
    ArticleBrief, ArticleMetadata, ArticleState, Citation, ResearchNotes, Section, SectionDelta,
    SectionStatus, StateDelta,
};
use crate::templates::{names, PromptTemplates};
use serde_json::json;
use std::sync::Arc;

/// Url of the first hit returned by [`redis_search`].
pub const REDIS_DOCS_URL: &str = "https://redis.io/docs";

/// Three attempts with no backoff, so retry tests run instantly.
#[must_use]
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .with_base_delay_ms(0)
        .with_max_delay_ms(0)
        .with_jitter(JitterStrategy::None)
}

/// The default article config with [`fast_retry`] on every stage.
#[must_use]
pub fn fast_config() -> ArticleConfig {
    ArticleConfig::new().with_retry(fast_retry())
}

/// A plan response with one section per title.
#[must_use]
pub fn plan_json(titles: &[&str]) -> String {
    let sections: Vec<_> = titles
        .iter()
        .map(|title| {
            json!({
                "id": slugify(title),
                "title": title,
                "intent": format!("Explain {title}"),
                "illustration": null,
                "code_examples": [],
            })
        })
        .collect();
    json!({
        "title": "A practical guide",
        "subtitle": "Everything you need to get started",
        "sections": sections,
    })
    .to_string()
}

/// A text generator that answers every built-in template sensibly.
#[must_use]
pub fn happy_text(titles: &[&str]) -> ScriptedTextGenerator {
    ScriptedTextGenerator::new()
        .respond(names::RESEARCH_QUERIES, r#"{"queries": ["redis overview", "redis persistence"]}"#)
        .respond(
            names::RESEARCH_SUMMARY,
            r#"{"background": "Redis is an in-memory data store.", "key_concepts": ["keys", "persistence"]}"#,
        )
        .respond(names::PLAN, plan_json(titles))
        .respond(
            names::WRITE,
            format!("Redis keeps every key in memory, see {REDIS_DOCS_URL} for the details."),
        )
        .respond(
            names::QUESTION,
            r#"{"is_detailed_enough": true, "depth_score": 90, "vague_points": []}"#,
        )
        .respond(names::DEEPEN, "Deeper prose.")
        .respond(
            names::CODE,
            r#"{"code": "redis-cli SET greeting hello", "output": "OK", "explanation": "Stores a key."}"#,
        )
        .respond(names::DIAGRAM, "graph TD\n  Client-->Redis")
        .respond(names::REVIEW, r#"{"score": 88, "approved": true, "issues": []}"#)
        .respond(names::REVISE, "Revised prose.")
}

/// A search provider returning two Redis documentation hits for any query.
#[must_use]
pub fn redis_search() -> StaticSearchProvider {
    StaticSearchProvider::new().with_default_hits(vec![
        SearchHit::new(
            "Redis documentation",
            REDIS_DOCS_URL,
            "Redis is an open source, in-memory data store.",
        ),
        SearchHit::new(
            "Redis persistence",
            "https://redis.io/docs/persistence",
            "RDB snapshots and the append-only file.",
        ),
    ])
}

/// An engine over the scripted adapters, with a working image generator.
#[must_use]
pub fn engine(text: ScriptedTextGenerator, search: StaticSearchProvider) -> WorkflowEngine {
    let adapters = AdapterSet::new(Arc::new(text), Arc::new(search))
        .with_image(Arc::new(ScriptedImageGenerator::new().respond("https://images.example/generated.png")));
    WorkflowEngine::new(adapters, PromptTemplates::with_defaults(), &EngineConfig::default())
}

fn apply(state: &mut ArticleState, delta: &StateDelta) {
    if let Err(e) = state.apply_delta(delta) {
        panic!("fixture delta rejected: {e}");
    }
}

/// A fresh state with the default brief.
#[must_use]
pub fn empty_state(topic: &str) -> ArticleState {
    ArticleState::new(topic, ArticleBrief::default())
}

/// A state after Research.
#[must_use]
pub fn researched_state(topic: &str) -> ArticleState {
    let mut state = empty_state(topic);
    let delta = StateDelta::new()
        .with_research(ResearchNotes {
            background: format!("{topic} background."),
            key_concepts: vec!["keys".to_string(), "expiry".to_string()],
        })
        .with_citation(Citation::new(REDIS_DOCS_URL, "Redis documentation", "In-memory data store."));
    apply(&mut state, &delta);
    state
}

/// A state after Plan, with one empty section per title.
#[must_use]
pub fn planned_state(topic: &str, titles: &[&str]) -> ArticleState {
    let mut state = researched_state(topic);
    let mut delta = StateDelta::new().with_metadata(ArticleMetadata {
        title: topic.to_string(),
        subtitle: String::new(),
    });
    for title in titles {
        delta = delta.with_section(Section::new(slugify(title), *title, format!("Explain {title}")));
    }
    apply(&mut state, &delta);
    state
}

/// A state after Write, with every section drafted.
#[must_use]
pub fn drafted_state(topic: &str, sections: &[(&str, &str)]) -> ArticleState {
    let titles: Vec<&str> = sections.iter().map(|(title, _)| *title).collect();
    let mut state = planned_state(topic, &titles);
    let mut delta = StateDelta::new();
    for (title, text) in sections {
        delta = delta.with_section_delta(
            slugify(title),
            SectionDelta::new().with_status(SectionStatus::Drafted).with_text(*text),
        );
    }
    apply(&mut state, &delta);
    state
}

/// Runs one stage outside the engine.
#[derive(Debug)]
pub struct StageHarness {
    adapters: AdapterSet,
    templates: PromptTemplates,
    config: ArticleConfig,
}

impl StageHarness {
    /// Creates a harness over the scripted adapters, using [`fast_config`].
    #[must_use]
    pub fn new(text: ScriptedTextGenerator, search: StaticSearchProvider) -> Self {
        Self {
            adapters: AdapterSet::new(Arc::new(text), Arc::new(search)),
            templates: PromptTemplates::with_defaults(),
            config: fast_config(),
        }
    }

    /// Replaces the article config.
    #[must_use]
    pub fn with_config(mut self, config: ArticleConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds an image generator.
    #[must_use]
    pub fn with_image(mut self, image: ScriptedImageGenerator) -> Self {
        self.adapters = self.adapters.with_image(Arc::new(image));
        self
    }

    /// The article config stages will see.
    #[must_use]
    pub fn config(&self) -> &ArticleConfig {
        &self.config
    }

    /// Executes `stage` against `state` with a fresh log and token.
    pub async fn run(&self, stage: &dyn Stage, state: &ArticleState) -> StageResult {
        let log = ProgressLog::new(TaskId::new(), Arc::new(NoOpEventSink));
        let cancel = CancellationToken::new();
        let view = crate::state::ReadView::new(state, stage.kind(), stage.reads());
        let ctx = StageContext::new(view, &self.adapters, &self.templates, &self.config, &log, &cancel);
        stage.execute(&ctx).await
    }
}
