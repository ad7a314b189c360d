//! Per-task article configuration.

use crate::engine::RetryConfig;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The shape of article to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArticleType {
    /// Walks through a problem and its resolution.
    #[default]
    ProblemSolution,
    /// Step-by-step instructions.
    Tutorial,
    /// Weighs alternatives against each other.
    Comparison,
    /// Explains a concept in depth.
    Explainer,
}

impl fmt::Display for ArticleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProblemSolution => write!(f, "problem-solution"),
            Self::Tutorial => write!(f, "tutorial"),
            Self::Comparison => write!(f, "comparison"),
            Self::Explainer => write!(f, "explainer"),
        }
    }
}

/// Intended readership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// New to the topic.
    Beginner,
    /// Working knowledge of the topic.
    #[default]
    Intermediate,
    /// Practitioners.
    Advanced,
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginner => write!(f, "beginner"),
            Self::Intermediate => write!(f, "intermediate"),
            Self::Advanced => write!(f, "advanced"),
        }
    }
}

/// Rough article length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetLength {
    /// Around 800 words.
    Short,
    /// Around 1500 words.
    #[default]
    Medium,
    /// Around 3000 words.
    Long,
}

impl TargetLength {
    /// Approximate word count of the whole article.
    #[must_use]
    pub const fn target_words(&self) -> usize {
        match self {
            Self::Short => 800,
            Self::Medium => 1500,
            Self::Long => 3000,
        }
    }

    /// Suggested number of outline sections.
    #[must_use]
    pub const fn suggested_sections(&self) -> usize {
        match self {
            Self::Short => 4,
            Self::Medium => 6,
            Self::Long => 9,
        }
    }
}

impl fmt::Display for TargetLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short => write!(f, "short"),
            Self::Medium => write!(f, "medium"),
            Self::Long => write!(f, "long"),
        }
    }
}

/// Research stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Ask the text generator for search queries instead of using defaults.
    #[serde(default = "default_true")]
    pub generate_queries: bool,
    /// Maximum number of search queries.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// Results requested per query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
    /// Maximum citations kept after deduplication.
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
    /// Summarize the hits into background notes.
    #[serde(default = "default_true")]
    pub summarize: bool,
    /// Retry policy for search and generation calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_true() -> bool {
    true
}

fn default_max_queries() -> usize {
    3
}

fn default_results_per_query() -> usize {
    5
}

fn default_max_citations() -> usize {
    10
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            generate_queries: true,
            max_queries: default_max_queries(),
            results_per_query: default_results_per_query(),
            max_citations: default_max_citations(),
            summarize: true,
            retry: RetryConfig::default(),
        }
    }
}

/// Plan stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Outline entries beyond this count are dropped.
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
    /// Retry policy for transient generation errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_sections() -> usize {
    12
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_sections: default_max_sections(),
            retry: RetryConfig::default(),
        }
    }
}

/// Write stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Sections drafted at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Question-and-deepen passes over drafted sections. Zero disables them.
    #[serde(default = "default_questioning_rounds")]
    pub max_questioning_rounds: usize,
    /// Retry policy per section.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_concurrency() -> usize {
    2
}

fn default_questioning_rounds() -> usize {
    2
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_questioning_rounds: default_questioning_rounds(),
            retry: RetryConfig::default(),
        }
    }
}

/// Code stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Language used for examples.
    #[serde(default = "default_language")]
    pub language: String,
    /// Retry policy per code block.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_language() -> String {
    "python".to_string()
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            retry: RetryConfig::default(),
        }
    }
}

/// Illustrate stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IllustrateConfig {
    /// Visual style passed to the image generator.
    #[serde(default = "default_image_style")]
    pub image_style: String,
    /// Retry policy per asset.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_image_style() -> String {
    "clean technical illustration".to_string()
}

impl Default for IllustrateConfig {
    fn default() -> Self {
        Self {
            image_style: default_image_style(),
            retry: RetryConfig::default(),
        }
    }
}

/// Review stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Sections revised when the review is not approved.
    #[serde(default = "default_max_revisions")]
    pub max_revisions: usize,
    /// Retry policy for review and revision calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_revisions() -> usize {
    2
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration supplied with each submitted topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleConfig {
    /// Article shape.
    #[serde(default)]
    pub article_type: ArticleType,
    /// Intended readership.
    #[serde(default)]
    pub audience: Audience,
    /// Target length.
    #[serde(default)]
    pub length: TargetLength,
    /// Optional material the article must draw on.
    #[serde(default)]
    pub source_material: Option<String>,
    /// Model name passed to the text generator.
    #[serde(default = "default_model")]
    pub model: String,
    /// Whether the Illustrate stage runs.
    #[serde(default = "default_true")]
    pub illustrate: bool,
    /// Research stage settings.
    #[serde(default)]
    pub research: ResearchConfig,
    /// Plan stage settings.
    #[serde(default)]
    pub plan: PlanConfig,
    /// Write stage settings.
    #[serde(default)]
    pub write: WriteConfig,
    /// Code stage settings.
    #[serde(default)]
    pub code: CodeConfig,
    /// Illustrate stage settings.
    #[serde(default)]
    pub illustration: IllustrateConfig,
    /// Review stage settings.
    #[serde(default)]
    pub review: ReviewConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for ArticleConfig {
    fn default() -> Self {
        Self {
            article_type: ArticleType::default(),
            audience: Audience::default(),
            length: TargetLength::default(),
            source_material: None,
            model: default_model(),
            illustrate: true,
            research: ResearchConfig::default(),
            plan: PlanConfig::default(),
            write: WriteConfig::default(),
            code: CodeConfig::default(),
            illustration: IllustrateConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl ArticleConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the article type.
    #[must_use]
    pub fn with_article_type(mut self, article_type: ArticleType) -> Self {
        self.article_type = article_type;
        self
    }

    /// Sets the audience.
    #[must_use]
    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    /// Sets the target length.
    #[must_use]
    pub fn with_length(mut self, length: TargetLength) -> Self {
        self.length = length;
        self
    }

    /// Sets source material.
    #[must_use]
    pub fn with_source_material(mut self, material: impl Into<String>) -> Self {
        self.source_material = Some(material.into());
        self
    }

    /// Sets the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Enables or disables the Illustrate stage.
    #[must_use]
    pub fn with_illustrate(mut self, illustrate: bool) -> Self {
        self.illustrate = illustrate;
        self
    }

    /// Sets the write concurrency.
    #[must_use]
    pub fn with_write_concurrency(mut self, concurrency: usize) -> Self {
        self.write.concurrency = concurrency;
        self
    }

    /// Sets how many times vague sections are deepened after drafting.
    #[must_use]
    pub fn with_questioning_rounds(mut self, rounds: usize) -> Self {
        self.write.max_questioning_rounds = rounds;
        self
    }

    /// Applies the same retry policy to every stage.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.research.retry = retry.clone();
        self.plan.retry = retry.clone();
        self.write.retry = retry.clone();
        self.code.retry = retry.clone();
        self.illustration.retry = retry.clone();
        self.review.retry = retry;
        self
    }

    /// Checks values that would stall or empty the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::new("model", "must not be empty"));
        }
        if self.plan.max_sections == 0 {
            return Err(ConfigError::new("plan.max_sections", "must be at least 1"));
        }
        if self.write.concurrency == 0 {
            return Err(ConfigError::new("write.concurrency", "must be at least 1"));
        }
        if self.research.max_queries == 0 {
            return Err(ConfigError::new("research.max_queries", "must be at least 1"));
        }

        self.research.retry.validate("research.retry")?;
        self.plan.retry.validate("plan.retry")?;
        self.write.retry.validate("write.retry")?;
        self.code.retry.validate("code.retry")?;
        self.illustration.retry.validate("illustration.retry")?;
        self.review.retry.validate("review.retry")?;
        Ok(())
    }
}
