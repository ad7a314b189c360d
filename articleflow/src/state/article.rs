//! The shared article document and its component types.

use crate::config::{ArticleConfig, ArticleType, Audience, TargetLength};
use crate::core::StageKind;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::delta::{apply, DeltaSummary, StateDelta};
use super::snapshot::ArticleSnapshot;
use crate::errors::StateConflictError;

/// Stable identifier of an outline section.
pub type SectionId = String;

/// Content-derived identifier of an asset.
pub type AssetId = String;

/// Progress of a single section. Ordered; sections only move forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Planned, no prose yet.
    #[default]
    Empty,
    /// Prose written.
    Drafted,
    /// Code examples attached.
    Coded,
    /// Illustrations attached (or attempted).
    Illustrated,
    /// Passed through review.
    Reviewed,
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Drafted => write!(f, "drafted"),
            Self::Coded => write!(f, "coded"),
            Self::Illustrated => write!(f, "illustrated"),
            Self::Reviewed => write!(f, "reviewed"),
        }
    }
}

/// The immutable part of the task configuration that stages may read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleBrief {
    /// Article shape.
    pub article_type: ArticleType,
    /// Intended readership.
    pub audience: Audience,
    /// Target length.
    pub length: TargetLength,
    /// Material the article must draw on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_material: Option<String>,
}

impl From<&ArticleConfig> for ArticleBrief {
    fn from(config: &ArticleConfig) -> Self {
        Self {
            article_type: config.article_type,
            audience: config.audience,
            length: config.length,
            source_material: config.source_material.clone(),
        }
    }
}

/// Title and subtitle chosen by the planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    /// Article title.
    pub title: String,
    /// One-line subtitle.
    #[serde(default)]
    pub subtitle: String,
}

/// Background gathered by the Research stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchNotes {
    /// Prose summary of the findings.
    pub background: String,
    /// Concepts the article should cover.
    #[serde(default)]
    pub key_concepts: Vec<String>,
}

/// Kind of visual asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Mermaid diagram produced by text generation.
    Diagram,
    /// Raster image produced by the image generator.
    Image,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diagram => write!(f, "diagram"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// A planner request for a section visual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IllustrationRequest {
    /// Diagram or image.
    pub kind: AssetKind,
    /// What the visual should show.
    pub description: String,
}

/// One outline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Stable id, unique within the outline.
    pub id: SectionId,
    /// Heading text.
    pub title: String,
    /// What the section should accomplish.
    pub intent: String,
    /// Optional visual for the section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illustration: Option<IllustrationRequest>,
    /// Short descriptions of code examples the section needs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_examples: Vec<String>,
}

impl Section {
    /// Creates a section with no illustration or code examples.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            intent: intent.into(),
            illustration: None,
            code_examples: Vec::new(),
        }
    }

    /// Adds an illustration request.
    #[must_use]
    pub fn with_illustration(mut self, kind: AssetKind, description: impl Into<String>) -> Self {
        self.illustration = Some(IllustrationRequest {
            kind,
            description: description.into(),
        });
        self
    }

    /// Adds a code example description.
    #[must_use]
    pub fn with_code_example(mut self, description: impl Into<String>) -> Self {
        self.code_examples.push(description.into());
        self
    }
}

/// A generated code example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Placeholder id the block replaces in the section text.
    pub id: String,
    /// Language tag for the fence.
    pub language: String,
    /// Source code.
    pub code: String,
    /// Expected output, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Explanation shown after the block.
    #[serde(default)]
    pub explanation: String,
}

/// Accumulated content of one section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionContent {
    /// Markdown prose, may contain `[CODE: id - description]` placeholders.
    pub text: String,
    /// Code examples.
    pub code_blocks: Vec<CodeBlock>,
    /// Asset ids attached to the section.
    pub illustrations: Vec<AssetId>,
    /// Urls of citations the section relies on.
    pub citations: Vec<String>,
    /// Progress marker.
    pub status: SectionStatus,
}

impl SectionContent {
    /// Returns true if the section has no prose.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A research source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Source url, the identity of the citation.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Relevant excerpt.
    pub snippet: String,
}

impl Citation {
    /// Creates a citation.
    #[must_use]
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
        }
    }
}

/// Where an asset's content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AssetSource {
    /// Inline Mermaid source.
    Mermaid(String),
    /// Url of a generated image.
    Url(String),
}

/// A diagram or image attached to a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Content digest.
    pub id: AssetId,
    /// Diagram or image.
    pub kind: AssetKind,
    /// Owning section.
    pub section_id: SectionId,
    /// Caption / alt text.
    pub description: String,
    /// The content.
    pub source: AssetSource,
}

/// Audit entry for a stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageErrorRecord {
    /// Unique id; re-applying a record with a known id is a no-op.
    pub id: Uuid,
    /// The failing stage.
    pub stage: StageKind,
    /// The affected section, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    /// What went wrong.
    pub message: String,
    /// Whether the pipeline carried on.
    pub recoverable: bool,
    /// When it was recorded.
    pub at: Timestamp,
}

impl StageErrorRecord {
    /// Creates a record with a fresh id.
    #[must_use]
    pub fn new(stage: StageKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage,
            section_id: None,
            message: message.into(),
            recoverable,
            at: now_utc(),
        }
    }

    /// Creates a recoverable record.
    #[must_use]
    pub fn recoverable(stage: StageKind, message: impl Into<String>) -> Self {
        Self::new(stage, message, true)
    }

    /// Creates an unrecoverable record.
    #[must_use]
    pub fn unrecoverable(stage: StageKind, message: impl Into<String>) -> Self {
        Self::new(stage, message, false)
    }

    /// Attaches the affected section.
    #[must_use]
    pub fn for_section(mut self, section_id: impl Into<String>) -> Self {
        self.section_id = Some(section_id.into());
        self
    }
}

/// A reviewer finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    /// Section the issue applies to, if specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    /// The finding.
    pub description: String,
}

/// Outcome of the Review stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    /// Quality score from 0 to 100.
    pub score: u8,
    /// Whether the article passed.
    pub approved: bool,
    /// Findings.
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    /// Sections revised in response to the findings.
    #[serde(default)]
    pub revised_sections: Vec<SectionId>,
}

/// Final Markdown output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledDocument {
    /// The article.
    pub markdown: String,
    /// Whitespace-separated word count.
    pub word_count: usize,
    /// Sections that had no prose.
    #[serde(default)]
    pub gaps: Vec<SectionId>,
    /// SHA-256 of the Markdown.
    pub digest: String,
}

/// The document under construction, accumulated across stages.
///
/// Only [`apply_delta`](Self::apply_delta) mutates it after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleState {
    pub(super) topic: String,
    pub(super) brief: ArticleBrief,
    pub(super) metadata: Option<ArticleMetadata>,
    pub(super) research: Option<ResearchNotes>,
    pub(super) outline: Vec<Section>,
    pub(super) sections: BTreeMap<SectionId, SectionContent>,
    pub(super) citations: Vec<Citation>,
    pub(super) assets: BTreeMap<AssetId, Asset>,
    pub(super) review: Option<ReviewReport>,
    pub(super) document: Option<AssembledDocument>,
    pub(super) errors: Vec<StageErrorRecord>,
}

impl ArticleState {
    /// Creates an empty state for a topic.
    #[must_use]
    pub fn new(topic: impl Into<String>, brief: ArticleBrief) -> Self {
        Self {
            topic: topic.into(),
            brief,
            metadata: None,
            research: None,
            outline: Vec::new(),
            sections: BTreeMap::new(),
            citations: Vec::new(),
            assets: BTreeMap::new(),
            review: None,
            document: None,
            errors: Vec::new(),
        }
    }

    /// Validates and commits a delta atomically.
    ///
    /// On error the state is left untouched.
    pub fn apply_delta(&mut self, delta: &StateDelta) -> Result<DeltaSummary, StateConflictError> {
        apply(self, delta)
    }

    /// Returns an immutable, shareable copy.
    #[must_use]
    pub fn snapshot(&self) -> ArticleSnapshot {
        ArticleSnapshot::new(self.clone())
    }

    /// The topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The brief.
    #[must_use]
    pub fn brief(&self) -> &ArticleBrief {
        &self.brief
    }

    /// Title and subtitle, once planned.
    #[must_use]
    pub fn metadata(&self) -> Option<&ArticleMetadata> {
        self.metadata.as_ref()
    }

    /// Research notes, if any.
    #[must_use]
    pub fn research(&self) -> Option<&ResearchNotes> {
        self.research.as_ref()
    }

    /// The outline in order.
    #[must_use]
    pub fn outline(&self) -> &[Section] {
        &self.outline
    }

    /// Section contents keyed by id.
    #[must_use]
    pub fn sections(&self) -> &BTreeMap<SectionId, SectionContent> {
        &self.sections
    }

    /// Content of one section.
    #[must_use]
    pub fn section(&self, id: &str) -> Option<&SectionContent> {
        self.sections.get(id)
    }

    /// Status of one section.
    #[must_use]
    pub fn section_status(&self, id: &str) -> Option<SectionStatus> {
        self.sections.get(id).map(|s| s.status)
    }

    /// Citations in insertion order.
    #[must_use]
    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    /// Assets keyed by id.
    #[must_use]
    pub fn assets(&self) -> &BTreeMap<AssetId, Asset> {
        &self.assets
    }

    /// The review report, if reviewed.
    #[must_use]
    pub fn review(&self) -> Option<&ReviewReport> {
        self.review.as_ref()
    }

    /// The assembled document, if assembled.
    #[must_use]
    pub fn document(&self) -> Option<&AssembledDocument> {
        self.document.as_ref()
    }

    /// The error audit trail.
    #[must_use]
    pub fn errors(&self) -> &[StageErrorRecord] {
        &self.errors
    }

    /// Errors recorded by one stage.
    pub fn errors_for(&self, stage: StageKind) -> impl Iterator<Item = &StageErrorRecord> {
        self.errors.iter().filter(move |e| e.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_status_ordering() {
        assert!(SectionStatus::Empty < SectionStatus::Drafted);
        assert!(SectionStatus::Drafted < SectionStatus::Coded);
        assert!(SectionStatus::Coded < SectionStatus::Illustrated);
        assert!(SectionStatus::Illustrated < SectionStatus::Reviewed);
        assert_eq!(SectionStatus::default(), SectionStatus::Empty);
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = ArticleState::new("Redis basics", ArticleBrief::default());
        assert_eq!(state.topic(), "Redis basics");
        assert!(state.outline().is_empty());
        assert!(state.document().is_none());
        assert!(state.errors().is_empty());
    }

    #[test]
    fn test_brief_from_config() {
        let config = ArticleConfig::new()
            .with_audience(Audience::Advanced)
            .with_source_material("notes");
        let brief = ArticleBrief::from(&config);
        assert_eq!(brief.audience, Audience::Advanced);
        assert_eq!(brief.source_material.as_deref(), Some("notes"));
    }

    #[test]
    fn test_error_record_builders() {
        let record = StageErrorRecord::recoverable(StageKind::Write, "timeout").for_section("intro");
        assert!(record.recoverable);
        assert_eq!(record.section_id.as_deref(), Some("intro"));
        assert_ne!(record.id, StageErrorRecord::recoverable(StageKind::Write, "timeout").id);
    }

    #[test]
    fn test_asset_source_serialization() {
        let json = serde_json::to_value(AssetSource::Mermaid("graph TD".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "mermaid", "value": "graph TD"}));
    }
}
