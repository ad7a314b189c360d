//! State deltas and the merge contract.
//!
//! A delta is validated in full before anything is written, so a rejected
//! delta never leaves a half-applied state behind.

use super::article::{
    ArticleMetadata, ArticleState, Asset, AssembledDocument, Citation, CodeBlock, ResearchNotes,
    ReviewReport, Section, SectionId, SectionStatus, StageErrorRecord,
};
use crate::errors::StateConflictError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Changes to one section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDelta {
    /// New status; must not be below the current one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SectionStatus>,
    /// Replacement prose. Requires at least `Drafted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Replacement code blocks. Requires at least `Coded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_blocks: Option<Vec<CodeBlock>>,
    /// Asset ids to attach. Requires at least `Illustrated`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub illustrations: Vec<String>,
    /// Citation urls to attach.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
}

impl SectionDelta {
    /// Creates an empty section delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: SectionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the prose.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the code blocks.
    #[must_use]
    pub fn with_code_blocks(mut self, blocks: Vec<CodeBlock>) -> Self {
        self.code_blocks = Some(blocks);
        self
    }

    /// Attaches an asset.
    #[must_use]
    pub fn with_illustration(mut self, asset_id: impl Into<String>) -> Self {
        self.illustrations.push(asset_id.into());
        self
    }

    /// Attaches a citation url.
    #[must_use]
    pub fn with_citation(mut self, url: impl Into<String>) -> Self {
        self.citations.push(url.into());
        self
    }

    fn merge(&mut self, other: Self) {
        if let Some(status) = other.status {
            self.status = Some(self.status.map_or(status, |s| s.max(status)));
        }
        if other.text.is_some() {
            self.text = other.text;
        }
        if other.code_blocks.is_some() {
            self.code_blocks = other.code_blocks;
        }
        self.illustrations.extend(other.illustrations);
        self.citations.extend(other.citations);
    }
}

/// A proposed set of changes produced by one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Title and subtitle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArticleMetadata>,
    /// Research notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<ResearchNotes>,
    /// Outline entries to append.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outline: Vec<Section>,
    /// Per-section changes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sections: BTreeMap<SectionId, SectionDelta>,
    /// Citations to upsert by url.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// Assets to insert.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<Asset>,
    /// Review outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewReport>,
    /// Assembled document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<AssembledDocument>,
    /// Error records to append.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StageErrorRecord>,
}

impl StateDelta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_none()
            && self.research.is_none()
            && self.outline.is_empty()
            && self.sections.is_empty()
            && self.citations.is_empty()
            && self.assets.is_empty()
            && self.review.is_none()
            && self.document.is_none()
            && self.errors.is_empty()
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ArticleMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Sets the research notes.
    #[must_use]
    pub fn with_research(mut self, research: ResearchNotes) -> Self {
        self.research = Some(research);
        self
    }

    /// Appends an outline section.
    #[must_use]
    pub fn with_section(mut self, section: Section) -> Self {
        self.outline.push(section);
        self
    }

    /// Adds or merges changes for a section.
    #[must_use]
    pub fn with_section_delta(mut self, id: impl Into<String>, delta: SectionDelta) -> Self {
        self.update_section(id, delta);
        self
    }

    /// Adds a citation.
    #[must_use]
    pub fn with_citation(mut self, citation: Citation) -> Self {
        self.citations.push(citation);
        self
    }

    /// Adds an asset.
    #[must_use]
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.assets.push(asset);
        self
    }

    /// Sets the review report.
    #[must_use]
    pub fn with_review(mut self, review: ReviewReport) -> Self {
        self.review = Some(review);
        self
    }

    /// Sets the assembled document.
    #[must_use]
    pub fn with_document(mut self, document: AssembledDocument) -> Self {
        self.document = Some(document);
        self
    }

    /// Adds an error record.
    #[must_use]
    pub fn with_error(mut self, error: StageErrorRecord) -> Self {
        self.errors.push(error);
        self
    }

    /// Merges changes for a section into the delta.
    pub fn update_section(&mut self, id: impl Into<String>, delta: SectionDelta) {
        self.sections.entry(id.into()).or_default().merge(delta);
    }

    /// Appends an error record.
    pub fn record_error(&mut self, error: StageErrorRecord) {
        self.errors.push(error);
    }

    /// Folds another delta into this one. Later values win.
    pub fn merge(&mut self, other: Self) {
        if other.metadata.is_some() {
            self.metadata = other.metadata;
        }
        if other.research.is_some() {
            self.research = other.research;
        }
        self.outline.extend(other.outline);
        for (id, section) in other.sections {
            self.update_section(id, section);
        }
        self.citations.extend(other.citations);
        self.assets.extend(other.assets);
        if other.review.is_some() {
            self.review = other.review;
        }
        if other.document.is_some() {
            self.document = other.document;
        }
        self.errors.extend(other.errors);
    }
}

/// What a committed delta changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSummary {
    /// Outline entries added.
    pub sections_added: usize,
    /// Sections whose status moved forward.
    pub sections_advanced: usize,
    /// Sections whose content changed without a status change.
    pub sections_updated: usize,
    /// New citations.
    pub citations_added: usize,
    /// Citations whose title or snippet was replaced.
    pub citations_updated: usize,
    /// New assets.
    pub assets_added: usize,
    /// New error records.
    pub errors_recorded: usize,
}

impl DeltaSummary {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

const TEXT: &str = "text";
const CODE_BLOCKS: &str = "code blocks";
const ILLUSTRATIONS: &str = "illustrations";

fn validate(state: &ArticleState, delta: &StateDelta) -> Result<(), StateConflictError> {
    let mut planned: HashMap<&str, &Section> =
        state.outline.iter().map(|s| (s.id.as_str(), s)).collect();

    for section in &delta.outline {
        match planned.get(section.id.as_str()) {
            Some(existing) if *existing != section => {
                return Err(StateConflictError::OutlineConflict {
                    section: section.id.clone(),
                });
            }
            Some(_) => {}
            None => {
                planned.insert(section.id.as_str(), section);
            }
        }
    }

    for (id, change) in &delta.sections {
        if !planned.contains_key(id.as_str()) {
            return Err(StateConflictError::unknown_section(id));
        }
        let current = state
            .sections
            .get(id)
            .map_or(SectionStatus::Empty, |s| s.status);
        let target = change.status.unwrap_or(current);
        if target < current {
            return Err(StateConflictError::regression(id, current, target));
        }

        let ahead = |content: &'static str| StateConflictError::ContentAheadOfStatus {
            section: id.clone(),
            content,
            status: target,
        };
        if change.text.is_some() && target < SectionStatus::Drafted {
            return Err(ahead(TEXT));
        }
        if change.code_blocks.as_ref().is_some_and(|b| !b.is_empty())
            && target < SectionStatus::Coded
        {
            return Err(ahead(CODE_BLOCKS));
        }
        if !change.illustrations.is_empty() && target < SectionStatus::Illustrated {
            return Err(ahead(ILLUSTRATIONS));
        }
    }

    let mut incoming: HashMap<&str, &Asset> = HashMap::new();
    for asset in &delta.assets {
        if !planned.contains_key(asset.section_id.as_str()) {
            return Err(StateConflictError::unknown_section(&asset.section_id));
        }
        let existing = state
            .assets
            .get(&asset.id)
            .or_else(|| incoming.get(asset.id.as_str()).copied());
        if existing.is_some_and(|e| e != asset) {
            return Err(StateConflictError::AssetConflict {
                asset: asset.id.clone(),
            });
        }
        incoming.insert(asset.id.as_str(), asset);
    }

    Ok(())
}

fn push_unique(target: &mut Vec<String>, values: &[String]) -> bool {
    let mut changed = false;
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
            changed = true;
        }
    }
    changed
}

fn commit(state: &mut ArticleState, delta: &StateDelta) -> DeltaSummary {
    let mut summary = DeltaSummary::default();

    if let Some(metadata) = &delta.metadata {
        state.metadata = Some(metadata.clone());
    }
    if let Some(research) = &delta.research {
        state.research = Some(research.clone());
    }

    for section in &delta.outline {
        if state.outline.iter().any(|s| s.id == section.id) {
            continue;
        }
        state.outline.push(section.clone());
        state.sections.entry(section.id.clone()).or_default();
        summary.sections_added += 1;
    }

    for (id, change) in &delta.sections {
        let content = state.sections.entry(id.clone()).or_default();
        let mut changed = false;

        if let Some(text) = &change.text {
            if content.text != *text {
                content.text.clone_from(text);
                changed = true;
            }
        }
        if let Some(blocks) = &change.code_blocks {
            if content.code_blocks != *blocks {
                content.code_blocks.clone_from(blocks);
                changed = true;
            }
        }
        changed |= push_unique(&mut content.illustrations, &change.illustrations);
        changed |= push_unique(&mut content.citations, &change.citations);

        match change.status {
            Some(status) if status > content.status => {
                content.status = status;
                summary.sections_advanced += 1;
            }
            _ if changed => summary.sections_updated += 1,
            _ => {}
        }
    }

    for citation in &delta.citations {
        match state.citations.iter_mut().find(|c| c.url == citation.url) {
            Some(existing) if existing != citation => {
                existing.title.clone_from(&citation.title);
                existing.snippet.clone_from(&citation.snippet);
                summary.citations_updated += 1;
            }
            Some(_) => {}
            None => {
                state.citations.push(citation.clone());
                summary.citations_added += 1;
            }
        }
    }

    for asset in &delta.assets {
        if !state.assets.contains_key(&asset.id) {
            state.assets.insert(asset.id.clone(), asset.clone());
            summary.assets_added += 1;
        }
    }

    if let Some(review) = &delta.review {
        state.review = Some(review.clone());
    }
    if let Some(document) = &delta.document {
        state.document = Some(document.clone());
    }

    let mut seen: HashSet<_> = state.errors.iter().map(|e| e.id).collect();
    for error in &delta.errors {
        if seen.insert(error.id) {
            state.errors.push(error.clone());
            summary.errors_recorded += 1;
        }
    }

    summary
}

pub(super) fn apply(
    state: &mut ArticleState,
    delta: &StateDelta,
) -> Result<DeltaSummary, StateConflictError> {
    validate(state, delta)?;
    Ok(commit(state, delta))
}
