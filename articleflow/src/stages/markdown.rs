//! Markdown rendering of the finished article.

use super::code::replace_placeholders;
use super::parsing::slugify;
use crate::state::{
    ArticleMetadata, AssembledDocument, Asset, AssetId, AssetSource, Citation, CodeBlock, Section,
    SectionContent, SectionId,
};
use crate::utils::content_digest;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

const GAP_NOTICE: &str = "> *This section could not be generated.*";

/// Everything the renderer reads.
#[derive(Debug, Clone, Copy)]
pub struct DocumentParts<'a> {
    /// Fallback title.
    pub topic: &'a str,
    /// Planner title and subtitle.
    pub metadata: Option<&'a ArticleMetadata>,
    /// Section order.
    pub outline: &'a [Section],
    /// Section content.
    pub sections: &'a BTreeMap<SectionId, SectionContent>,
    /// Diagrams and images.
    pub assets: &'a BTreeMap<AssetId, Asset>,
    /// References.
    pub citations: &'a [Citation],
}

/// Builds GitHub-style anchors, suffixing repeats with `-1`, `-2`, ...
#[derive(Debug, Default)]
struct Anchors(HashMap<String, usize>);

impl Anchors {
    fn next(&mut self, title: &str) -> String {
        let base = slugify(title);
        let seen = self.0.entry(base.clone()).or_insert(0);
        let anchor = if *seen == 0 {
            base
        } else {
            format!("{base}-{seen}")
        };
        *seen += 1;
        anchor
    }
}

fn render_code(block: &CodeBlock) -> String {
    let mut out = format!("```{}\n{}\n```", block.language, block.code.trim_end());
    if let Some(output) = block.output.as_deref().filter(|o| !o.trim().is_empty()) {
        let _ = write!(out, "\n\n**Output:**\n\n```text\n{}\n```", output.trim_end());
    }
    if !block.explanation.trim().is_empty() {
        let _ = write!(out, "\n\n{}", block.explanation.trim());
    }
    format!("\n\n{out}\n\n")
}

fn render_asset(asset: &Asset) -> String {
    match &asset.source {
        AssetSource::Mermaid(source) => {
            format!("```mermaid\n{}\n```\n\n*{}*", source.trim_end(), asset.description)
        }
        AssetSource::Url(url) => format!("![{}]({url})", asset.description),
    }
}

fn render_section(content: &SectionContent, assets: &BTreeMap<AssetId, Asset>) -> String {
    if content.is_blank() {
        return GAP_NOTICE.to_string();
    }

    let blocks: HashMap<&str, &CodeBlock> = content
        .code_blocks
        .iter()
        .map(|b| (b.id.as_str(), b))
        .collect();
    let mut used = HashSet::new();
    let mut body = replace_placeholders(&content.text, |id| match blocks.get(id) {
        Some(block) => {
            used.insert(id.to_string());
            render_code(block)
        }
        None => String::new(),
    });

    for block in content.code_blocks.iter().filter(|b| !used.contains(&b.id)) {
        body.push_str(&render_code(block));
    }
    for asset in content.illustrations.iter().filter_map(|id| assets.get(id)) {
        body.push_str("\n\n");
        body.push_str(&render_asset(asset));
    }
    body
}

/// Collapses runs of blank lines and trims trailing spaces outside code fences.
#[must_use]
pub fn normalize_spacing(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut in_fence = false;
    let mut blank_run = 0;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            blank_run = 0;
            out.push_str(line.trim_end());
            out.push('\n');
            continue;
        }
        if in_fence {
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }

    let trimmed = out.trim_end();
    format!("{trimmed}\n")
}

/// Renders the article and its statistics.
#[must_use]
pub fn render_document(parts: &DocumentParts<'_>) -> AssembledDocument {
    let title = parts
        .metadata
        .map(|m| m.title.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(parts.topic);
    let mut md = format!("# {title}\n\n");
    if let Some(subtitle) = parts.metadata.map(|m| m.subtitle.trim()).filter(|s| !s.is_empty()) {
        let _ = writeln!(md, "*{subtitle}*\n");
    }

    let mut anchors = Anchors::default();
    let headings: Vec<(&Section, String)> = parts
        .outline
        .iter()
        .map(|s| (s, anchors.next(&s.title)))
        .collect();

    md.push_str("## Contents\n\n");
    for (section, anchor) in &headings {
        let _ = writeln!(md, "- [{}](#{anchor})", section.title);
    }

    let mut gaps = Vec::new();
    for (section, _) in &headings {
        let content = parts.sections.get(&section.id).cloned().unwrap_or_default();
        if content.is_blank() {
            gaps.push(section.id.clone());
        }
        let _ = write!(
            md,
            "\n## {}\n\n{}\n",
            section.title,
            render_section(&content, parts.assets)
        );
    }

    if !parts.citations.is_empty() {
        md.push_str("\n## References\n\n");
        for (n, citation) in parts.citations.iter().enumerate() {
            let title = if citation.title.trim().is_empty() {
                citation.url.as_str()
            } else {
                citation.title.trim()
            };
            let _ = writeln!(md, "{}. [{title}]({})", n + 1, citation.url);
        }
    }

    let markdown = normalize_spacing(&md);
    AssembledDocument {
        word_count: markdown.split_whitespace().count(),
        digest: content_digest(&[&markdown]),
        markdown,
        gaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AssetKind;
    use pretty_assertions::assert_eq;

    fn content(text: &str) -> SectionContent {
        SectionContent {
            text: text.to_string(),
            ..SectionContent::default()
        }
    }

    #[test]
    fn test_normalize_spacing_keeps_code_intact() {
        let input = "\n\n# T\n\n\n\ntext   \n```py\na = 1\n\n\nb = 2\n```\n\n\n";
        assert_eq!(normalize_spacing(input), "# T\n\ntext\n```py\na = 1\n\n\nb = 2\n```\n");
    }

    #[test]
    fn test_anchors_deduplicate() {
        let mut anchors = Anchors::default();
        assert_eq!(anchors.next("Setup"), "setup");
        assert_eq!(anchors.next("Setup"), "setup-1");
    }

    #[test]
    fn test_render_section_substitutes_code_and_assets() {
        let mut section = content("Intro.\n\n[CODE: set - store a key]\n\nDone.");
        section.code_blocks = vec![
            CodeBlock {
                id: "set".to_string(),
                language: "python".to_string(),
                code: "r.set('k', 'v')".to_string(),
                output: Some("True".to_string()),
                explanation: "Stores a key.".to_string(),
            },
            CodeBlock {
                id: "extra".to_string(),
                language: "bash".to_string(),
                code: "redis-cli ping".to_string(),
                output: None,
                explanation: String::new(),
            },
        ];
        section.illustrations = vec!["abc".to_string()];
        let assets = BTreeMap::from([(
            "abc".to_string(),
            Asset {
                id: "abc".to_string(),
                kind: AssetKind::Diagram,
                section_id: "usage".to_string(),
                description: "Flow".to_string(),
                source: AssetSource::Mermaid("graph TD\nA-->B".to_string()),
            },
        )]);

        let body = render_section(&section, &assets);
        let set_at = body.find("```python").unwrap();
        let done_at = body.find("Done.").unwrap();
        assert!(set_at < done_at);
        assert!(body.contains("**Output:**"));
        assert!(body.find("```bash").unwrap() > done_at);
        assert!(body.contains("```mermaid\ngraph TD\nA-->B\n```"));
        assert!(!body.contains("[CODE:"));
    }

    #[test]
    fn test_render_document_structure() {
        let outline = vec![
            Section::new("intro", "Intro", ""),
            Section::new("usage", "Usage", ""),
        ];
        let sections = BTreeMap::from([
            ("intro".to_string(), content("Redis is an in-memory store.")),
            ("usage".to_string(), SectionContent::default()),
        ]);
        let metadata = ArticleMetadata {
            title: "Redis Basics".to_string(),
            subtitle: "A quick tour".to_string(),
        };
        let citations = vec![Citation::new("https://redis.io", "Redis", "")];
        let assets = BTreeMap::new();

        let doc = render_document(&DocumentParts {
            topic: "redis",
            metadata: Some(&metadata),
            outline: &outline,
            sections: &sections,
            assets: &assets,
            citations: &citations,
        });

        assert!(doc.markdown.starts_with("# Redis Basics\n\n*A quick tour*\n\n## Contents\n\n- [Intro](#intro)\n- [Usage](#usage)\n"));
        assert!(doc.markdown.contains(GAP_NOTICE));
        assert!(doc.markdown.ends_with("## References\n\n1. [Redis](https://redis.io)\n"));
        assert_eq!(doc.gaps, vec!["usage"]);
        assert_eq!(doc.word_count, doc.markdown.split_whitespace().count());
        assert_eq!(doc.digest.len(), 64);
        assert!(!doc.markdown.contains("\n\n\n"));
    }
}
