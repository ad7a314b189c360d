//! Named prompt templates with typed variables.
//!
//! Templates use `{{ name }}` placeholders. Rendering is pure: it takes the
//! variables by reference and returns an owned string.

mod defaults;

use crate::errors::TemplateError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[allow(clippy::expect_used)]
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Template names used by the built-in stages.
pub mod names {
    /// Search query generation.
    pub const RESEARCH_QUERIES: &str = "research.queries";
    /// Research summary.
    pub const RESEARCH_SUMMARY: &str = "research.summary";
    /// Outline planning.
    pub const PLAN: &str = "plan";
    /// Outline planning after a malformed response.
    pub const PLAN_STRICT: &str = "plan.strict";
    /// Section drafting.
    pub const WRITE: &str = "write";
    /// Depth check of a drafted section.
    pub const QUESTION: &str = "write.question";
    /// Rewrite of a section flagged as vague.
    pub const DEEPEN: &str = "write.deepen";
    /// Code example generation.
    pub const CODE: &str = "code";
    /// Mermaid diagram generation.
    pub const DIAGRAM: &str = "illustrate.diagram";
    /// Image prompt.
    pub const IMAGE: &str = "illustrate.image";
    /// Article review.
    pub const REVIEW: &str = "review";
    /// Section revision.
    pub const REVISE: &str = "review.revise";
}

/// A typed template value.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    /// Inserted verbatim.
    Text(String),
    /// Formatted with `Display`.
    Number(f64),
    /// One `- item` line per entry.
    List(Vec<String>),
    /// `yes` or `no`.
    Flag(bool),
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{n}"),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "- {item}")?;
                }
                Ok(())
            }
            Self::Flag(flag) => f.write_str(if *flag { "yes" } else { "no" }),
        }
    }
}

/// Variables for one render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVars {
    values: BTreeMap<String, TemplateValue>,
}

impl TemplateVars {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text value.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), TemplateValue::Text(value.into()));
        self
    }

    /// Adds a numeric value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn number(mut self, name: impl Into<String>, value: usize) -> Self {
        self.values
            .insert(name.into(), TemplateValue::Number(value as f64));
        self
    }

    /// Adds a list value.
    #[must_use]
    pub fn list<I, S>(mut self, name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values.insert(
            name.into(),
            TemplateValue::List(items.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Adds a flag.
    #[must_use]
    pub fn flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.values.insert(name.into(), TemplateValue::Flag(value));
        self
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.values.get(name)
    }
}

/// A registry of named templates.
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
}

impl PromptTemplates {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in templates.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut templates = Self::empty();
        for (name, body) in defaults::DEFAULTS {
            templates.register(*name, *body);
        }
        templates
    }

    /// Adds or replaces a template.
    pub fn register(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    /// Returns true if a template is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Renders a template.
    pub fn render(&self, name: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;

        if let Some(missing) = PLACEHOLDER
            .captures_iter(template)
            .map(|c| c[1].to_string())
            .find(|var| vars.get(var).is_none())
        {
            return Err(TemplateError::MissingVariable {
                template: name.to_string(),
                variable: missing,
            });
        }

        Ok(PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                vars.get(&caps[1]).map(ToString::to_string).unwrap_or_default()
            })
            .into_owned())
    }
}
