//! Contracts for the external services the stages depend on.
//!
//! Each service is a trait so stages can run against real HTTP clients,
//! scripted test doubles or mocks. [`AdapterSet`] bundles one of each and
//! applies the per-call timeout.

mod set;

#[cfg(feature = "http")]
pub mod http;

pub use set::AdapterSet;

use crate::errors::AdapterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sampling and routing options for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Ask the model for a JSON object.
    #[serde(default)]
    pub json: bool,
    /// Name of the prompt that produced the request (e.g. `"plan"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            json: false,
            label: None,
        }
    }
}

/// A text generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The rendered prompt.
    pub prompt: String,
    /// Model name.
    pub model: String,
    /// Options.
    #[serde(default)]
    pub params: GenerationParams,
}

impl GenerationRequest {
    /// Creates a request with default options.
    #[must_use]
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            params: GenerationParams::default(),
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.params.label = Some(label.into());
        self
    }

    /// Requests JSON output.
    #[must_use]
    pub fn expect_json(mut self) -> Self {
        self.params.json = true;
        self
    }

    /// The label, or `"unlabelled"`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.params.label.as_deref().unwrap_or("unlabelled")
    }
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Page title.
    pub title: String,
    /// Page url.
    pub url: String,
    /// Relevant excerpt.
    #[serde(default)]
    pub snippet: String,
}

impl SearchHit {
    /// Creates a search hit.
    #[must_use]
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

/// Reference to a generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Where the image can be fetched.
    pub url: String,
    /// The prompt as rewritten by the service, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// A large language model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates text for a prompt.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AdapterError>;
}

/// A web search service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Returns up to `max_results` hits for a query.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError>;
}

/// An image generation service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generates an image in the given style.
    async fn generate_image(&self, prompt: &str, style: &str) -> Result<ImageRef, AdapterError>;
}
