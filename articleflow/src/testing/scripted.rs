//! Deterministic adapters keyed by request label.

use crate::adapters::{GenerationRequest, ImageGenerator, ImageRef, SearchHit, SearchProvider, TextGenerator};
use crate::errors::AdapterError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Error(AdapterError),
}

impl Reply {
    fn into_result(self) -> Result<String, AdapterError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Error(err) => Err(err),
        }
    }
}

#[derive(Debug)]
struct Rule {
    label: String,
    /// Only applies when the prompt contains this text.
    matching: Option<String>,
    once: bool,
    reply: Reply,
}

#[derive(Debug, Default)]
struct Script {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
}

/// A text generator that answers by request label.
///
/// Lookup order for a request: `fail_matching` rules whose text appears in
/// the prompt, then unconsumed `respond_once` replies, then the latest
/// `respond`/`fail` for the label. Unscripted labels fail permanently.
/// Clones share the script and the call record.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTextGenerator {
    script: Arc<Script>,
}

impl ScriptedTextGenerator {
    /// Creates a generator with no replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, label: &str, matching: Option<String>, once: bool, reply: Reply) -> Self {
        self.script.rules.lock().push(Rule {
            label: label.to_string(),
            matching,
            once,
            reply,
        });
        self
    }

    /// Answers every `label` request with `text`.
    #[must_use]
    pub fn respond(self, label: &str, text: impl Into<String>) -> Self {
        self.push(label, None, false, Reply::Text(text.into()))
    }

    /// Answers the next `label` request with `text`.
    #[must_use]
    pub fn respond_once(self, label: &str, text: impl Into<String>) -> Self {
        self.push(label, None, true, Reply::Text(text.into()))
    }

    /// Fails every `label` request.
    #[must_use]
    pub fn fail(self, label: &str, error: AdapterError) -> Self {
        self.push(label, None, false, Reply::Error(error))
    }

    /// Fails `label` requests whose prompt contains `needle`.
    #[must_use]
    pub fn fail_matching(self, label: &str, needle: impl Into<String>, error: AdapterError) -> Self {
        self.push(label, Some(needle.into()), false, Reply::Error(error))
    }

    /// Sleeps before every reply.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.script.delay.lock() = Some(delay);
        self
    }

    /// Total number of requests received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.script.calls.lock().len()
    }

    /// Prompts received for `label`, in call order.
    #[must_use]
    pub fn prompts(&self, label: &str) -> Vec<String> {
        self.script
            .calls
            .lock()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    fn reply_for(&self, label: &str, prompt: &str) -> Reply {
        let mut rules = self.script.rules.lock();
        if let Some(rule) = rules.iter().find(|r| {
            r.label == label && r.matching.as_deref().is_some_and(|needle| prompt.contains(needle))
        }) {
            return rule.reply.clone();
        }
        if let Some(pos) = rules.iter().position(|r| r.label == label && r.once) {
            return rules.remove(pos).reply;
        }
        rules
            .iter()
            .rev()
            .find(|r| r.label == label && r.matching.is_none())
            .map_or_else(
                || Reply::Error(AdapterError::permanent("text", format!("no scripted reply for '{label}'"))),
                |r| r.reply.clone(),
            )
    }
}

#[async_trait]
impl TextGenerator for ScriptedTextGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        let label = request.label().to_string();
        self.script
            .calls
            .lock()
            .push((label.clone(), request.prompt.clone()));
        let reply = self.reply_for(&label, &request.prompt);

        let delay = *self.script.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply.into_result()
    }
}

#[derive(Debug, Default)]
struct SearchScript {
    hits: HashMap<String, Vec<SearchHit>>,
    default_hits: Vec<SearchHit>,
    failures: HashMap<String, AdapterError>,
}

/// A search provider with fixed results per query.
#[derive(Debug, Clone, Default)]
pub struct StaticSearchProvider {
    script: Arc<Mutex<SearchScript>>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl StaticSearchProvider {
    /// Creates a provider that returns nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Results for one exact query.
    #[must_use]
    pub fn with_hits(self, query: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        self.script.lock().hits.insert(query.into(), hits);
        self
    }

    /// Results for every query without its own entry.
    #[must_use]
    pub fn with_default_hits(self, hits: Vec<SearchHit>) -> Self {
        self.script.lock().default_hits = hits;
        self
    }

    /// Fails one exact query.
    #[must_use]
    pub fn failing_query(self, query: impl Into<String>, error: AdapterError) -> Self {
        self.script.lock().failures.insert(query.into(), error);
        self
    }

    /// Queries received, in call order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError> {
        self.queries.lock().push(query.to_string());
        let script = self.script.lock();
        if let Some(err) = script.failures.get(query) {
            return Err(err.clone());
        }
        let hits = script.hits.get(query).unwrap_or(&script.default_hits);
        Ok(hits.iter().take(max_results).cloned().collect())
    }
}

/// An image generator that returns a fixed url.
#[derive(Debug, Clone, Default)]
pub struct ScriptedImageGenerator {
    reply: Arc<Mutex<Option<Result<String, AdapterError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedImageGenerator {
    /// Creates a generator that fails until scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every request with `url`.
    #[must_use]
    pub fn respond(self, url: impl Into<String>) -> Self {
        *self.reply.lock() = Some(Ok(url.into()));
        self
    }

    /// Fails every request.
    #[must_use]
    pub fn fail(self, error: AdapterError) -> Self {
        *self.reply.lock() = Some(Err(error));
        self
    }

    /// Prompts received, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ImageGenerator for ScriptedImageGenerator {
    async fn generate_image(&self, prompt: &str, _style: &str) -> Result<ImageRef, AdapterError> {
        self.prompts.lock().push(prompt.to_string());
        match self.reply.lock().clone() {
            Some(Ok(url)) => Ok(ImageRef {
                url,
                revised_prompt: None,
            }),
            Some(Err(err)) => Err(err),
            None => Err(AdapterError::permanent("image", "no scripted image")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(label: &str, prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt, "test-model").with_label(label)
    }

    #[tokio::test]
    async fn test_reply_precedence() {
        let text = ScriptedTextGenerator::new()
            .respond("write", "default")
            .respond_once("write", "first")
            .fail_matching("write", "\"Usage\"", AdapterError::permanent("text", "filtered"));

        assert_eq!(text.generate(&request("write", "a")).await.unwrap(), "first");
        assert_eq!(text.generate(&request("write", "b")).await.unwrap(), "default");
        assert!(text.generate(&request("write", "\"Usage\"")).await.is_err());
        assert!(text.generate(&request("plan", "c")).await.is_err());
        assert_eq!(text.calls(), 4);
        assert_eq!(text.prompts("write"), vec!["a", "b", "\"Usage\""]);
    }

    #[tokio::test]
    async fn test_static_search() {
        let search = StaticSearchProvider::new()
            .with_default_hits(vec![
                SearchHit::new("A", "https://a", "a"),
                SearchHit::new("B", "https://b", "b"),
            ])
            .failing_query("bad", AdapterError::transient("search", "429"));

        assert_eq!(search.search("anything", 1).await.unwrap().len(), 1);
        assert!(search.search("bad", 5).await.unwrap_err().is_transient());
        assert_eq!(search.queries(), vec!["anything", "bad"]);
    }

    #[tokio::test]
    async fn test_image_generator_needs_script() {
        assert!(ScriptedImageGenerator::new().generate_image("p", "s").await.is_err());
        let image = ScriptedImageGenerator::new().respond("https://img/1.png");
        assert_eq!(image.generate_image("p", "s").await.unwrap().url, "https://img/1.png");
        assert_eq!(image.prompts(), vec!["p"]);
    }
}
