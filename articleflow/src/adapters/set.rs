//! The bundle of adapters handed to every stage.

use super::{GenerationRequest, ImageGenerator, ImageRef, SearchHit, SearchProvider, TextGenerator};
use crate::errors::AdapterError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const TEXT: &str = "text";
const SEARCH: &str = "search";
const IMAGE: &str = "image";

/// Text, search and (optional) image adapters with a per-call timeout.
#[derive(Clone)]
pub struct AdapterSet {
    text: Arc<dyn TextGenerator>,
    search: Arc<dyn SearchProvider>,
    image: Option<Arc<dyn ImageGenerator>>,
    timeout: Duration,
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSet")
            .field("has_image", &self.image.is_some())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AdapterSet {
    /// Creates a set without an image generator and a 60 second timeout.
    #[must_use]
    pub fn new(text: Arc<dyn TextGenerator>, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            text,
            search,
            image: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Adds an image generator.
    #[must_use]
    pub fn with_image(mut self, image: Arc<dyn ImageGenerator>) -> Self {
        self.image = Some(image);
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true if an image generator is configured.
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    async fn timed<T>(
        &self,
        service: &'static str,
        call: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, AdapterError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::transient(
                service,
                format!("timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }

    /// Generates text.
    #[instrument(skip(self, request), fields(label = %request.label(), model = %request.model))]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        let result = self.timed(TEXT, self.text.generate(request)).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Text generation failed");
        }
        result
    }

    /// Runs a web search.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError> {
        let result = self.timed(SEARCH, self.search.search(query, max_results)).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Search failed");
        }
        result
    }

    /// Generates an image.
    #[instrument(skip(self, prompt))]
    pub async fn generate_image(&self, prompt: &str, style: &str) -> Result<ImageRef, AdapterError> {
        let Some(image) = &self.image else {
            return Err(AdapterError::permanent(IMAGE, "no image generator configured"));
        };
        let result = self.timed(IMAGE, image.generate_image(prompt, style)).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Image generation failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockImageGenerator, MockSearchProvider, MockTextGenerator};
    use async_trait::async_trait;

    struct SlowText;

    #[async_trait]
    impl TextGenerator for SlowText {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, AdapterError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_transient_error() {
        let set = AdapterSet::new(Arc::new(SlowText), Arc::new(MockSearchProvider::new()))
            .with_timeout(Duration::from_millis(100));

        let err = set
            .generate(&GenerationRequest::new("p", "m"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_search_passes_through() {
        let mut search = MockSearchProvider::new();
        search
            .expect_search()
            .withf(|q, n| q == "redis tutorial" && *n == 3)
            .returning(|_, _| Ok(vec![SearchHit::new("Redis", "https://redis.io", "store")]));

        let set = AdapterSet::new(Arc::new(MockTextGenerator::new()), Arc::new(search));
        let hits = set.search("redis tutorial", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_image_generator_is_permanent() {
        let set = AdapterSet::new(
            Arc::new(MockTextGenerator::new()),
            Arc::new(MockSearchProvider::new()),
        );
        assert!(!set.has_image());
        let err = set.generate_image("cache", "flat").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_image_generator_errors_propagate() {
        let mut image = MockImageGenerator::new();
        image
            .expect_generate_image()
            .returning(|_, _| Err(AdapterError::transient("image", "503")));

        let set = AdapterSet::new(
            Arc::new(MockTextGenerator::new()),
            Arc::new(MockSearchProvider::new()),
        )
        .with_image(Arc::new(image));
        assert!(set.generate_image("cache", "flat").await.unwrap_err().is_transient());
    }
}
