//! HTTP adapters for OpenAI-compatible chat, JSON search and image endpoints.

use super::{GenerationRequest, ImageGenerator, ImageRef, SearchHit, SearchProvider, TextGenerator};
use crate::errors::AdapterError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

const TEXT: &str = "text";
const SEARCH: &str = "search";
const IMAGE: &str = "image";

/// Maps a non-success status to an adapter error.
///
/// 408, 429 and 5xx may succeed on retry; every other status is permanent.
#[must_use]
pub fn classify_status(service: &str, status: StatusCode, body: &str) -> AdapterError {
    let message = format!("HTTP {}: {}", status.as_u16(), crate::utils::truncate_chars(body, 200));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        AdapterError::transient(service, message)
    } else {
        AdapterError::permanent(service, message)
    }
}

/// Maps a transport error to an adapter error.
#[must_use]
pub fn classify_transport(service: &str, err: &reqwest::Error) -> AdapterError {
    if err.is_decode() || err.is_builder() {
        AdapterError::permanent(service, err.to_string())
    } else {
        AdapterError::transient(service, err.to_string())
    }
}

async fn send_json<T: for<'de> Deserialize<'de>>(
    service: &str,
    request: RequestBuilder,
) -> Result<T, AdapterError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(service, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status, &body));
    }

    let body = response
        .text()
        .await
        .map_err(|e| classify_transport(service, &e))?;
    serde_json::from_str(&body)
        .map_err(|e| AdapterError::permanent(service, format!("undecodable response: {e}")))
}

fn authorize(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Text generator for `/v1/chat/completions` compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiTextGenerator {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl OpenAiTextGenerator {
    /// Creates a generator reading `OPENAI_API_KEY` from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY not set, text generation requests are unauthenticated");
        }
        Self {
            client: Client::new(),
            api_key,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    /// Uses a custom endpoint (local proxies, compatible servers).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn body(request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.params.temperature,
        });
        if request.params.json {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        let http = authorize(
            self.client.post(&self.endpoint).json(&Self::body(request)),
            self.api_key.as_deref(),
        );
        let response: ChatResponse = send_json(TEXT, http).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| AdapterError::permanent(TEXT, "response has no content"))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    #[serde(default, alias = "content")]
    snippet: String,
}

/// Search provider for endpoints accepting `{query, max_results}` and
/// returning `{results: [{title, url, snippet|content}]}`.
#[derive(Debug, Clone)]
pub struct JsonSearchProvider {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl JsonSearchProvider {
    /// Creates a provider for an endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: None,
            endpoint: endpoint.into(),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl SearchProvider for JsonSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError> {
        let http = authorize(
            self.client
                .post(&self.endpoint)
                .json(&serde_json::json!({"query": query, "max_results": max_results})),
            self.api_key.as_deref(),
        );
        let response: SearchResponse = send_json(SEARCH, http).await?;
        Ok(response
            .results
            .into_iter()
            .take(max_results)
            .map(|r| SearchHit::new(r.title, r.url, r.snippet))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

/// Image generator for `/v1/images/generations` compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiImageGenerator {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    size: String,
}

impl OpenAiImageGenerator {
    /// Creates a generator reading `OPENAI_API_KEY` from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            client: Client::new(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            endpoint: "https://api.openai.com/v1/images/generations".to_string(),
            model: "dall-e-3".to_string(),
            size: "1024x1024".to_string(),
        }
    }

    /// Uses a custom endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the image model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate_image(&self, prompt: &str, style: &str) -> Result<ImageRef, AdapterError> {
        let http = authorize(
            self.client.post(&self.endpoint).json(&serde_json::json!({
                "model": self.model,
                "prompt": format!("{prompt}. Style: {style}"),
                "n": 1,
                "size": self.size,
            })),
            self.api_key.as_deref(),
        );
        let response: ImageResponse = send_json(IMAGE, http).await?;
        response
            .data
            .into_iter()
            .next()
            .and_then(|d| d.url.map(|url| ImageRef { url, revised_prompt: d.revised_prompt }))
            .ok_or_else(|| AdapterError::permanent(IMAGE, "response has no image url"))
    }
}
