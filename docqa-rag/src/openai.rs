//! OpenAI-compatible embedding and chat clients.
//!
//! This module is only available when the `openai` feature is enabled. It
//! talks to any service exposing `/embeddings` and `/chat/completions` in the
//! OpenAI wire format, which covers OpenAI itself and most proxies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::ServiceEndpoint;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::model::{ChatMessage, ChatModel, ChatRequest, ModelBackend};

/// The default model for embeddings.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// The dimensionality of the default embedding model.
const DEFAULT_DIMENSIONS: usize = 1536;

const EMBEDDING_SERVICE: &str = "OpenAI embeddings";
const CHAT_SERVICE: &str = "OpenAI chat";

/// A [`ModelBackend`] creating OpenAI-compatible clients.
///
/// One `reqwest::Client` (and its connection pool) is shared by every client
/// the backend creates; credentials are bound per client.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::openai::OpenAiBackend;
///
/// let backend = OpenAiBackend::new(Duration::from_secs(60))?;
/// ```
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    embedding_model: String,
    dimensions: usize,
}

impl OpenAiBackend {
    /// Create a backend whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
        })
    }
}

impl ModelBackend for OpenAiBackend {
    fn embedding_provider(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(Arc::new(OpenAIEmbeddingProvider {
            client: self.client.clone(),
            endpoint: endpoint.clone(),
            model: self.embedding_model.clone(),
            dimensions: self.dimensions,
        }))
    }

    fn chat_model(&self, endpoint: &ServiceEndpoint, model: &str) -> Result<Arc<dyn ChatModel>> {
        Ok(Arc::new(OpenAIChatModel {
            client: self.client.clone(),
            endpoint: endpoint.clone(),
            model: model.to_string(),
        }))
    }
}

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    endpoint: ServiceEndpoint,
    model: String,
    dimensions: usize,
}

/// A [`ChatModel`] backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    endpoint: ServiceEndpoint,
    model: String,
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Map a failed HTTP exchange to the error taxonomy.
///
/// `model` is set for chat requests, where a 404 or a `model_not_found`
/// code means the selected model is not served.
fn classify_failure(
    service: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    model: Option<&str>,
) -> RagError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let code = parsed.as_ref().and_then(|e| e.error.code.clone());
    let detail = parsed.map(|e| e.error.message).unwrap_or_else(|| body.trim().to_string());
    let message = format!("API returned {status}: {detail}");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RagError::Authentication { service: service.to_string(), message }
        }
        StatusCode::TOO_MANY_REQUESTS => {
            RagError::RateLimited { service: service.to_string(), message, retry_after }
        }
        _ if model.is_some()
            && (status == StatusCode::NOT_FOUND || code.as_deref() == Some("model_not_found")) =>
        {
            RagError::ModelUnavailable { model: model.unwrap_or_default().to_string(), message }
        }
        _ => RagError::service(service, message),
    }
}

fn transport_failure(service: &str, e: &reqwest::Error) -> RagError {
    if e.is_timeout() {
        RagError::service(service, format!("request timed out: {e}"))
    } else {
        RagError::service(service, format!("request failed: {e}"))
    }
}

/// POST `body` to `{base_url}/{path}` and decode the JSON response.
async fn post_json<B, R>(
    client: &reqwest::Client,
    endpoint: &ServiceEndpoint,
    path: &str,
    body: &B,
    service: &str,
    model: Option<&str>,
) -> Result<R>
where
    B: Serialize + Sync,
    R: for<'de> Deserialize<'de>,
{
    let url = format!("{}/{path}", endpoint.base_url);
    let response = client
        .post(&url)
        .bearer_auth(&endpoint.api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            error!(service, error = %e, "request failed");
            transport_failure(service, &e)
        })?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        error!(service, %status, "API error");
        return Err(classify_failure(service, status, retry_after, &body, model));
    }

    response.json::<R>().await.map_err(|e| {
        error!(service, error = %e, "failed to parse response");
        RagError::service(service, format!("failed to parse response: {e}"))
    })
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = "OpenAI", text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| RagError::service(EMBEDDING_SERVICE, "API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = "OpenAI", batch_size = texts.len(), model = %self.model, "embedding batch");

        let request = EmbeddingRequest { model: &self.model, input: texts.to_vec() };
        let mut response: EmbeddingResponse = post_json(
            &self.client,
            &self.endpoint,
            "embeddings",
            &request,
            EMBEDDING_SERVICE,
            None,
        )
        .await?;

        if response.data.len() != texts.len() {
            return Err(RagError::service(
                EMBEDDING_SERVICE,
                format!("expected {} embeddings, got {}", texts.len(), response.data.len()),
            ));
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ── ChatModel implementation ───────────────────────────────────────

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ChatRequest) -> Result<String> {
        debug!(provider = "OpenAI", model = %self.model, messages = request.messages.len(), "chat completion");

        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
        };
        let response: CompletionResponse = post_json(
            &self.client,
            &self.endpoint,
            "chat/completions",
            &body,
            CHAT_SERVICE,
            Some(&self.model),
        )
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::service(CHAT_SERVICE, "API returned no completion"))
    }
}
