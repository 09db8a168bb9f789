//! Language-model client interface and backend factory.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ServiceEndpoint;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// The author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message sent to a chat model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// A user-authored message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// A completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// A chat-completion language model bound to one model name.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// The model name requests are sent to.
    fn name(&self) -> &str;

    /// Produce the assistant's reply to `request`.
    ///
    /// # Errors
    ///
    /// [`RagError::Authentication`](crate::RagError::Authentication),
    /// [`RagError::ModelUnavailable`](crate::RagError::ModelUnavailable),
    /// [`RagError::RateLimited`](crate::RagError::RateLimited) or
    /// [`RagError::Service`](crate::RagError::Service).
    async fn complete(&self, request: ChatRequest) -> Result<String>;
}

/// Builds service clients for one invocation from resolved credentials.
///
/// The pipeline resolves credentials per invocation and asks the backend for
/// fresh clients, so no credential ever lives in process-wide state.
pub trait ModelBackend: Send + Sync {
    /// An embedding provider authenticated against `endpoint`.
    fn embedding_provider(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn EmbeddingProvider>>;

    /// A chat model named `model`, authenticated against `endpoint`.
    fn chat_model(&self, endpoint: &ServiceEndpoint, model: &str) -> Result<Arc<dyn ChatModel>>;
}
