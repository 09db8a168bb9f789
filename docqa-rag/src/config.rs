//! Configuration for the question-answering pipeline and its remote services.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::{Separator, default_separators};
use crate::error::{RagError, Result};
use crate::loader::FormatProfile;
use crate::memory::ElisionPolicy;

/// Environment variables consulted for the API key, in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["OPENAI_API_KEY", "COURSE_API_KEY"];

/// Environment variable consulted for the service endpoint.
pub const API_BASE_ENV_VAR: &str = "OPENAI_API_BASE";

/// Endpoint used when neither the caller nor the environment provides one.
pub const FALLBACK_API_BASE: &str = "https://api.aigc369.com/v1";

/// How the vector index selects the top-k chunks for a question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Plain nearest-neighbour ranking by cosine similarity.
    Similarity,
    /// Maximal marginal relevance over the `fetch_k` nearest candidates.
    ///
    /// `lambda = 1.0` is pure relevance, `lambda = 0.0` pure diversity.
    Mmr { fetch_k: usize, lambda: f32 },
}

impl Default for RetrievalMode {
    fn default() -> Self {
        Self::Similarity
    }
}

/// Configuration parameters for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Boundary markers tried from coarsest to finest.
    pub separators: Vec<Separator>,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Ranking strategy for retrieval.
    pub retrieval: RetrievalMode,
    /// How conversation history is bounded in the prompt.
    pub memory: ElisionPolicy,
    /// Rewrite follow-up questions into standalone ones before retrieval.
    pub condense_question: bool,
    /// Sampling temperature for the language model.
    pub temperature: f32,
    /// Number of chunk texts sent per embedding request.
    pub embed_batch_size: usize,
    /// Maximum embedding requests in flight for one document.
    pub embed_concurrency: usize,
    /// Which upload formats are accepted.
    pub format_profile: FormatProfile,
    /// Model names callers may select. Empty means any model.
    pub allowed_models: Vec<String>,
    /// Per-request timeout for remote calls, in seconds.
    pub request_timeout_secs: u64,
    /// Reuse the index across questions about the same upload.
    pub cache_index: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 400,
            separators: default_separators(),
            top_k: 5,
            similarity_threshold: 0.0,
            retrieval: RetrievalMode::Similarity,
            memory: ElisionPolicy::KeepAll,
            condense_question: true,
            temperature: 0.2,
            embed_batch_size: 64,
            embed_concurrency: 4,
            format_profile: FormatProfile::Full,
            allowed_models: vec!["gpt-3.5-turbo".to_string(), "gpt-4".to_string()],
            request_timeout_secs: 60,
            cache_index: true,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// The per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether `model` may be selected under this configuration.
    pub fn is_model_allowed(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - MMR is selected with `fetch_k < top_k` or `lambda` outside `[0, 1]`
    /// - `embed_batch_size` or `embed_concurrency` is zero
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if let RetrievalMode::Mmr { fetch_k, lambda } = self.retrieval {
            if fetch_k < self.top_k {
                return Err(RagError::Config(format!(
                    "fetch_k ({fetch_k}) must be at least top_k ({})",
                    self.top_k
                )));
            }
            if !(0.0..=1.0).contains(&lambda) {
                return Err(RagError::Config(format!("lambda ({lambda}) must be within [0, 1]")));
            }
        }
        if self.embed_batch_size == 0 || self.embed_concurrency == 0 {
            return Err(RagError::Config(
                "embed_batch_size and embed_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Start from an existing configuration (for example one read from a file).
    pub fn from_config(config: RagConfig) -> Self {
        Self { config }
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Replace the boundary markers used by the chunker.
    pub fn separators(mut self, separators: Vec<Separator>) -> Self {
        self.config.separators = separators;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the retrieval strategy.
    pub fn retrieval(mut self, mode: RetrievalMode) -> Self {
        self.config.retrieval = mode;
        self
    }

    /// Set the history elision policy.
    pub fn memory(mut self, policy: ElisionPolicy) -> Self {
        self.config.memory = policy;
        self
    }

    /// Enable or disable follow-up question condensation.
    pub fn condense_question(mut self, enabled: bool) -> Self {
        self.config.condense_question = enabled;
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set the embedding batch size.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the number of concurrent embedding requests.
    pub fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embed_concurrency = concurrency;
        self
    }

    /// Set the accepted upload formats.
    pub fn format_profile(mut self, profile: FormatProfile) -> Self {
        self.config.format_profile = profile;
        self
    }

    /// Restrict the selectable models. An empty list allows any model.
    pub fn allowed_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-request timeout in seconds.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Enable or disable the per-upload index cache.
    pub fn cache_index(mut self, enabled: bool) -> Self {
        self.config.cache_index = enabled;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Resolve a setting: explicit value, else environment-sourced value, else fallback.
///
/// Empty strings count as absent.
pub fn resolve<T: AsRef<str>>(
    explicit: Option<T>,
    env_sourced: Option<T>,
    fallback: Option<T>,
) -> Option<String> {
    [explicit, env_sourced, fallback]
        .into_iter()
        .flatten()
        .map(|v| v.as_ref().trim().to_string())
        .find(|v| !v.is_empty())
}

/// Credentials and endpoint for one invocation, after resolution.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// The API key sent as a bearer token.
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API (no trailing slash).
    pub base_url: String,
}

impl std::fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Environment-sourced service settings, captured once at construction.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// API key read from the environment, if any.
    pub env_api_key: Option<String>,
    /// Endpoint read from the environment, if any.
    pub env_base_url: Option<String>,
    /// Endpoint used when no other is available.
    pub fallback_base_url: String,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("env_api_key", &self.env_api_key.as_ref().map(|_| "<redacted>"))
            .field("env_base_url", &self.env_base_url)
            .field("fallback_base_url", &self.fallback_base_url)
            .finish()
    }
}

impl ServiceConfig {
    /// Capture service settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Capture service settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env_api_key = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty());
        Self {
            env_api_key,
            env_base_url: lookup(API_BASE_ENV_VAR),
            fallback_base_url: FALLBACK_API_BASE.to_string(),
        }
    }

    /// Resolve the key and endpoint for one invocation.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::MissingCredentials`] if neither an explicit nor an
    /// environment-sourced key is available.
    pub fn resolve(
        &self,
        explicit_key: Option<&str>,
        explicit_base_url: Option<&str>,
    ) -> Result<ServiceEndpoint> {
        let api_key = resolve(explicit_key, self.env_api_key.as_deref(), None).ok_or_else(|| {
            RagError::MissingCredentials { env_var: API_KEY_ENV_VARS[0].to_string() }
        })?;
        let base_url = resolve(
            explicit_base_url,
            self.env_base_url.as_deref(),
            Some(self.fallback_base_url.as_str()),
        )
        .unwrap_or_else(|| FALLBACK_API_BASE.to_string());
        Ok(ServiceEndpoint { api_key, base_url: base_url.trim_end_matches('/').to_string() })
    }
}
