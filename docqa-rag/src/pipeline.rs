//! Question-answering pipeline orchestrator.
//!
//! The [`QaPipeline`] runs one invocation per submitted question through the
//! stages load → chunk → index → retrieve → generate, and returns the answer
//! together with an updated copy of the caller's conversation memory.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{QaPipeline, QuestionRequest, RagConfig, ServiceConfig};
//! use docqa_rag::openai::OpenAiBackend;
//!
//! let pipeline = QaPipeline::builder()
//!     .config(RagConfig::default())
//!     .service_config(ServiceConfig::from_env())
//!     .backend(Arc::new(OpenAiBackend::new(Duration::from_secs(60))?))
//!     .build()?;
//!
//! let request = QuestionRequest::new(&memory, &document, "What is the etch rate?", "gpt-4");
//! let result = pipeline.answer_question(request).await?;
//! memory = result.memory;
//! ```

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, error, info, info_span};
use uuid::Uuid;

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::{RagConfig, ServiceConfig};
use crate::document::{Chunk, SearchResult, UploadedDocument};
use crate::embedding::EmbeddingProvider;
use crate::error::{PipelineError, RagError, Result};
use crate::generator::{AnswerGenerator, distinct_sources};
use crate::index::VectorIndex;
use crate::loader::DocumentLoader;
use crate::memory::{ConversationMemory, ConversationTurn};
use crate::model::{ChatModel, ModelBackend};
use crate::prompt::PromptTemplate;

/// The state of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Idle,
    Loading,
    Chunking,
    Indexing,
    Retrieving,
    Generating,
    Done,
    Failed,
}

impl PipelineStage {
    /// The stages an invocation passes through, in order, when it succeeds
    /// without an index cache hit.
    pub const SEQUENCE: [PipelineStage; 7] = [
        Self::Idle,
        Self::Loading,
        Self::Chunking,
        Self::Indexing,
        Self::Retrieving,
        Self::Generating,
        Self::Done,
    ];

    /// The lowercase stage name, also used as its tracing span name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Chunking => "chunking",
            Self::Indexing => "indexing",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Whether the invocation has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn span(self) -> Span {
        match self {
            Self::Loading => info_span!("loading"),
            Self::Chunking => info_span!("chunking"),
            Self::Indexing => info_span!("indexing"),
            Self::Retrieving => info_span!("retrieving"),
            Self::Generating => info_span!("generating"),
            Self::Idle | Self::Done | Self::Failed => Span::current(),
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One question against one uploaded document.
///
/// Borrows the caller's memory; the caller's copy is never modified.
#[derive(Debug, Clone, Copy)]
pub struct QuestionRequest<'a> {
    /// Explicit API key; falls back to the environment-sourced key.
    pub api_key: Option<&'a str>,
    /// Explicit service endpoint; falls back to the environment, then the default.
    pub base_url: Option<&'a str>,
    /// The session's conversation so far.
    pub memory: &'a ConversationMemory,
    /// The uploaded document.
    pub document: &'a UploadedDocument,
    /// The question to answer.
    pub question: &'a str,
    /// The chat model to answer with.
    pub model: &'a str,
}

impl<'a> QuestionRequest<'a> {
    /// Create a request with environment-sourced credentials.
    pub fn new(
        memory: &'a ConversationMemory,
        document: &'a UploadedDocument,
        question: &'a str,
        model: &'a str,
    ) -> Self {
        Self { api_key: None, base_url: None, memory, document, question, model }
    }

    /// Use an explicit API key for this invocation.
    pub fn with_api_key(mut self, api_key: &'a str) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Use an explicit service endpoint for this invocation.
    pub fn with_base_url(mut self, base_url: &'a str) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// The outcome of a successful invocation.
#[derive(Debug, Clone)]
pub struct AnswerResult {
    /// The generated answer text.
    pub answer: String,
    /// The caller's memory with this turn appended.
    pub memory: ConversationMemory,
    /// Distinct source identifiers of the retrieved chunks, in first-seen order.
    pub sources: Vec<String>,
    /// The retrieved chunks, in ranking order.
    pub source_chunks: Vec<SearchResult>,
    /// The rewritten question used for retrieval, when condensation ran.
    pub standalone_question: Option<String>,
}

/// What an index was built from: the document and the embedding service.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexKey {
    document: String,
    base_url: String,
    dimensions: usize,
}

struct CachedIndex {
    key: IndexKey,
    index: Arc<VectorIndex>,
}

/// The service clients for one invocation.
struct Clients {
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    base_url: String,
}

/// The question-answering pipeline.
///
/// Holds only configuration, the model backend and an optional index cache;
/// credentials are resolved per invocation. Construct one via
/// [`QaPipeline::builder()`].
pub struct QaPipeline {
    config: RagConfig,
    services: ServiceConfig,
    backend: Arc<dyn ModelBackend>,
    loader: DocumentLoader,
    chunker: Arc<dyn Chunker>,
    generator: AnswerGenerator,
    cache: Mutex<Option<CachedIndex>>,
}

/// Run `fut` inside the span for `stage`, tagging any failure with the stage.
async fn run_stage<T>(
    stage: PipelineStage,
    fut: impl Future<Output = Result<T>>,
) -> std::result::Result<T, PipelineError> {
    fut.instrument(stage.span()).await.map_err(|source| {
        error!(%stage, error = %source, "pipeline stage failed");
        PipelineError { stage, source }
    })
}

impl QaPipeline {
    /// Create a new [`QaPipelineBuilder`].
    pub fn builder() -> QaPipelineBuilder {
        QaPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Drop the cached index, if any.
    pub async fn clear_cache(&self) {
        if self.cache.lock().await.take().is_some() {
            debug!("index cache cleared");
        }
    }

    /// The identity of the document whose index is cached, if any.
    pub async fn cached_document(&self) -> Option<String> {
        self.cache.lock().await.as_ref().map(|cached| cached.key.document.clone())
    }

    /// Answer one question about one document.
    ///
    /// On success the result carries the caller's memory with exactly one
    /// turn appended. On failure, or if the returned future is dropped, the
    /// caller's memory is unchanged and the staged document is removed.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] naming the stage that failed. Credential,
    /// model-selection and question checks fail at [`PipelineStage::Idle`],
    /// before any network call.
    pub async fn answer_question(
        &self,
        request: QuestionRequest<'_>,
    ) -> std::result::Result<AnswerResult, PipelineError> {
        let invocation_id = Uuid::new_v4();
        let span = info_span!(
            "answer_question",
            %invocation_id,
            document = %request.document.filename,
            model = request.model,
        );
        self.run(request).instrument(span).await
    }

    async fn run(
        &self,
        request: QuestionRequest<'_>,
    ) -> std::result::Result<AnswerResult, PipelineError> {
        let Clients { embedder, chat, base_url } = self.prepare(&request).map_err(|source| {
            error!(stage = %PipelineStage::Idle, error = %source, "invocation rejected");
            PipelineError { stage: PipelineStage::Idle, source }
        })?;

        let key = IndexKey {
            document: request.document.identity(),
            base_url,
            dimensions: embedder.dimensions(),
        };
        let index = self.index_for(request.document, key, embedder.as_ref()).await?;

        let history = request.memory.as_context(self.config.memory);
        let (standalone_question, source_chunks) = run_stage(PipelineStage::Retrieving, async {
            let standalone = if self.config.condense_question && !request.memory.is_empty() {
                Some(self.generator.condense(chat.as_ref(), &history, request.question).await?)
            } else {
                None
            };
            let query = standalone.as_deref().unwrap_or(request.question);
            let results = self.retrieve(&index, embedder.as_ref(), query).await?;
            Ok::<_, RagError>((standalone, results))
        })
        .await?;

        let answer = run_stage(PipelineStage::Generating, async {
            let answer = self
                .generator
                .generate(chat.as_ref(), request.question, &source_chunks, &history)
                .await?;
            info!(answer_chars = answer.chars().count(), "answer generated");
            Ok::<_, RagError>(answer)
        })
        .await?;

        let memory = request.memory.with_turn(ConversationTurn::new(request.question, &answer));
        let sources = distinct_sources(&source_chunks);
        info!(stage = %PipelineStage::Done, turns = memory.len(), sources = sources.len(), "invocation complete");

        Ok(AnswerResult { answer, memory, sources, source_chunks, standalone_question })
    }

    /// Validate the request and build this invocation's clients.
    fn prepare(&self, request: &QuestionRequest<'_>) -> Result<Clients> {
        if request.question.trim().is_empty() {
            return Err(RagError::Config("question must not be empty".to_string()));
        }
        if !self.config.is_model_allowed(request.model) {
            return Err(RagError::ModelUnavailable {
                model: request.model.to_string(),
                message: format!("allowed models are: {}", self.config.allowed_models.join(", ")),
            });
        }
        let endpoint = self.services.resolve(request.api_key, request.base_url)?;
        debug!(base_url = %endpoint.base_url, "resolved service endpoint");

        let embedder = self.backend.embedding_provider(&endpoint)?;
        let chat = self.backend.chat_model(&endpoint, request.model)?;
        Ok(Clients { embedder, chat, base_url: endpoint.base_url })
    }

    /// Return the index for `document`, building it unless an index of the
    /// same document from the same embedding service is cached.
    async fn index_for(
        &self,
        document: &UploadedDocument,
        key: IndexKey,
        embedder: &dyn EmbeddingProvider,
    ) -> std::result::Result<Arc<VectorIndex>, PipelineError> {
        if self.config.cache_index {
            if let Some(cached) = self.cache.lock().await.as_ref() {
                if cached.key == key {
                    debug!(document.id = %key.document, "index cache hit");
                    return Ok(Arc::clone(&cached.index));
                }
            }
        }

        let segments = run_stage(PipelineStage::Loading, async {
            let segments = self.loader.load(document).await?;
            info!(segment_count = segments.len(), "document loaded");
            Ok::<_, RagError>(segments)
        })
        .await?;

        let chunks = run_stage(PipelineStage::Chunking, async {
            let chunks = self.chunker.chunk(&segments);
            if chunks.is_empty() {
                return Err(RagError::parse(
                    document.format().map(|f| f.to_string()).unwrap_or_default(),
                    document.filename.as_str(),
                    "document produced no chunks",
                ));
            }
            info!(chunk_count = chunks.len(), "document chunked");
            Ok::<_, RagError>(chunks)
        })
        .await?;

        let index = run_stage(PipelineStage::Indexing, async {
            let embeddings = self.embed_chunks(embedder, &chunks).await?;
            let index = VectorIndex::build(chunks, embeddings)?;
            if index.dimensions() != key.dimensions {
                return Err(RagError::service(
                    "embeddings",
                    format!(
                        "provider declares {} dimensions but returned {}",
                        key.dimensions,
                        index.dimensions()
                    ),
                ));
            }
            info!(document.id = %key.document, chunk_count = index.len(), dimensions = index.dimensions(), "index built");
            Ok::<_, RagError>(Arc::new(index))
        })
        .await?;

        let mut cache = self.cache.lock().await;
        if self.config.cache_index {
            *cache = Some(CachedIndex { key, index: Arc::clone(&index) });
        } else {
            *cache = None;
        }
        Ok(index)
    }

    /// Embed chunk texts in ordered, bounded-concurrency batches.
    async fn embed_chunks(
        &self,
        embedder: &dyn EmbeddingProvider,
        chunks: &[Chunk],
    ) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let batch_count = texts.len().div_ceil(self.config.embed_batch_size);
        debug!(
            chunk_count = texts.len(),
            batch_count,
            concurrency = self.config.embed_concurrency,
            "embedding chunks"
        );

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(
            texts.chunks(self.config.embed_batch_size).map(|batch| embedder.embed_batch(batch)),
        )
        .buffered(self.config.embed_concurrency)
        .try_collect()
        .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    async fn retrieve(
        &self,
        index: &VectorIndex,
        embedder: &dyn EmbeddingProvider,
        query: &str,
    ) -> Result<Vec<SearchResult>> {
        let query_embedding = embedder.embed(query).await?;
        if !index.is_empty() && query_embedding.len() != index.dimensions() {
            return Err(RagError::service(
                "embeddings",
                format!(
                    "query dimension {} != index dimension {}",
                    query_embedding.len(),
                    index.dimensions()
                ),
            ));
        }
        let mut results = index.query(&query_embedding, self.config.top_k, self.config.retrieval);

        let threshold = self.config.similarity_threshold;
        if threshold > 0.0 {
            results.retain(|r| r.score >= threshold);
        }

        info!(result_count = results.len(), top_k = self.config.top_k, "chunks retrieved");
        Ok(results)
    }
}

/// Builder for constructing a [`QaPipeline`].
///
/// Only the backend is required. Call [`build()`](QaPipelineBuilder::build)
/// to validate and produce the pipeline.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = QaPipeline::builder()
///     .config(config)
///     .service_config(ServiceConfig::from_env())
///     .backend(Arc::new(backend))
///     .template(PromptTemplate::default())  // optional
///     .staging_dir("/var/tmp/docqa")         // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct QaPipelineBuilder {
    config: Option<RagConfig>,
    services: Option<ServiceConfig>,
    backend: Option<Arc<dyn ModelBackend>>,
    chunker: Option<Arc<dyn Chunker>>,
    template: Option<PromptTemplate>,
    staging_dir: Option<PathBuf>,
}

impl QaPipelineBuilder {
    /// Set the pipeline configuration. Defaults to [`RagConfig::default()`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the environment-sourced service settings. Defaults to
    /// [`ServiceConfig::from_env()`], read once at build time.
    pub fn service_config(mut self, services: ServiceConfig) -> Self {
        self.services = Some(services);
        self
    }

    /// Set the backend that builds embedding and chat clients.
    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the chunker derived from the configuration.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Replace the default prompt template.
    pub fn template(mut self, template: PromptTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Stage uploaded documents inside `dir`.
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Build the [`QaPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if the backend is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<QaPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let backend =
            self.backend.ok_or_else(|| RagError::Config("backend is required".to_string()))?;

        let mut loader = DocumentLoader::new(config.format_profile);
        if let Some(dir) = self.staging_dir {
            loader = loader.with_staging_dir(dir);
        }
        let chunker = self
            .chunker
            .unwrap_or_else(|| Arc::new(RecursiveChunker::from_config(&config)) as Arc<dyn Chunker>);
        let generator =
            AnswerGenerator::new(self.template.unwrap_or_default(), config.temperature);

        Ok(QaPipeline {
            services: self.services.unwrap_or_else(ServiceConfig::from_env),
            backend,
            loader,
            chunker,
            generator,
            cache: Mutex::new(None),
            config,
        })
    }
}
