//! End-to-end pipeline scenarios against offline service doubles.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{ExtractiveChat, FailingChat, HashingEmbedder, TestBackend, process_document};
use docqa_rag::config::FALLBACK_API_BASE;
use docqa_rag::{
    ChatModel, ChatRequest, ConversationMemory, EmbeddingProvider, ErrorKind, ModelBackend,
    PipelineStage, QaPipeline, QuestionRequest, RagConfig, RagError, Result, ServiceConfig,
    ServiceEndpoint, UploadedDocument,
};
use docqa_telemetry::{CaptureStorage, SpanCapture};
use tracing_subscriber::layer::SubscriberExt;

const MODEL: &str = "gpt-4";
const ETCH_QUESTION: &str = "What is the etch rate?";

fn no_env() -> ServiceConfig {
    ServiceConfig::from_lookup(|_| None)
}

fn test_config() -> RagConfig {
    RagConfig::builder().chunk_size(500).chunk_overlap(100).top_k(5).build().unwrap()
}

fn pipeline(backend: Arc<TestBackend>, services: ServiceConfig, staging: &Path) -> QaPipeline {
    QaPipeline::builder()
        .config(test_config())
        .service_config(services)
        .backend(backend)
        .staging_dir(staging)
        .build()
        .unwrap()
}

fn process_txt() -> UploadedDocument {
    UploadedDocument::new(process_document(), "process.txt")
}

fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn answers_from_the_uploaded_document() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::new());
    let pipeline = pipeline(backend.clone(), no_env(), staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    let result = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap();

    assert!(result.answer.contains("120 nm/min"), "answer was {:?}", result.answer);
    assert_eq!(result.sources, vec!["process.txt"]);
    assert!(!result.source_chunks.is_empty() && result.source_chunks.len() <= 5);
    assert!(
        result.source_chunks.iter().any(|r| r.chunk.text.contains("The etch rate is 120 nm/min at 200W."))
    );
    assert!(result.standalone_question.is_none());
    assert_eq!(result.memory.len(), 1);
    assert_eq!(result.memory.turns()[0].question, ETCH_QUESTION);
    assert!(memory.is_empty());
    assert_eq!(staged_files(staging.path()), 0);
}

#[tokio::test]
async fn memory_grows_one_turn_per_question_in_order() {
    let staging = tempfile::tempdir().unwrap();
    let chat = Arc::new(ExtractiveChat::default());
    let backend = Arc::new(TestBackend::with_chat(chat.clone()));
    let pipeline = pipeline(backend, no_env(), staging.path());
    let document = process_txt();
    let follow_up = "How is the chamber pressure controlled?";

    let memory = ConversationMemory::new();
    let first = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap();
    let second = pipeline
        .answer_question(
            QuestionRequest::new(&first.memory, &document, follow_up, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap();

    let questions: Vec<&str> = second.memory.turns().iter().map(|t| t.question.as_str()).collect();
    assert_eq!(questions, [ETCH_QUESTION, follow_up]);
    assert_eq!(second.memory.turns()[0], first.memory.turns()[0]);
    assert_eq!(second.standalone_question.as_deref(), Some(follow_up));
    assert!(second.answer.contains("pressure"));

    // answer, condense, answer
    let prompts = chat.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("Standalone question:"));
    assert!(prompts[2].contains(&format!("Human: {ETCH_QUESTION}")));
}

#[tokio::test]
async fn failed_model_call_leaves_memory_and_staging_untouched() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::with_chat(Arc::new(FailingChat)));
    let pipeline = pipeline(backend, no_env(), staging.path());
    let document = process_txt();
    let mut memory = ConversationMemory::new();
    memory.append(docqa_rag::ConversationTurn::new("earlier", "answer"));

    let err = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Retrieving, "condensation runs before generation");
    assert_eq!(err.kind(), ErrorKind::Service);
    assert!(err.is_retryable());
    assert_eq!(memory.len(), 1);
    assert_eq!(staged_files(staging.path()), 0);
}

#[tokio::test]
async fn failed_generation_without_history_fails_at_generating() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::with_chat(Arc::new(FailingChat)));
    let pipeline = pipeline(backend, no_env(), staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    let err = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Generating);
    assert!(err.to_string().starts_with("generating stage failed"));
    assert!(memory.is_empty());
}

struct PendingChat;

#[async_trait]
impl ChatModel for PendingChat {
    fn name(&self) -> &str {
        "pending"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<String> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn cancelled_invocation_leaves_no_trace() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::with_chat(Arc::new(PendingChat)));
    let pipeline = pipeline(backend, no_env(), staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        pipeline.answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        ),
    )
    .await;

    assert!(outcome.is_err());
    assert!(memory.is_empty());
    assert_eq!(staged_files(staging.path()), 0);
}

#[tokio::test]
async fn stages_run_in_order_inside_one_invocation_span() {
    let staging = tempfile::tempdir().unwrap();
    let pipeline = pipeline(Arc::new(TestBackend::new()), no_env(), staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    let storage = CaptureStorage::new();
    let subscriber = tracing_subscriber::registry().with(SpanCapture::new(storage.clone()));
    let _guard = tracing::subscriber::set_default(subscriber);

    pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap();

    let stages: Vec<String> =
        storage.children_of("answer_question").into_iter().map(|s| s.name).collect();
    assert_eq!(stages, ["loading", "chunking", "indexing", "retrieving", "generating"]);

    let invocation = storage.last("answer_question").unwrap();
    let id = invocation.field("invocation_id").unwrap();
    assert!(uuid::Uuid::parse_str(&id).is_ok(), "invocation_id was {id:?}");
    assert_eq!(invocation.field("document").as_deref(), Some("process.txt"));
}

#[tokio::test]
async fn unsupported_upload_fails_at_loading() {
    let staging = tempfile::tempdir().unwrap();
    let pipeline = pipeline(Arc::new(TestBackend::new()), no_env(), staging.path());
    let document = UploadedDocument::new(b"PK\x03\x04".to_vec(), "deck.pptx");
    let memory = ConversationMemory::new();

    let err = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Loading);
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert_eq!(staged_files(staging.path()), 0);
}

#[tokio::test]
async fn environment_key_is_used_without_explicit_credentials() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::new());
    let services =
        ServiceConfig::from_lookup(|name| (name == "OPENAI_API_KEY").then(|| "X".to_string()));
    let pipeline = pipeline(backend.clone(), services, staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    pipeline
        .answer_question(QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL))
        .await
        .unwrap();

    let endpoints = backend.endpoints();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].api_key, "X");
    assert_eq!(endpoints[0].base_url, FALLBACK_API_BASE);
}

#[tokio::test]
async fn explicit_credentials_override_the_environment() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::new());
    let services = ServiceConfig::from_lookup(|name| match name {
        "OPENAI_API_KEY" => Some("X".to_string()),
        "OPENAI_API_BASE" => Some("https://env.example/v1".to_string()),
        _ => None,
    });
    let pipeline = pipeline(backend.clone(), services, staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL)
                .with_api_key("sk-explicit")
                .with_base_url("https://proxy.example/v1/"),
        )
        .await
        .unwrap();

    let endpoint = &backend.endpoints()[0];
    assert_eq!(endpoint.api_key, "sk-explicit");
    assert_eq!(endpoint.base_url, "https://proxy.example/v1");
}

#[tokio::test]
async fn missing_credentials_fail_before_any_service_call() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::new());
    let pipeline = pipeline(backend.clone(), no_env(), staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    let err = pipeline
        .answer_question(QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL))
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Idle);
    assert_eq!(err.kind(), ErrorKind::MissingCredentials);
    assert!(backend.endpoints().is_empty());
}

#[tokio::test]
async fn disallowed_model_is_rejected_up_front() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::new());
    let pipeline = pipeline(backend.clone(), no_env(), staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    let err = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, "gpt-9").with_api_key("sk-test"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Idle);
    assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    assert!(backend.endpoints().is_empty());
}

async fn ask(pipeline: &QaPipeline, memory: &ConversationMemory, document: &UploadedDocument) {
    let request =
        QuestionRequest::new(memory, document, ETCH_QUESTION, MODEL).with_api_key("sk-test");
    pipeline.answer_question(request).await.unwrap();
}

#[tokio::test]
async fn index_is_cached_per_document_and_invalidated_on_new_upload() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::new());
    let pipeline = pipeline(backend.clone(), no_env(), staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();
    ask(&pipeline, &memory, &document).await;
    let batches = backend.embedder.batch_calls.load(Ordering::SeqCst);
    assert!(batches > 0);
    assert_eq!(pipeline.cached_document().await, Some(document.identity()));

    ask(&pipeline, &memory, &document).await;
    assert_eq!(backend.embedder.batch_calls.load(Ordering::SeqCst), batches);

    let other = UploadedDocument::new(b"Anneal at 450 C for 30 minutes.".to_vec(), "anneal.txt");
    ask(&pipeline, &memory, &other).await;
    assert!(backend.embedder.batch_calls.load(Ordering::SeqCst) > batches);
    assert_eq!(pipeline.cached_document().await, Some(other.identity()));

    pipeline.clear_cache().await;
    assert_eq!(pipeline.cached_document().await, None);
}

#[tokio::test]
async fn disabled_cache_rebuilds_every_time() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(TestBackend::new());
    let config = RagConfig::builder()
        .chunk_size(500)
        .chunk_overlap(100)
        .cache_index(false)
        .build()
        .unwrap();
    let pipeline = QaPipeline::builder()
        .config(config)
        .service_config(no_env())
        .backend(backend.clone())
        .staging_dir(staging.path())
        .build()
        .unwrap();
    let document = process_txt();
    let memory = ConversationMemory::new();

    for _ in 0..2 {
        pipeline
            .answer_question(
                QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("k"),
            )
            .await
            .unwrap();
    }

    assert_eq!(backend.embedder.batch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.cached_document().await, None);
}

/// A smaller embedding model: the hashing vector folded into fewer buckets.
///
/// `query_dims` lets a misbehaving service answer queries in a different
/// dimensionality than documents.
struct FoldedEmbedder {
    declared: usize,
    document_dims: usize,
    query_dims: usize,
    batch_calls: AtomicUsize,
}

impl FoldedEmbedder {
    fn new(dims: usize) -> Self {
        Self { declared: dims, document_dims: dims, query_dims: dims, batch_calls: AtomicUsize::new(0) }
    }

    fn fold(text: &str, dims: usize) -> Vec<f32> {
        let mut folded = vec![0.0; dims];
        for (i, value) in HashingEmbedder::vector(text).into_iter().enumerate() {
            folded[i % dims] += value;
        }
        folded
    }
}

#[async_trait]
impl EmbeddingProvider for FoldedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::fold(text, self.query_dims))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::fold(t, self.document_dims)).collect())
    }

    fn dimensions(&self) -> usize {
        self.declared
    }
}

/// Serves the folded embedder to one endpoint and the hashing embedder to the rest.
struct SplitBackend {
    default: Arc<HashingEmbedder>,
    other: Arc<FoldedEmbedder>,
    other_url: &'static str,
    chat: Arc<ExtractiveChat>,
}

impl SplitBackend {
    fn new(other: FoldedEmbedder, other_url: &'static str) -> Self {
        Self {
            default: Arc::new(HashingEmbedder::default()),
            other: Arc::new(other),
            other_url,
            chat: Arc::new(ExtractiveChat::default()),
        }
    }
}

impl ModelBackend for SplitBackend {
    fn embedding_provider(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn EmbeddingProvider>> {
        if endpoint.base_url == self.other_url {
            Ok(self.other.clone())
        } else {
            Ok(self.default.clone())
        }
    }

    fn chat_model(&self, _endpoint: &ServiceEndpoint, _model: &str) -> Result<Arc<dyn ChatModel>> {
        Ok(self.chat.clone())
    }
}

fn split_pipeline(backend: Arc<SplitBackend>, staging: &Path) -> QaPipeline {
    QaPipeline::builder()
        .config(test_config())
        .service_config(no_env())
        .backend(backend)
        .staging_dir(staging)
        .build()
        .unwrap()
}

const OTHER_URL: &str = "https://other.example/v1";

#[tokio::test]
async fn switching_embedding_service_rebuilds_the_index() {
    let staging = tempfile::tempdir().unwrap();
    let backend = Arc::new(SplitBackend::new(FoldedEmbedder::new(8), OTHER_URL));
    let pipeline = split_pipeline(backend.clone(), staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap();
    assert_eq!(backend.default.batch_calls.load(Ordering::SeqCst), 1);

    let result = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL)
                .with_api_key("sk-test")
                .with_base_url(OTHER_URL),
        )
        .await
        .unwrap();
    assert_eq!(backend.other.batch_calls.load(Ordering::SeqCst), 1);
    assert!(result.source_chunks.iter().any(|r| r.score > 0.0));
    assert_eq!(pipeline.cached_document().await, Some(document.identity()));

    // same endpoint again is a cache hit
    pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL)
                .with_api_key("sk-test")
                .with_base_url(OTHER_URL),
        )
        .await
        .unwrap();
    assert_eq!(backend.other.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.default.batch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn query_of_another_dimension_fails_retrieval() {
    let staging = tempfile::tempdir().unwrap();
    let embedder = FoldedEmbedder { query_dims: 4, ..FoldedEmbedder::new(8) };
    let backend = Arc::new(SplitBackend::new(embedder, FALLBACK_API_BASE));
    let pipeline = split_pipeline(backend, staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    let err = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Retrieving);
    assert!(
        matches!(&err.source, RagError::Service { message, .. } if message == "query dimension 4 != index dimension 8"),
        "unexpected error: {err}"
    );
    assert!(memory.is_empty());
}

#[tokio::test]
async fn embeddings_must_match_the_declared_dimensions() {
    let staging = tempfile::tempdir().unwrap();
    let embedder = FoldedEmbedder { declared: 16, ..FoldedEmbedder::new(8) };
    let backend = Arc::new(SplitBackend::new(embedder, FALLBACK_API_BASE));
    let pipeline = split_pipeline(backend, staging.path());
    let document = process_txt();
    let memory = ConversationMemory::new();

    let err = pipeline
        .answer_question(
            QuestionRequest::new(&memory, &document, ETCH_QUESTION, MODEL).with_api_key("sk-test"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Indexing);
    assert_eq!(err.kind(), ErrorKind::Service);
    assert_eq!(pipeline.cached_document().await, None);
}
