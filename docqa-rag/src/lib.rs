//! # docqa-rag
//!
//! Retrieval-augmented question answering over a single uploaded document.
//!
//! ## Overview
//!
//! Each question runs through one invocation of the [`QaPipeline`]:
//!
//! - [`DocumentLoader`] - extracts text segments from PDF, DOCX, TXT, CSV or Markdown
//! - [`RecursiveChunker`] - splits text into overlapping chunks at natural breakpoints
//! - [`EmbeddingProvider`] - maps chunk text to vectors through a remote service
//! - [`VectorIndex`] - ranks chunks by cosine similarity, optionally with MMR
//! - [`ConversationMemory`] - the caller-owned log of previous turns
//! - [`AnswerGenerator`] - prompts a [`ChatModel`] with the retrieved excerpts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use docqa_rag::openai::OpenAiBackend;
//! use docqa_rag::{ConversationMemory, QaPipeline, QuestionRequest, RagConfig, UploadedDocument};
//!
//! let config = RagConfig::default();
//! let pipeline = QaPipeline::builder()
//!     .backend(Arc::new(OpenAiBackend::new(config.request_timeout())?))
//!     .config(config)
//!     .build()?;
//!
//! let document = UploadedDocument::new(std::fs::read("process.pdf")?, "process.pdf");
//! let memory = ConversationMemory::new();
//! let result = pipeline
//!     .answer_question(QuestionRequest::new(&memory, &document, "What is the etch rate?", "gpt-4"))
//!     .await?;
//! println!("{} (sources: {:?})", result.answer, result.sources);
//! ```
//!
//! ## Features
//!
//! - `openai` (default): [`openai::OpenAiBackend`] for OpenAI-compatible services

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod index;
pub mod loader;
pub mod memory;
pub mod mmr;
pub mod model;
#[cfg(feature = "openai")]
pub mod openai;
pub mod pipeline;
pub mod prompt;

pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker, Separator, default_separators};
pub use config::{
    RagConfig, RagConfigBuilder, RetrievalMode, ServiceConfig, ServiceEndpoint, resolve,
};
pub use document::{Chunk, DocumentFormat, SearchResult, TextSegment, UploadedDocument};
pub use embedding::EmbeddingProvider;
pub use error::{ErrorKind, PipelineError, RagError, Result};
pub use generator::AnswerGenerator;
pub use index::{VectorIndex, cosine_similarity};
pub use loader::{DocumentLoader, FormatProfile};
pub use memory::{ConversationMemory, ConversationTurn, ElisionPolicy};
pub use model::{ChatMessage, ChatModel, ChatRequest, ModelBackend, Role};
#[cfg(feature = "openai")]
pub use openai::OpenAiBackend;
pub use pipeline::{AnswerResult, PipelineStage, QaPipeline, QaPipelineBuilder, QuestionRequest};
pub use prompt::PromptTemplate;
