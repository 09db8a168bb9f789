//! Error types for the `docqa-rag` crate.

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Errors that can occur while loading, indexing, or answering.
#[derive(Debug, Error)]
pub enum RagError {
    /// The uploaded file's type is not in the supported set.
    #[error("Unsupported document format: {format}")]
    UnsupportedFormat {
        /// The extension (or description) that was rejected.
        format: String,
    },

    /// The document content is malformed for its declared type.
    #[error("Failed to parse {format} document '{filename}': {message}")]
    Parse {
        /// The declared format.
        format: String,
        /// The declared filename.
        filename: String,
        /// A description of the failure.
        message: String,
    },

    /// No API key was supplied explicitly or through the environment.
    #[error("No API key available: pass one explicitly or set {env_var}")]
    MissingCredentials {
        /// The environment variable that was consulted.
        env_var: String,
    },

    /// The remote service rejected the credentials.
    #[error("Authentication failed ({service}): {message}")]
    Authentication {
        /// The service that rejected the request.
        service: String,
        /// A description of the failure.
        message: String,
    },

    /// A transient network or backend failure.
    #[error("Service error ({service}): {message}")]
    Service {
        /// The service that failed.
        service: String,
        /// A description of the failure.
        message: String,
    },

    /// The remote service is throttling requests.
    #[error("Rate limited ({service}): {message}")]
    RateLimited {
        /// The service that throttled the request.
        service: String,
        /// A description of the failure.
        message: String,
        /// Delay suggested by the service, if any.
        retry_after: Option<Duration>,
    },

    /// The selected model is not permitted or not served by the backend.
    #[error("Model '{model}' is not available: {message}")]
    ModelUnavailable {
        /// The requested model name.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration or template validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure staging the document on disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The category of a [`RagError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    Parse,
    MissingCredentials,
    Authentication,
    Service,
    RateLimited,
    ModelUnavailable,
    Config,
    Io,
}

impl RagError {
    /// Return the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::MissingCredentials { .. } => ErrorKind::MissingCredentials,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Service { .. } => ErrorKind::Service,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether a caller-side retry with backoff may succeed.
    ///
    /// Only transient service failures and rate limiting qualify; the
    /// pipeline itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Service | ErrorKind::RateLimited)
    }

    pub(crate) fn parse(
        format: impl Into<String>,
        filename: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse { format: format.into(), filename: filename.into(), message: message.into() }
    }

    pub(crate) fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service { service: service.into(), message: message.into() }
    }
}

/// A failed pipeline invocation: the stage that moved to `Failed` plus the
/// originating error.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    /// The stage that was running when the failure occurred.
    pub stage: PipelineStage,
    /// The originating error.
    #[source]
    pub source: RagError,
}

impl PipelineError {
    /// Return the category of the originating error.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// See [`RagError::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
