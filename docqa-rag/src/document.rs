//! Data types for uploaded documents, extracted segments, chunks, and search results.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Metadata key holding the source identifier (the uploaded filename).
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the 1-based page number.
pub const PAGE_KEY: &str = "page";
/// Metadata key holding the 0-based CSV data row.
pub const ROW_KEY: &str = "row";

/// The closed set of document formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
    Csv,
    Markdown,
}

impl DocumentFormat {
    /// Every supported format, in declaration order.
    pub const ALL: [DocumentFormat; 5] =
        [Self::Pdf, Self::Docx, Self::Text, Self::Csv, Self::Markdown];

    /// Infer the format from a filename extension (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnsupportedFormat`] for unknown or missing extensions.
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        Self::from_extension(&extension)
    }

    /// Map a bare extension (without the dot) to a format.
    pub fn from_extension(extension: &str) -> Result<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            "md" | "markdown" => Ok(Self::Markdown),
            "" => Err(RagError::UnsupportedFormat { format: "(no extension)".to_string() }),
            other => Err(RagError::UnsupportedFormat { format: other.to_string() }),
        }
    }

    /// The canonical extension for this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "txt",
            Self::Csv => "csv",
            Self::Markdown => "md",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// An uploaded file: raw bytes plus the declared filename.
///
/// Lives for a single pipeline invocation; nothing in this crate persists it.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    /// The raw file content.
    pub bytes: Vec<u8>,
    /// The filename as declared by the uploader.
    pub filename: String,
}

impl UploadedDocument {
    /// Create a new uploaded document.
    pub fn new(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self { bytes: bytes.into(), filename: filename.into() }
    }

    /// Infer this document's format from its filename.
    pub fn format(&self) -> Result<DocumentFormat> {
        DocumentFormat::from_filename(&self.filename)
    }

    /// A content hash identifying this upload (filename and bytes).
    pub fn identity(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.filename.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.bytes);
        hasher.finalize().to_hex().to_string()
    }
}

impl fmt::Debug for UploadedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedDocument")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A unit of extracted text with its source metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextSegment {
    /// The extracted text.
    pub text: String,
    /// Source identifier plus optional `page` / `row` fields.
    pub metadata: HashMap<String, String>,
}

impl TextSegment {
    /// Create a segment attributed to `source`.
    pub fn new(text: impl Into<String>, source: &str) -> Self {
        let metadata = HashMap::from([(SOURCE_KEY.to_string(), source.to_string())]);
        Self { text: text.into(), metadata }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// The source identifier, if set.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// A bounded passage of document text, the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk (`{source}#{position}`).
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The vector embedding for this chunk's text. Empty until indexed.
    pub embedding: Vec<f32>,
    /// Metadata inherited from the segment the chunk starts in, plus
    /// `chunk_index` and `start_char`.
    pub metadata: HashMap<String, String>,
    /// Sequence position of the chunk within its document.
    pub position: usize,
}

impl Chunk {
    /// The source identifier inherited from the originating segment.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    /// The page the chunk starts on, if the format has pages.
    pub fn page(&self) -> Option<&str> {
        self.metadata.get(PAGE_KEY).map(String::as_str)
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The cosine similarity to the query (higher is more relevant).
    pub score: f32,
}
