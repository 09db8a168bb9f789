//! Document loading: uploaded bytes → ordered [`TextSegment`]s.
//!
//! Format dispatch is a closed `match` over [`DocumentFormat`]. Extraction
//! runs against a staged temporary file; the staging guard deletes it on
//! every exit path (success, parse failure, panic inside the extractor, or
//! the caller dropping the future).

mod formats;

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::document::{DocumentFormat, TextSegment, UploadedDocument};
use crate::error::{RagError, Result};

/// Which upload formats a deployment accepts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatProfile {
    /// PDF, DOCX, TXT, CSV and Markdown.
    #[default]
    Full,
    /// PDF uploads only.
    PdfOnly,
}

impl FormatProfile {
    /// Whether this profile accepts `format`.
    pub fn allows(self, format: DocumentFormat) -> bool {
        match self {
            Self::Full => true,
            Self::PdfOnly => format == DocumentFormat::Pdf,
        }
    }

    /// The formats accepted by this profile.
    pub fn formats(self) -> Vec<DocumentFormat> {
        DocumentFormat::ALL.into_iter().filter(|f| self.allows(*f)).collect()
    }
}

/// Converts uploaded documents into text segments.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{DocumentLoader, UploadedDocument};
///
/// let loader = DocumentLoader::default();
/// let segments = loader.load(&UploadedDocument::new(bytes, "manual.pdf")).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    profile: FormatProfile,
    staging_dir: Option<PathBuf>,
}

impl DocumentLoader {
    /// Create a loader accepting the formats of `profile`.
    pub fn new(profile: FormatProfile) -> Self {
        Self { profile, staging_dir: None }
    }

    /// Stage uploads inside `dir` instead of the OS temp directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// The accepted formats.
    pub fn profile(&self) -> FormatProfile {
        self.profile
    }

    /// Extract ordered text segments from an uploaded document.
    ///
    /// # Errors
    ///
    /// - [`RagError::UnsupportedFormat`] if the filename's type is unknown or
    ///   outside the configured profile
    /// - [`RagError::Parse`] if the content is malformed for its type or
    ///   holds no text
    /// - [`RagError::Io`] if the document cannot be staged
    pub async fn load(&self, document: &UploadedDocument) -> Result<Vec<TextSegment>> {
        let format = document.format()?;
        if !self.profile.allows(format) {
            warn!(filename = %document.filename, %format, "format rejected by profile");
            return Err(RagError::UnsupportedFormat { format: format.to_string() });
        }

        let staged = self.stage(document, format)?;
        let path = staged.path().to_path_buf();
        debug!(filename = %document.filename, path = %path.display(), "staged upload");

        let source = document.filename.clone();
        let extraction =
            tokio::task::spawn_blocking(move || formats::extract(format, &path, &source)).await;
        // Release the staged copy before inspecting the outcome.
        drop(staged);

        let segments = extraction.map_err(|e| {
            RagError::parse(format.to_string(), &document.filename, format!("extractor aborted: {e}"))
        })??;

        if segments.iter().all(|s| s.text.trim().is_empty()) {
            return Err(RagError::parse(
                format.to_string(),
                &document.filename,
                "document contains no extractable text",
            ));
        }

        info!(filename = %document.filename, %format, segment_count = segments.len(), "loaded document");
        Ok(segments)
    }

    fn stage(&self, document: &UploadedDocument, format: DocumentFormat) -> Result<NamedTempFile> {
        let suffix = format!(".{}", format.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix("docqa-upload-").suffix(&suffix);
        let mut file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(&document.bytes)?;
        file.flush()?;
        Ok(file)
    }
}
