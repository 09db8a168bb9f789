//! Command-line arguments and configuration layering.
//!
//! Settings are layered: built-in defaults, then an optional JSON config
//! file (`--config`, a serialised [`RagConfig`]), then individual flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use docqa_rag::{FormatProfile, RagConfig, RagConfigBuilder, RetrievalMode};

use crate::retry::RetryPolicy;

/// Candidate pool used for MMR when `--fetch-k` is not given.
pub const DEFAULT_FETCH_K: usize = 20;
/// Relevance/diversity balance used for MMR when `--lambda` is not given.
pub const DEFAULT_LAMBDA: f32 = 0.5;

#[derive(Parser, Debug, Clone)]
#[command(name = "docqa")]
#[command(version, about = "Ask questions about a technical document", long_about = None)]
pub struct Cli {
    #[arg(help = "Document to load (pdf, docx, txt, csv, md)")]
    pub file: PathBuf,

    #[arg(short, long, help = "Answer a single question and exit")]
    pub question: Option<String>,

    #[arg(short, long, env = "DOCQA_MODEL", default_value = "gpt-3.5-turbo", help = "Chat model")]
    pub model: String,

    #[arg(long, help = "API key (defaults to OPENAI_API_KEY, then COURSE_API_KEY)")]
    pub api_key: Option<String>,

    #[arg(long, help = "OpenAI-compatible endpoint (defaults to OPENAI_API_BASE)")]
    pub endpoint: Option<String>,

    #[arg(short, long, env = "DOCQA_CONFIG", help = "JSON pipeline configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "DOCQA_HISTORY", help = "Load and save conversation memory here")]
    pub history: Option<PathBuf>,

    #[arg(long, value_enum, help = "Accepted upload formats")]
    pub profile: Option<ProfileArg>,

    #[arg(long, value_enum, help = "Retrieval strategy")]
    pub retrieval: Option<RetrievalArg>,

    #[arg(long, help = "Candidate pool size for mmr retrieval")]
    pub fetch_k: Option<usize>,

    #[arg(long, help = "Relevance weight for mmr retrieval, within [0, 1]")]
    pub lambda: Option<f32>,

    #[arg(short = 'k', long, help = "Number of chunks retrieved per question")]
    pub top_k: Option<usize>,

    #[arg(long, help = "Maximum chunk size in characters")]
    pub chunk_size: Option<usize>,

    #[arg(long, help = "Characters shared by consecutive chunks")]
    pub chunk_overlap: Option<usize>,

    #[arg(long, default_value = "3", help = "Retries for rate-limited or failed service calls")]
    pub retries: u32,

    #[arg(long, help = "Print answers as JSON")]
    pub json: bool,

    #[arg(long, env = "DOCQA_JSON_LOGS", help = "Emit logs as JSON lines on stderr")]
    pub json_logs: bool,

    #[arg(long, env = "DOCQA_LOG", default_value = "warn", help = "Log filter when RUST_LOG is unset")]
    pub log_level: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileArg {
    Full,
    PdfOnly,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalArg {
    Similarity,
    Mmr,
}

impl From<ProfileArg> for FormatProfile {
    fn from(profile: ProfileArg) -> Self {
        match profile {
            ProfileArg::Full => FormatProfile::Full,
            ProfileArg::PdfOnly => FormatProfile::PdfOnly,
        }
    }
}

/// Read a serialised [`RagConfig`]. Missing fields take their defaults.
pub fn load_config_file(path: &Path) -> Result<RagConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("invalid config file {}", path.display()))
}

impl Cli {
    /// Build the pipeline configuration from the config file and flags.
    pub fn rag_config(&self) -> Result<RagConfig> {
        let base = match &self.config {
            Some(path) => load_config_file(path)?,
            None => RagConfig::default(),
        };

        let retrieval = match self.retrieval {
            Some(RetrievalArg::Similarity) => RetrievalMode::Similarity,
            Some(RetrievalArg::Mmr) => RetrievalMode::Mmr {
                fetch_k: self.fetch_k.unwrap_or(DEFAULT_FETCH_K),
                lambda: self.lambda.unwrap_or(DEFAULT_LAMBDA),
            },
            None => match base.retrieval {
                RetrievalMode::Mmr { fetch_k, lambda } => RetrievalMode::Mmr {
                    fetch_k: self.fetch_k.unwrap_or(fetch_k),
                    lambda: self.lambda.unwrap_or(lambda),
                },
                RetrievalMode::Similarity => RetrievalMode::Similarity,
            },
        };

        let mut builder = RagConfigBuilder::from_config(base).retrieval(retrieval);
        if let Some(profile) = self.profile {
            builder = builder.format_profile(profile.into());
        }
        if let Some(k) = self.top_k {
            builder = builder.top_k(k);
        }
        if let Some(size) = self.chunk_size {
            builder = builder.chunk_size(size);
        }
        if let Some(overlap) = self.chunk_overlap {
            builder = builder.chunk_overlap(overlap);
        }
        builder.build().context("invalid pipeline configuration")
    }

    /// The caller-side retry policy for service failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}
