//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`]: prefers natural breakpoints, trying a prioritised
//!   list of [`Separator`]s from coarsest (paragraphs) to finest (words)
//! - [`FixedSizeChunker`]: cuts purely by character count
//!
//! Both share one window algorithm, so both guarantee the same invariants:
//! every chunk holds at most `chunk_size` characters, and consecutive chunks
//! share exactly `chunk_overlap` characters (the tail of one chunk is the
//! head of the next). Lengths are counted in `char`s, never bytes.

use serde::{Deserialize, Serialize};

use crate::config::RagConfig;
use crate::document::{Chunk, SOURCE_KEY, TextSegment};

/// Text placed between consecutive segments before chunking.
const SEGMENT_JOINER: &str = "\n\n";

/// A boundary marker the chunker may break on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Separator {
    /// Break after the marker (paragraph, line, sentence and word boundaries).
    After(String),
    /// Break before the marker so it does not dangle at the end of a chunk
    /// (section headers, table and figure labels).
    Before(String),
}

impl Separator {
    fn pattern(&self) -> &str {
        match self {
            Self::After(p) | Self::Before(p) => p,
        }
    }
}

/// The default boundary markers, coarsest first.
///
/// Paragraphs, then structural markers common in process manuals and
/// datasheets, then lines, sentences (CJK and Latin punctuation) and words.
pub fn default_separators() -> Vec<Separator> {
    let after = |p: &str| Separator::After(p.to_string());
    let before = |p: &str| Separator::Before(p.to_string());
    vec![
        after("\n\n"),
        before("\n## "),
        before("\n### "),
        before("\n表"),
        before("\n图"),
        before("\nTable "),
        before("\nFigure "),
        before("注意事项："),
        after("\n"),
        after("。"),
        after("！"),
        after("？"),
        after(". "),
        after("! "),
        after("? "),
        after(" "),
    ]
}

/// A strategy for splitting extracted segments into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no
/// embeddings. Embeddings are attached later by the pipeline. Output must be
/// deterministic for a given input.
pub trait Chunker: Send + Sync {
    /// Split segments into ordered chunks.
    ///
    /// Returns an empty `Vec` if the segments hold no text.
    fn chunk(&self, segments: &[TextSegment]) -> Vec<Chunk>;
}

/// Splits text at the highest-priority natural breakpoint that fits.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(500, 100);
/// let chunks = chunker.chunk(&segments);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<Separator>,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker` with the [`default_separators`].
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of characters shared by consecutive chunks;
    ///   must be less than `chunk_size`
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap, separators: default_separators() }
    }

    /// Replace the boundary markers, given coarsest first.
    pub fn with_separators(mut self, separators: Vec<Separator>) -> Self {
        self.separators = separators;
        self
    }

    /// Build a chunker from the pipeline configuration.
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap).with_separators(config.separators.clone())
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, segments: &[TextSegment]) -> Vec<Chunk> {
        split_segments(segments, self.chunk_size, self.chunk_overlap, &self.separators)
    }
}

/// Splits text into fixed-size chunks by character count with overlap.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, segments: &[TextSegment]) -> Vec<Chunk> {
        split_segments(segments, self.chunk_size, self.chunk_overlap, &[])
    }
}

/// Joined segment text with the char offset at which each segment starts.
struct JoinedText<'a> {
    text: String,
    starts: Vec<(usize, &'a TextSegment)>,
}

fn join_segments(segments: &[TextSegment]) -> JoinedText<'_> {
    let mut text = String::new();
    let mut starts = Vec::new();
    let mut chars = 0;

    for segment in segments.iter().filter(|s| !s.text.trim().is_empty()) {
        if !text.is_empty() {
            text.push_str(SEGMENT_JOINER);
            chars += SEGMENT_JOINER.chars().count();
        }
        starts.push((chars, segment));
        text.push_str(&segment.text);
        chars += segment.text.chars().count();
    }

    JoinedText { text, starts }
}

fn split_segments(
    segments: &[TextSegment],
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[Separator],
) -> Vec<Chunk> {
    let joined = join_segments(segments);
    if joined.text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let overlap = chunk_overlap.min(chunk_size - 1);

    split_windows(&joined.text, chunk_size, overlap, separators)
        .into_iter()
        .enumerate()
        .map(|(position, (start, text))| {
            // The segment the chunk starts in supplies its metadata.
            let origin = joined
                .starts
                .iter()
                .rev()
                .find(|(offset, _)| *offset <= start)
                .map(|(_, segment)| *segment);
            let mut metadata = origin.map(|s| s.metadata.clone()).unwrap_or_default();
            let source = metadata.get(SOURCE_KEY).cloned().unwrap_or_else(|| "document".into());
            metadata.insert("chunk_index".to_string(), position.to_string());
            metadata.insert("start_char".to_string(), start.to_string());

            Chunk {
                id: format!("{source}#{position}"),
                text,
                embedding: Vec::new(),
                metadata,
                position,
            }
        })
        .collect()
}

/// Run the window algorithm over `text`, returning `(start_char, chunk_text)`.
fn split_windows(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    separators: &[Separator],
) -> Vec<(usize, String)> {
    // Byte offset of every char, plus the end of the text.
    let offsets: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let total = offsets.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        if total - start <= chunk_size {
            chunks.push((start, text[offsets[start]..].to_string()));
            break;
        }

        let window_end = start + chunk_size;
        // Refuse breakpoints that would leave a runt chunk or stall progress.
        let min_end = start + (overlap + 1).max(chunk_size / 2);
        let end = find_break(text, &offsets, start, min_end, window_end, separators)
            .unwrap_or(window_end);

        chunks.push((start, text[offsets[start]..offsets[end]].to_string()));
        start = end - overlap;
    }

    chunks
}

/// Find the char index to end the current chunk at, trying separators in
/// priority order and taking the last qualifying occurrence of the first
/// separator that has one.
fn find_break(
    text: &str,
    offsets: &[usize],
    start: usize,
    min_end: usize,
    window_end: usize,
    separators: &[Separator],
) -> Option<usize> {
    let window_start_byte = offsets[start];
    let window = &text[window_start_byte..offsets[window_end]];

    separators.iter().find_map(|separator| {
        let pattern = separator.pattern();
        if pattern.is_empty() {
            return None;
        }
        window
            .match_indices(pattern)
            .filter_map(|(pos, matched)| {
                let byte = match separator {
                    Separator::After(_) => window_start_byte + pos + matched.len(),
                    Separator::Before(_) => window_start_byte + pos,
                };
                offsets.binary_search(&byte).ok()
            })
            .filter(|&end| end >= min_end && end <= window_end)
            .last()
    })
}
