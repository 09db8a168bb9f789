//! Conversation memory: an append-only log of question/answer turns.
//!
//! The memory is owned by the caller's session. The pipeline never mutates
//! the caller's copy; it returns an updated memory on success (see
//! [`ConversationMemory::with_turn`]). Rendering for the prompt may elide the
//! oldest turns according to an explicit [`ElisionPolicy`], and always says
//! how many turns it left out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One question and the answer given to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn timestamped now.
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self { question: question.into(), answer: answer.into(), asked_at: Utc::now() }
    }

    fn render(&self) -> String {
        format!("Human: {}\nAssistant: {}", self.question, self.answer)
    }
}

/// How much history is rendered into the prompt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElisionPolicy {
    /// Render every turn.
    #[default]
    KeepAll,
    /// Render only the most recent `n` turns.
    LastTurns(usize),
    /// Render the most recent whole turns that fit, together with the
    /// omission note, in `n` characters.
    MaxChars(usize),
}

/// An ordered, append-only sequence of conversation turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
}

impl ConversationMemory {
    /// Create an empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn to the end of the log.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Return a copy of this memory with `turn` appended.
    pub fn with_turn(&self, turn: ConversationTurn) -> Self {
        let mut next = self.clone();
        next.append(turn);
        next
    }

    /// The turns in insertion order.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Number of turns recorded.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turn has been recorded.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render the history for inclusion in a prompt.
    ///
    /// Returns an empty string for an empty memory. When the policy elides
    /// turns, the rendering starts with a line stating how many of the
    /// oldest turns were omitted; stored turns are never touched.
    ///
    /// Under [`ElisionPolicy::MaxChars`] the whole rendering, note included,
    /// stays within the limit. A limit too small for even the note renders
    /// nothing.
    pub fn as_context(&self, policy: ElisionPolicy) -> String {
        let rendered: Vec<String> = self.turns.iter().map(ConversationTurn::render).collect();

        let kept = match policy {
            ElisionPolicy::KeepAll => rendered.len(),
            ElisionPolicy::LastTurns(n) => n.min(rendered.len()),
            ElisionPolicy::MaxChars(limit) => {
                let lengths: Vec<usize> = rendered.iter().map(|t| t.chars().count()).collect();
                (0..=lengths.len())
                    .rev()
                    .find(|&kept| rendered_len(&lengths, kept) <= limit)
                    .unwrap_or(0)
            }
        };

        let omitted = rendered.len() - kept;
        let mut lines = Vec::with_capacity(kept + 1);
        if omitted > 0 {
            let note = omission_note(omitted);
            let fits = match policy {
                ElisionPolicy::MaxChars(limit) => note.chars().count() <= limit,
                _ => true,
            };
            if fits {
                lines.push(note);
            }
        }
        lines.extend(rendered.into_iter().skip(omitted));
        lines.join("\n")
    }
}

fn omission_note(omitted: usize) -> String {
    format!("[{omitted} earlier turn(s) omitted]")
}

/// Length in chars of the rendering that keeps the last `kept` turns.
fn rendered_len(lengths: &[usize], kept: usize) -> usize {
    let omitted = lengths.len() - kept;
    let mut parts: Vec<usize> = lengths[omitted..].to_vec();
    if omitted > 0 {
        parts.push(omission_note(omitted).chars().count());
    }
    // one newline between consecutive lines
    parts.iter().sum::<usize>() + parts.len().saturating_sub(1)
}
