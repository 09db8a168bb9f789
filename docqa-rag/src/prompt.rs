//! Prompt templates for grounded answering and question condensation.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Placeholder for the persona / answering instruction.
pub const PERSONA: &str = "{persona}";
/// Placeholder for the retrieved document excerpts.
pub const CONTEXT: &str = "{context}";
/// Placeholder for the rendered conversation history.
pub const CHAT_HISTORY: &str = "{chat_history}";
/// Placeholder for the current question.
pub const QUESTION: &str = "{question}";

/// The persona used when none is configured.
pub const DEFAULT_PERSONA: &str = "You are a semiconductor manufacturing expert. Answer strictly \
from the technical document excerpts below; do not add facts they do not contain. If the \
excerpts do not answer the question, say so plainly.";

const DEFAULT_TEMPLATE: &str = "{persona}

**Document excerpts:**
{context}

**Conversation so far:**
{chat_history}

**Current question:** {question}

Give a precise, professional answer that follows industry conventions:";

const CONDENSE_TEMPLATE: &str = "Given the conversation below and a follow-up question, rephrase \
the follow-up question to be a standalone question, in its original language.

Conversation:
{chat_history}

Follow-up question: {question}
Standalone question:";

/// A prompt template with the four required placeholders.
///
/// Callers may substitute their own template text; construction fails if
/// any of `{persona}`, `{context}`, `{chat_history}` or `{question}` is
/// missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    persona: String,
}

/// The values substituted into a [`PromptTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    pub context: &'a str,
    pub chat_history: &'a str,
    pub question: &'a str,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { template: DEFAULT_TEMPLATE.to_string(), persona: DEFAULT_PERSONA.to_string() }
    }
}

impl PromptTemplate {
    /// Create a template from custom text.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] naming the missing placeholders.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        let missing: Vec<&str> = [PERSONA, CONTEXT, CHAT_HISTORY, QUESTION]
            .into_iter()
            .filter(|p| !template.contains(p))
            .collect();
        if !missing.is_empty() {
            return Err(RagError::Config(format!(
                "prompt template is missing placeholder(s): {}",
                missing.join(", ")
            )));
        }
        Ok(Self { template, persona: DEFAULT_PERSONA.to_string() })
    }

    /// Replace the persona / answering instruction.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// The configured persona.
    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// Substitute all placeholders.
    ///
    /// Values are inserted in a single pass, so placeholder-like text inside
    /// a document or question is never expanded.
    pub fn render(&self, parts: PromptParts<'_>) -> String {
        let history = if parts.chat_history.trim().is_empty() { "(none)" } else { parts.chat_history };
        substitute(
            &self.template,
            &[
                (PERSONA, self.persona.as_str()),
                (CONTEXT, parts.context),
                (CHAT_HISTORY, history),
                (QUESTION, parts.question),
            ],
        )
    }
}

/// Render the prompt that rewrites a follow-up into a standalone question.
pub fn condense_prompt(chat_history: &str, question: &str) -> String {
    substitute(CONDENSE_TEMPLATE, &[(CHAT_HISTORY, chat_history), (QUESTION, question)])
}

fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match values.iter().find(|(placeholder, _)| tail.starts_with(placeholder)) {
            Some((placeholder, value)) => {
                out.push_str(value);
                rest = &tail[placeholder.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
