//! Grounded answer generation.
//!
//! The [`AnswerGenerator`] turns retrieved chunks, rendered conversation
//! history and the question into a single prompt and asks a [`ChatModel`]
//! for the answer. It never talks to the index or the memory directly.

use tracing::debug;

use crate::document::SearchResult;
use crate::error::{RagError, Result};
use crate::model::{ChatMessage, ChatModel, ChatRequest};
use crate::prompt::{PromptParts, PromptTemplate, condense_prompt};

const NO_EXCERPTS: &str = "(no excerpts matched the question)";

/// Builds prompts and calls the chat model.
#[derive(Debug, Clone)]
pub struct AnswerGenerator {
    template: PromptTemplate,
    temperature: f32,
}

impl AnswerGenerator {
    /// Create a generator using `template` and sampling `temperature`.
    pub fn new(template: PromptTemplate, temperature: f32) -> Self {
        Self { template, temperature }
    }

    /// Render the full answer prompt without calling a model.
    pub fn build_prompt(&self, question: &str, results: &[SearchResult], history: &str) -> String {
        let context = render_context(results);
        self.template.render(PromptParts { context: &context, chat_history: history, question })
    }

    /// Generate an answer grounded in `results`.
    ///
    /// # Errors
    ///
    /// Propagates the model's error unchanged; an empty completion is a
    /// [`RagError::Service`] error.
    pub async fn generate(
        &self,
        model: &dyn ChatModel,
        question: &str,
        results: &[SearchResult],
        history: &str,
    ) -> Result<String> {
        let prompt = self.build_prompt(question, results, history);
        debug!(model = model.name(), prompt_chars = prompt.chars().count(), "generating answer");

        let answer = self.complete(model, prompt).await?;
        if answer.is_empty() {
            return Err(RagError::service(model.name(), "model returned an empty answer"));
        }
        Ok(answer)
    }

    /// Rewrite a follow-up question into a standalone one.
    ///
    /// Falls back to the original question when the model returns nothing.
    ///
    /// # Errors
    ///
    /// Propagates the model's error unchanged.
    pub async fn condense(&self, model: &dyn ChatModel, history: &str, question: &str) -> Result<String> {
        let standalone = self.complete(model, condense_prompt(history, question)).await?;
        if standalone.is_empty() {
            return Ok(question.to_string());
        }
        debug!(model = model.name(), standalone = %standalone, "condensed follow-up question");
        Ok(standalone)
    }

    async fn complete(&self, model: &dyn ChatModel, prompt: String) -> Result<String> {
        let request =
            ChatRequest { messages: vec![ChatMessage::user(prompt)], temperature: self.temperature };
        Ok(model.complete(request).await?.trim().to_string())
    }
}

/// Number each retrieved chunk and label it with its source and page.
pub fn render_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_EXCERPTS.to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let chunk = &result.chunk;
            let source = chunk.source().unwrap_or("unknown");
            let label = match chunk.page() {
                Some(page) => format!("[{}] {source}, page {page}", i + 1),
                None => format!("[{}] {source}", i + 1),
            };
            format!("{label}\n{}", chunk.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct source identifiers of `results`, in first-seen order.
pub fn distinct_sources(results: &[SearchResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for source in results.iter().filter_map(|r| r.chunk.source()) {
        if !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }
    }
    sources
}
