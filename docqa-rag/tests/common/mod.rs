//! Offline test doubles for the embedding and chat services.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use docqa_rag::{
    ChatModel, ChatRequest, EmbeddingProvider, ModelBackend, RagError, Result, ServiceEndpoint,
};

pub const DIMENSIONS: usize = 256;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Bag-of-words embedder: each lowercase word increments one hashed bucket.
#[derive(Default)]
pub struct HashingEmbedder {
    pub batch_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSIONS];
        for word in words(text) {
            vector[(fnv1a(&word) % DIMENSIONS as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }
}

/// Answers with the excerpt sentence sharing the most words with the question.
///
/// Condensation prompts are answered with the follow-up question unchanged.
#[derive(Default)]
pub struct ExtractiveChat {
    pub prompts: Mutex<Vec<String>>,
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let Some(from) = text.find(start) else { return "" };
    let rest = &text[from + start.len()..];
    rest.find(end).map_or(rest, |to| &rest[..to])
}

impl ExtractiveChat {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn answer(prompt: &str) -> String {
        if prompt.contains("Standalone question:") {
            return between(prompt, "Follow-up question: ", "\n").to_string();
        }

        let question: Vec<String> = words(between(prompt, "**Current question:** ", "\n")).collect();
        let excerpts = between(prompt, "**Document excerpts:**\n", "\n\n**Conversation so far:**");

        excerpts
            .lines()
            .filter(|line| !line.starts_with('['))
            .flat_map(|line| line.split_inclusive(". "))
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .max_by_key(|sentence| words(sentence).filter(|w| question.contains(w)).count())
            .unwrap_or("The excerpts do not answer this question.")
            .to_string()
    }
}

#[async_trait]
impl ChatModel for ExtractiveChat {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok(Self::answer(&prompt))
    }
}

/// A chat model that always fails with a transient service error.
pub struct FailingChat;

#[async_trait]
impl ChatModel for FailingChat {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<String> {
        Err(RagError::Service { service: "chat".into(), message: "upstream returned 502".into() })
    }
}

/// Hands out the shared doubles and records every resolved endpoint.
pub struct TestBackend {
    pub embedder: Arc<HashingEmbedder>,
    pub chat: Arc<dyn ChatModel>,
    pub endpoints: Mutex<Vec<ServiceEndpoint>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::with_chat(Arc::new(ExtractiveChat::default()))
    }

    pub fn with_chat(chat: Arc<dyn ChatModel>) -> Self {
        Self { embedder: Arc::new(HashingEmbedder::default()), chat, endpoints: Mutex::new(Vec::new()) }
    }

    pub fn endpoints(&self) -> Vec<ServiceEndpoint> {
        self.endpoints.lock().unwrap().clone()
    }
}

impl ModelBackend for TestBackend {
    fn embedding_provider(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn EmbeddingProvider>> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        Ok(self.embedder.clone())
    }

    fn chat_model(&self, _endpoint: &ServiceEndpoint, _model: &str) -> Result<Arc<dyn ChatModel>> {
        Ok(Arc::clone(&self.chat))
    }
}

/// A three-page process document with the etch rate on the second page.
pub fn process_document() -> Vec<u8> {
    let page_one = "Wafer cleaning overview.\n\nWafers are rinsed in deionized water before \
                    deposition. Particle counts are inspected after every rinse cycle. Cassettes \
                    are dried with filtered nitrogen. Operators log every lot in the tracking \
                    system before it leaves the wet bench.";
    let page_two = "Plasma etching parameters.\n\nThe etch rate is 120 nm/min at 200W. Chamber \
                    pressure is held constant during the process. Endpoint detection uses optical \
                    emission spectroscopy. Chamber walls are seasoned after every maintenance \
                    cycle.";
    let page_three = "Lithography notes.\n\nPhotoresist thickness is measured by ellipsometry. \
                      Exposure dose is calibrated weekly. Reticles are inspected for haze before \
                      each shift. Developer temperature is logged every hour.";
    format!("{page_one}\u{000C}{page_two}\u{000C}{page_three}").into_bytes()
}
