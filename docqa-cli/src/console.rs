//! The question/answer session and its interactive console.

use std::path::PathBuf;

use anyhow::Result;
use docqa_rag::{AnswerResult, ConversationMemory, QaPipeline, QuestionRequest, UploadedDocument};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::info;

use crate::history;
use crate::retry::{RetryPolicy, retry};

const PROMPT: &str = "question> ";

const HELP: &str = "\
Type a question about the document and press Enter.
  /history  show the conversation so far
  /clear    forget the conversation
  /help     show this message
  /quit     leave (Ctrl-D also works)";

/// One user's conversation about one document.
///
/// Owns the conversation memory and replaces it with the pipeline's updated
/// copy after each successful answer.
pub struct Session {
    pipeline: QaPipeline,
    document: UploadedDocument,
    memory: ConversationMemory,
    model: String,
    api_key: Option<String>,
    endpoint: Option<String>,
    retry: RetryPolicy,
    history_path: Option<PathBuf>,
}

impl Session {
    pub fn new(pipeline: QaPipeline, document: UploadedDocument, model: impl Into<String>) -> Self {
        Self {
            pipeline,
            document,
            memory: ConversationMemory::new(),
            model: model.into(),
            api_key: None,
            endpoint: None,
            retry: RetryPolicy::default(),
            history_path: None,
        }
    }

    /// Use explicit credentials instead of the environment.
    pub fn with_credentials(mut self, api_key: Option<String>, endpoint: Option<String>) -> Self {
        self.api_key = api_key;
        self.endpoint = endpoint;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resume the conversation stored at `path` and save to it after each answer.
    pub fn with_history(mut self, path: PathBuf) -> Result<Self> {
        self.memory = history::load(&path)?;
        self.history_path = Some(path);
        Ok(self)
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn document(&self) -> &UploadedDocument {
        &self.document
    }

    /// Answer `question`, retrying transient failures.
    pub async fn ask(&mut self, question: &str) -> Result<AnswerResult> {
        let pipeline = &self.pipeline;
        let mut request = QuestionRequest::new(&self.memory, &self.document, question, &self.model);
        if let Some(key) = self.api_key.as_deref() {
            request = request.with_api_key(key);
        }
        if let Some(endpoint) = self.endpoint.as_deref() {
            request = request.with_base_url(endpoint);
        }

        let result = retry(&self.retry, move || pipeline.answer_question(request)).await?;

        self.memory = result.memory.clone();
        if let Some(path) = &self.history_path {
            history::save(path, &self.memory)?;
        }
        Ok(result)
    }

    /// Forget the conversation, including any persisted history.
    pub fn clear(&mut self) -> Result<()> {
        self.memory = ConversationMemory::new();
        if let Some(path) = &self.history_path {
            history::save(path, &self.memory)?;
        }
        Ok(())
    }
}

/// A line typed at the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand<'a> {
    Ask(&'a str),
    History,
    Clear,
    Help,
    Quit,
    Empty,
}

impl<'a> ConsoleCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => Self::Empty,
            "/quit" | "/exit" => Self::Quit,
            "/clear" => Self::Clear,
            "/history" => Self::History,
            "/help" | "?" => Self::Help,
            question => Self::Ask(question),
        }
    }
}

/// Human-readable rendering of an answer and its sources.
pub fn render_answer(result: &AnswerResult) -> String {
    let mut out = result.answer.clone();
    if !result.sources.is_empty() {
        let pages: Vec<String> = result
            .source_chunks
            .iter()
            .filter_map(|r| r.chunk.page().map(str::to_string))
            .fold(Vec::new(), |mut pages, page| {
                if !pages.contains(&page) {
                    pages.push(page);
                }
                pages
            });
        out.push_str(&format!("\n\nSources: {}", result.sources.join(", ")));
        if !pages.is_empty() {
            out.push_str(&format!(" (pages {})", pages.join(", ")));
        }
    }
    out
}

/// Machine-readable rendering of an answer.
pub fn answer_json(result: &AnswerResult) -> serde_json::Value {
    let chunks: Vec<serde_json::Value> = result
        .source_chunks
        .iter()
        .map(|r| {
            serde_json::json!({
                "id": r.chunk.id,
                "page": r.chunk.page(),
                "score": r.score,
            })
        })
        .collect();
    serde_json::json!({
        "answer": result.answer,
        "sources": result.sources,
        "standalone_question": result.standalone_question,
        "chunks": chunks,
        "turns": result.memory.len(),
    })
}

fn render_history(memory: &ConversationMemory) -> String {
    if memory.is_empty() {
        return "(no questions yet)".to_string();
    }
    memory
        .turns()
        .iter()
        .enumerate()
        .map(|(i, turn)| format!("{}. Q: {}\n   A: {}", i + 1, turn.question, turn.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read questions from the terminal until the user quits.
pub async fn run_console(session: &mut Session, json: bool) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("Loaded {}. Type /help for commands.", session.document().filename);
    if !session.memory().is_empty() {
        println!("Resuming a conversation with {} earlier question(s).", session.memory().len());
    }

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => continue,
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::History => println!("{}", render_history(session.memory())),
            ConsoleCommand::Clear => {
                session.clear()?;
                println!("Conversation cleared.");
            }
            ConsoleCommand::Ask(question) => {
                let _ = editor.add_history_entry(question);
                match session.ask(question).await {
                    Ok(result) if json => println!("{}", answer_json(&result)),
                    Ok(result) => println!("\n{}\n", render_answer(&result)),
                    Err(e) => eprintln!("error: {e:#}"),
                }
            }
        }
    }

    info!(turns = session.memory().len(), "console closed");
    Ok(())
}
