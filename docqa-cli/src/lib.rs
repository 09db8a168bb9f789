//! # docqa-cli
//!
//! Command-line console for asking questions about a technical document.
//!
//! The `docqa` binary loads one document, then either answers a single
//! `--question` or opens an interactive console. Conversation memory can be
//! persisted to a JSON file between runs with `--history`, and transient
//! service failures are retried with exponential backoff.

pub mod args;
pub mod console;
pub mod history;
pub mod retry;

pub use args::Cli;
pub use console::{ConsoleCommand, Session, run_console};
pub use retry::{RetryPolicy, retry};
