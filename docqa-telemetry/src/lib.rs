//! # docqa-telemetry
//!
//! Tracing bootstrap for DocQA binaries, plus [`capture::SpanCapture`], a
//! layer that records closed spans in memory so tests and diagnostics can
//! inspect what a pipeline invocation did.
//!
//! ```rust,no_run
//! use docqa_telemetry::{TelemetryConfig, init_telemetry};
//!
//! init_telemetry(TelemetryConfig::default().json(true)).ok();
//! tracing::info!("ready");
//! ```

pub mod capture;

pub use capture::{CaptureStorage, CapturedSpan, SpanCapture};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable holding the filter directives.
pub const FILTER_ENV_VAR: &str = "RUST_LOG";

/// How the global subscriber is assembled.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Directive used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
    /// Also record closed spans into this storage.
    pub capture: Option<CaptureStorage>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { default_directive: "info".to_string(), json: false, capture: None }
    }
}

impl TelemetryConfig {
    /// Set the fallback filter directive.
    pub fn default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Switch between JSON and human-readable output.
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Capture closed spans into `storage`.
    pub fn capture(mut self, storage: CaptureStorage) -> Self {
        self.capture = Some(storage);
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(FILTER_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Install the global subscriber. Logs are written to stderr.
///
/// # Errors
///
/// Fails if a global subscriber was already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TryInitError> {
    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(fmt_layer)
        .with(config.capture.map(SpanCapture::new))
        .try_init()
}
