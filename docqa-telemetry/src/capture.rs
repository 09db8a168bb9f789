//! In-memory span capture.
//!
//! [`SpanCapture`] is a [`Layer`] that records every span when it closes,
//! together with its fields, its parent's name and its timing. Spans are kept
//! in close order, so sibling spans (such as the stages of one pipeline
//! invocation) appear in the order they ran.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// A span that has closed.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedSpan {
    pub name: String,
    pub parent: Option<String>,
    pub fields: HashMap<String, serde_json::Value>,
    pub started_at: SystemTime,
    pub closed_at: SystemTime,
}

impl CapturedSpan {
    /// A field rendered as a string, if present.
    pub fn field(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Shared storage for captured spans. Cloning shares the same storage.
#[derive(Debug, Clone, Default)]
pub struct CaptureStorage {
    spans: Arc<RwLock<Vec<CapturedSpan>>>,
}

impl CaptureStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured spans in close order.
    pub fn spans(&self) -> Vec<CapturedSpan> {
        self.spans.read().map(|spans| spans.clone()).unwrap_or_default()
    }

    /// Names of the captured spans in close order.
    pub fn names(&self) -> Vec<String> {
        self.spans().into_iter().map(|s| s.name).collect()
    }

    /// Spans whose parent is named `parent`, in close order.
    pub fn children_of(&self, parent: &str) -> Vec<CapturedSpan> {
        self.spans().into_iter().filter(|s| s.parent.as_deref() == Some(parent)).collect()
    }

    /// The most recently closed span named `name`.
    pub fn last(&self, name: &str) -> Option<CapturedSpan> {
        self.spans().into_iter().rev().find(|s| s.name == name)
    }

    pub fn clear(&self) {
        if let Ok(mut spans) = self.spans.write() {
            spans.clear();
        }
    }

    fn push(&self, span: CapturedSpan) {
        if let Ok(mut spans) = self.spans.write() {
            spans.push(span);
        }
    }
}

/// A tracing layer that records closed spans into a [`CaptureStorage`].
pub struct SpanCapture {
    storage: CaptureStorage,
}

impl SpanCapture {
    pub fn new(storage: CaptureStorage) -> Self {
        Self { storage }
    }
}

struct SpanState {
    started_at: SystemTime,
    fields: HashMap<String, serde_json::Value>,
}

impl<S> Layer<S> for SpanCapture
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut()
            .insert(SpanState { started_at: SystemTime::now(), fields: visitor.0 });
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        if let Some(state) = extensions.get_mut::<SpanState>() {
            let mut visitor = JsonVisitor::default();
            values.record(&mut visitor);
            state.fields.extend(visitor.0);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else { return };
        let closed_at = SystemTime::now();
        let parent = span.parent().map(|p| p.name().to_string());

        let extensions = span.extensions();
        let (started_at, fields) = extensions
            .get::<SpanState>()
            .map(|state| (state.started_at, state.fields.clone()))
            .unwrap_or((closed_at, HashMap::new()));

        self.storage.push(CapturedSpan {
            name: span.name().to_string(),
            parent,
            fields,
            started_at,
            closed_at,
        });
    }
}

#[derive(Default)]
struct JsonVisitor(HashMap<String, serde_json::Value>);

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }
}
