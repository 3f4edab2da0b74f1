use std::borrow::Cow;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::time::SystemTime;

use crate::trace::tracer::Tracer;
use crate::trace::{ServiceInfo, SpanContext};

/// The role a span plays in a request.
///
/// Root-ness is a parentage property, not a kind: a root span is simply one
/// whose context has no parent span id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanKind {
    /// Handles an inbound request.
    Server,
    /// Issues an outbound request.
    Client,
    /// Local work with no transport on either side.
    Internal,
}

/// Outcome of the operation a span covers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// No outcome recorded.
    #[default]
    Unset,
    /// Completed successfully.
    Ok,
    /// Failed; the message describes the failure for the backend.
    Error { message: Cow<'static, str> },
}

impl Status {
    pub fn error(message: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            message: message.into(),
        }
    }
}

/// A span tag value.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::String(value.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::I64(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::F64(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::String(v) => f.write_str(v),
            TagValue::I64(v) => write!(f, "{v}"),
            TagValue::F64(v) => write!(f, "{v}"),
            TagValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Immutable record of a finished span, as handed to processors.
#[derive(Clone, Debug)]
pub struct SpanData {
    pub span_context: SpanContext,
    pub kind: SpanKind,
    pub name: Cow<'static, str>,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub tags: Vec<(String, TagValue)>,
    pub status: Status,
    pub service: ServiceInfo,
}

impl SpanData {
    /// First tag recorded under `key`, if any.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// An in-flight span.
///
/// Tags and status stay mutable until [`finish`](Span::finish), which takes
/// the recording exactly once and hands it to the tracer's processors. A
/// second `finish` is a no-op, and dropping an unfinished span exports
/// nothing; request-scoped spans that must survive cancellation go
/// through [`SpanGuard`]. Unsampled spans carry identity for propagation
/// but record nothing.
pub struct Span {
    span_context: SpanContext,
    data: Option<SpanData>,
    tracer: Tracer,
}

impl Span {
    pub(crate) fn new(span_context: SpanContext, data: Option<SpanData>, tracer: Tracer) -> Self {
        Span {
            span_context,
            data,
            tracer,
        }
    }

    /// The propagatable identity of this span.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Whether this span records tags and will be exported on finish.
    pub fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    /// Record a tag. Later values for the same key replace earlier ones.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        if let Some(data) = self.data.as_mut() {
            let key = key.into();
            let value = value.into();
            if let Some(entry) = data.tags.iter_mut().find(|(k, _)| *k == key) {
                entry.1 = value;
            } else {
                data.tags.push((key, value));
            }
        }
    }

    /// Record the span's outcome.
    pub fn set_status(&mut self, status: Status) {
        if let Some(data) = self.data.as_mut() {
            data.status = status;
        }
    }

    /// End the span and hand it to the export pipeline.
    ///
    /// The end time is fixed here and never revised. An error status adds
    /// an `error=true` tag for backends that key on it.
    pub fn finish(&mut self) {
        let Some(mut data) = self.data.take() else {
            return;
        };
        data.end_time = SystemTime::now();
        if matches!(data.status, Status::Error { .. }) && data.tag("error").is_none() {
            data.tags.push(("error".to_owned(), TagValue::Bool(true)));
        }
        self.tracer.process_end(data);
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("span_context", &self.span_context)
            .field("recording", &self.data.is_some())
            .finish()
    }
}

/// Finishes a still-recording span when dropped.
///
/// Request middleware owns spans whose futures the caller may drop at any
/// await point (a timeout, a `select!` arm, a client disconnect). Wrapping
/// such a span in a guard means cancellation still finishes and exports it
/// with the guard's status. A span finished through the guard first makes
/// the drop a no-op, and spans outside a guard keep the plain behavior:
/// dropped unfinished means never exported.
pub struct SpanGuard {
    span: Span,
    cancel_status: Status,
}

impl SpanGuard {
    pub fn new(span: Span, cancel_status: Status) -> Self {
        SpanGuard {
            span,
            cancel_status,
        }
    }
}

impl Deref for SpanGuard {
    type Target = Span;

    fn deref(&self) -> &Span {
        &self.span
    }
}

impl DerefMut for SpanGuard {
    fn deref_mut(&mut self) -> &mut Span {
        &mut self.span
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.span.is_recording() {
            self.span.set_status(mem::take(&mut self.cancel_status));
            self.span.finish();
        }
    }
}

impl fmt::Debug for SpanGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanGuard").field("span", &self.span).finish()
    }
}
