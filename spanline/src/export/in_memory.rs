use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::export::{ExportResult, SpanExporter};
use crate::trace::SpanData;

/// Exporter that accumulates spans in memory, for tests and examples.
///
/// Clones share the same storage, so tests keep one handle for assertions
/// while the batch processor owns another.
///
/// ```
/// use spanline::export::{BatchSpanProcessor, InMemorySpanExporter};
/// use spanline::trace::{ServiceInfo, SpanKind, Tracer};
///
/// let exporter = InMemorySpanExporter::default();
/// let tracer = Tracer::builder(ServiceInfo::new("demo", "0.1.0"))
///     .with_processor(BatchSpanProcessor::with_defaults(exporter.clone()))
///     .build();
///
/// tracer.start_span("op", None, SpanKind::Internal).finish();
/// tracer.force_flush().unwrap();
/// assert_eq!(exporter.finished_spans().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanExporter {
    /// Snapshot of every span exported so far.
    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans.lock().map(|spans| spans.clone()).unwrap_or_default()
    }

    /// Discard all recorded spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        if let Ok(mut spans) = self.spans.lock() {
            spans.extend(batch);
        }
        Box::pin(futures_util::future::ready(Ok(())))
    }

    fn shutdown(&mut self) {
        self.reset();
    }
}
