//! Asynchronous delivery of finished spans to a collector.
//!
//! The tracer hands finished spans to one [`SpanProcessor`] per configured
//! backend; processors own batching and hand batches to a [`SpanExporter`],
//! which owns the wire format. Nothing in this pipeline may block or fail a
//! request: delivery is at-most-once and failures are logged and dropped.

mod batch;
mod in_memory;

pub use batch::{
    BatchConfig, BatchConfigBuilder, BatchSpanProcessor, OverflowPolicy,
};
pub use in_memory::InMemorySpanExporter;

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::trace::SpanData;

pub type ExportResult = Result<(), ExportError>;

/// Failure surfaced by the export pipeline.
///
/// These never reach request code; they are returned from `force_flush` /
/// `shutdown` and logged by the batch worker.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("export transport failure: {0}")]
    Transport(String),

    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    #[error("exporter is already shut down")]
    AlreadyShutdown,

    #[error("internal export failure: {0}")]
    Internal(String),
}

/// Serializes batches of spans and delivers them to a backend.
///
/// Exporters are driven from the batch worker thread only, so `export` may
/// block (via the returned future) without affecting request latency.
pub trait SpanExporter: Send + fmt::Debug {
    /// Deliver a batch. A batch is delivered at most once; the caller never
    /// retries a failed batch.
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult>;

    /// Release resources. Called once, after the final flush.
    fn shutdown(&mut self) {}
}

/// Receives finished, sampled spans from a tracer.
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// Called synchronously on span finish; must not block.
    fn on_end(&self, span: SpanData);

    /// Export everything accepted so far, waiting for completion.
    fn force_flush(&self) -> ExportResult;

    /// Flush within a bounded deadline, then stop accepting spans.
    fn shutdown(&self) -> ExportResult;
}
