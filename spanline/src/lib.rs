//! Distributed trace-context propagation and span lifecycle.
//!
//! `spanline` is the client-side half of a tracing system: it creates spans,
//! links them into traces across process boundaries, and ships finished spans
//! to a collector without ever blocking the code being traced.
//!
//! The crate is organized around a few small pieces:
//!
//! - [`trace`]: the [`Tracer`](trace::Tracer), spans, samplers and id
//!   generation. A tracer is an explicit value passed to whatever needs one;
//!   there is no process-global tracer.
//! - [`Context`]: an execution-scoped, immutable value carrying the active
//!   span identity for one logical request. Contexts are attached to the
//!   current thread with an RAII guard, or to a future with
//!   [`FutureExt::with_context`].
//! - [`propagation`]: carrier traits plus the two wire codecs (W3C-style
//!   `traceparent` and B3-style `x-b3-*`), which may be layered side by side
//!   on one carrier via [`propagation::CompositePropagator`].
//! - [`export`]: the [`SpanExporter`](export::SpanExporter) contract and a
//!   dedicated-thread [`BatchSpanProcessor`](export::BatchSpanProcessor)
//!   that batches finished spans and flushes them in the background.
//!
//! Tracing failures are never surfaced to request-handling code: malformed
//! carriers extract to "no parent", export failures are logged and dropped,
//! and a full queue drops spans (counted) instead of applying back-pressure.

pub mod baggage;
pub mod context;
pub mod export;
pub mod propagation;
pub mod trace;

mod diag;
mod trace_context;

pub use context::{Context, ContextGuard, FutureExt, WithContext};
pub use trace_context::{SpanId, TraceFlags, TraceId};

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, warn};
}
