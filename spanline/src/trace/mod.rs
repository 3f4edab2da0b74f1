//! Span lifecycle: identity, sampling, creation, and finish.

mod id_generator;
mod sampler;
mod span;
mod span_context;
mod tracer;

#[cfg(feature = "testing")]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use sampler::Sampler;
pub use span::{Span, SpanData, SpanGuard, SpanKind, Status, TagValue};
pub use span_context::SpanContext;
pub use tracer::{ServiceInfo, Tracer, TracerBuilder};
