use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::export::{ExportResult, SpanProcessor};
use crate::trace::{
    IdGenerator, RandomIdGenerator, Sampler, Span, SpanContext, SpanData, SpanKind, Status,
};
use crate::Context;

/// Identity of the process emitting spans, recorded on every export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        ServiceInfo {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Builder for a [`Tracer`].
///
/// Defaults: random ids, sample everything, no processors (spans are
/// created and propagate but nothing is exported).
pub struct TracerBuilder {
    service: ServiceInfo,
    id_generator: Box<dyn IdGenerator>,
    sampler: Sampler,
    processors: Vec<Box<dyn SpanProcessor>>,
}

impl TracerBuilder {
    pub fn with_id_generator(mut self, id_generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Box::new(id_generator);
        self
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Add a processor; every finished sampled span goes to each one.
    pub fn with_processor(mut self, processor: impl SpanProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn build(self) -> Tracer {
        Tracer {
            inner: Arc::new(TracerInner {
                service: self.service,
                id_generator: self.id_generator,
                sampler: self.sampler,
                processors: self.processors,
            }),
        }
    }
}

/// Creates spans and routes finished ones to its processors.
///
/// Cheap to clone; clones share the same sampler, id generator, and
/// processors. There is no process-wide tracer: each service constructs and
/// passes its own, so isolated tracers coexist in one process.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    service: ServiceInfo,
    id_generator: Box<dyn IdGenerator>,
    sampler: Sampler,
    processors: Vec<Box<dyn SpanProcessor>>,
}

impl Tracer {
    pub fn builder(service: ServiceInfo) -> TracerBuilder {
        TracerBuilder {
            service,
            id_generator: Box::new(RandomIdGenerator::default()),
            sampler: Sampler::AlwaysOn,
            processors: Vec::new(),
        }
    }

    pub fn service(&self) -> &ServiceInfo {
        &self.inner.service
    }

    /// Start a span, optionally as a child of `parent`.
    ///
    /// With no valid parent a fresh trace id is drawn and the sampler
    /// decides once; with a parent, trace id, flags, and baggage are
    /// inherited and the sampler is not consulted. Never fails.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        parent: Option<&SpanContext>,
        kind: SpanKind,
    ) -> Span {
        let span_id = self.inner.id_generator.new_span_id();
        let span_context = match parent.filter(|p| p.is_valid()) {
            Some(parent) => parent.child(span_id),
            None => {
                let flags = crate::TraceFlags::default()
                    .with_sampled(self.inner.sampler.should_sample());
                SpanContext::new(self.inner.id_generator.new_trace_id(), span_id, flags, false)
            }
        };

        let data = span_context.is_sampled().then(|| {
            let start_time = SystemTime::now();
            SpanData {
                span_context: span_context.clone(),
                kind,
                name: name.into(),
                start_time,
                end_time: start_time,
                tags: Vec::new(),
                status: Status::Unset,
                service: self.inner.service.clone(),
            }
        });

        Span::new(span_context, data, self.clone())
    }

    /// Start a span parented on the context's active span, if any.
    pub fn start_with_context(
        &self,
        name: impl Into<Cow<'static, str>>,
        cx: &Context,
        kind: SpanKind,
    ) -> Span {
        self.start_span(name, cx.span_context(), kind)
    }

    /// Flush every processor's pending spans, returning the first failure.
    pub fn force_flush(&self) -> ExportResult {
        self.inner
            .processors
            .iter()
            .try_for_each(|p| p.force_flush())
    }

    /// Shut down every processor. Further finished spans are discarded.
    pub fn shutdown(&self) -> ExportResult {
        self.inner.processors.iter().try_for_each(|p| p.shutdown())
    }

    pub(crate) fn process_end(&self, span: SpanData) {
        let mut remaining = self.inner.processors.len();
        for processor in &self.inner.processors {
            remaining -= 1;
            if remaining == 0 {
                processor.on_end(span);
                break;
            }
            processor.on_end(span.clone());
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service", &self.inner.service)
            .field("sampler", &self.inner.sampler)
            .field("processors", &self.inner.processors.len())
            .finish()
    }
}
