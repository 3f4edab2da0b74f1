use crate::baggage::Baggage;
use crate::{SpanId, TraceFlags, TraceId};

/// The immutable, propagatable identity of a span.
///
/// This is the part of a span that crosses process boundaries: trace and
/// span ids, the sampling decision, parent linkage, and baggage. It never
/// changes after construction; derivation produces a new value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: SpanId,
    trace_flags: TraceFlags,
    is_remote: bool,
    baggage: Baggage,
}

impl SpanContext {
    /// A context with invalid ids, no flags, and no baggage.
    pub fn empty() -> Self {
        SpanContext::new(
            TraceId::INVALID,
            SpanId::INVALID,
            TraceFlags::default(),
            false,
        )
    }

    /// Construct a context with no parent link and empty baggage.
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        trace_flags: TraceFlags,
        is_remote: bool,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_span_id: SpanId::INVALID,
            trace_flags,
            is_remote,
            baggage: Baggage::new(),
        }
    }

    /// Copy of this context with the given parent span id.
    pub fn with_parent_span_id(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = parent_span_id;
        self
    }

    /// Copy of this context carrying `baggage`.
    pub fn with_baggage(mut self, baggage: Baggage) -> Self {
        self.baggage = baggage;
        self
    }

    /// Derive a child identity: same trace, fresh span id, parented here.
    ///
    /// Flags and baggage are inherited unchanged; the child is local.
    pub fn child(&self, span_id: SpanId) -> Self {
        SpanContext {
            trace_id: self.trace_id,
            span_id,
            parent_span_id: self.span_id,
            trace_flags: self.trace_flags,
            is_remote: false,
            baggage: self.baggage.clone(),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The parent's span id, or `None` for a root span.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        (self.parent_span_id != SpanId::INVALID).then_some(self.parent_span_id)
    }

    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// Whether this context was extracted from an inbound carrier.
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    /// Both ids are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }
}
