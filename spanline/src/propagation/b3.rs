use percent_encoding::{percent_decode_str, utf8_percent_encode};

use crate::baggage::Baggage;
use crate::propagation::trace_context::BAGGAGE_ENCODE_SET;
use crate::propagation::{Extractor, Injector, TextMapPropagator};
use crate::trace::SpanContext;
use crate::{Context, SpanId, TraceFlags, TraceId};

const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
const B3_PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
const BAGGAGE_PREFIX: &str = "baggage-";

/// Multi-header `x-b3-*` codec with `baggage-{key}` companion headers.
///
/// Trace ids are written as 32 lowercase hex characters; 16-character ids
/// are accepted on extraction and left-padded. Unlike the `traceparent`
/// encoding this one carries the parent span id, so parent linkage
/// survives a round trip. Its key namespace is disjoint from
/// [`TraceContextPropagator`](crate::propagation::TraceContextPropagator),
/// so both can share one carrier.
#[derive(Clone, Debug, Default)]
pub struct B3Propagator {
    _private: (),
}

impl B3Propagator {
    pub fn new() -> Self {
        B3Propagator::default()
    }

    fn extract_trace_id(&self, value: &str) -> Result<TraceId, ()> {
        if !(value.len() == 32 || value.len() == 16) || !is_lower_hex(value) {
            return Err(());
        }
        TraceId::from_hex(value).map_err(|_| ())
    }

    fn extract_span_id(&self, value: &str) -> Result<SpanId, ()> {
        if value.len() != 16 || !is_lower_hex(value) {
            return Err(());
        }
        SpanId::from_hex(value).map_err(|_| ())
    }

    fn extract_sampled(&self, value: &str) -> Result<TraceFlags, ()> {
        match value {
            "0" | "false" => Ok(TraceFlags::NOT_SAMPLED),
            "1" | "true" => Ok(TraceFlags::SAMPLED),
            _ => Err(()),
        }
    }

    fn extract_span_context(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let trace_id = self
            .extract_trace_id(extractor.get(B3_TRACE_ID_HEADER).ok_or(())?.trim())?;
        let span_id = self
            .extract_span_id(extractor.get(B3_SPAN_ID_HEADER).ok_or(())?.trim())?;
        let parent_span_id = match extractor.get(B3_PARENT_SPAN_ID_HEADER).map(str::trim) {
            Some(value) => Some(self.extract_span_id(value)?),
            None => None,
        };
        // Absent sampled header means "defer"; extract as not sampled.
        let trace_flags = match extractor.get(B3_SAMPLED_HEADER).map(str::trim) {
            Some(value) => self.extract_sampled(value)?,
            None => TraceFlags::NOT_SAMPLED,
        };

        let mut span_context = SpanContext::new(trace_id, span_id, trace_flags, true);
        if let Some(parent_span_id) = parent_span_id {
            span_context = span_context.with_parent_span_id(parent_span_id);
        }
        if span_context.is_valid() {
            Ok(span_context)
        } else {
            Err(())
        }
    }

    fn extract_baggage(&self, extractor: &dyn Extractor) -> Baggage {
        let mut baggage = Baggage::new();
        for key in extractor.keys() {
            let Some(name) = key.strip_prefix(BAGGAGE_PREFIX) else {
                continue;
            };
            let Some(raw) = extractor.get(key) else {
                continue;
            };
            let Ok(value) = percent_decode_str(raw).decode_utf8() else {
                continue;
            };
            let _ = baggage.insert(name.to_owned(), value.into_owned());
        }
        baggage
    }
}

impl TextMapPropagator for B3Propagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let Some(span_context) = cx.span_context().filter(|sc| sc.is_valid()) else {
            return;
        };
        injector.set(
            B3_TRACE_ID_HEADER,
            format!("{:032x}", span_context.trace_id()),
        );
        injector.set(B3_SPAN_ID_HEADER, format!("{:016x}", span_context.span_id()));
        if let Some(parent_span_id) = span_context.parent_span_id() {
            injector.set(B3_PARENT_SPAN_ID_HEADER, format!("{parent_span_id:016x}"));
        }
        injector.set(
            B3_SAMPLED_HEADER,
            if span_context.is_sampled() { "1" } else { "0" }.to_string(),
        );
        for (key, value) in span_context.baggage().iter() {
            injector.set(
                &format!("{BAGGAGE_PREFIX}{key}"),
                utf8_percent_encode(value, BAGGAGE_ENCODE_SET).to_string(),
            );
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.extract_span_context(extractor)
            .map(|sc| cx.with_span_context(sc.with_baggage(self.extract_baggage(extractor))))
            .unwrap_or_else(|_| cx.clone())
    }

    fn fields(&self) -> Vec<&'static str> {
        vec![
            B3_TRACE_ID_HEADER,
            B3_SPAN_ID_HEADER,
            B3_PARENT_SPAN_ID_HEADER,
            B3_SAMPLED_HEADER,
        ]
    }
}

fn is_lower_hex(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
