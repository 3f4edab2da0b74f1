use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::baggage::Baggage;
use crate::propagation::{Extractor, Injector, TextMapPropagator};
use crate::trace::SpanContext;
use crate::{Context, SpanId, TraceFlags, TraceId};

const SUPPORTED_VERSION: u8 = 0;
const MAX_VERSION: u8 = 254;
const TRACEPARENT_HEADER: &str = "traceparent";
const BAGGAGE_HEADER: &str = "baggage";

// Characters that would collide with the list/pair syntax of the baggage
// encodings, plus '%' itself so decoding is unambiguous.
pub(super) const BAGGAGE_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b',')
    .add(b';')
    .add(b'=');

/// W3C-style `traceparent` codec with a companion `baggage` header.
///
/// Wire form:
/// `{version:02x}-{trace_id:032x}-{span_id:016x}-{flags:02x}`. Version 0
/// tolerates nothing after the flags field; higher versions may carry
/// additional fields, which are ignored. Hex must be lowercase and exactly
/// the stated width. Anything else is treated as absent.
#[derive(Clone, Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    pub fn new() -> Self {
        TraceContextPropagator::default()
    }

    fn extract_span_context(&self, extractor: &dyn Extractor) -> Result<SpanContext, ()> {
        let header_value = extractor
            .get(TRACEPARENT_HEADER)
            .map(str::trim)
            .ok_or(())?;
        let parts = header_value.split_terminator('-').collect::<Vec<&str>>();
        if parts.len() < 4 {
            return Err(());
        }

        let version = parse_lower_hex_u8(parts[0])?;
        if version > MAX_VERSION || (version == 0 && parts.len() != 4) {
            return Err(());
        }

        if parts[1].len() != 32 || !is_lower_hex(parts[1]) {
            return Err(());
        }
        let trace_id = TraceId::from_hex(parts[1]).map_err(|_| ())?;

        if parts[2].len() != 16 || !is_lower_hex(parts[2]) {
            return Err(());
        }
        let span_id = SpanId::from_hex(parts[2]).map_err(|_| ())?;

        let opts = parse_lower_hex_u8(parts[3])?;
        let trace_flags = TraceFlags::new(opts) & TraceFlags::SAMPLED;

        let span_context = SpanContext::new(trace_id, span_id, trace_flags, true);
        if span_context.is_valid() {
            Ok(span_context)
        } else {
            Err(())
        }
    }

    fn extract_baggage(&self, extractor: &dyn Extractor) -> Baggage {
        let mut baggage = Baggage::new();
        if let Some(header_value) = extractor.get(BAGGAGE_HEADER) {
            for entry in header_value.split(',') {
                let Some((key, value)) = entry.trim().split_once('=') else {
                    continue;
                };
                let (Ok(key), Ok(value)) = (
                    percent_decode_str(key.trim()).decode_utf8(),
                    percent_decode_str(value.trim()).decode_utf8(),
                ) else {
                    continue;
                };
                // Entries that fail baggage validation are skipped, not fatal.
                let _ = baggage.insert(key.into_owned(), value.into_owned());
            }
        }
        baggage
    }
}

impl TextMapPropagator for TraceContextPropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let Some(span_context) = cx.span_context().filter(|sc| sc.is_valid()) else {
            return;
        };
        let header_value = format!(
            "{:02x}-{:032x}-{:016x}-{:02x}",
            SUPPORTED_VERSION,
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags() & TraceFlags::SAMPLED
        );
        injector.set(TRACEPARENT_HEADER, header_value);

        if !span_context.baggage().is_empty() {
            let header_value = span_context
                .baggage()
                .iter()
                .map(|(key, value)| {
                    format!(
                        "{}={}",
                        utf8_percent_encode(key, BAGGAGE_ENCODE_SET),
                        utf8_percent_encode(value, BAGGAGE_ENCODE_SET)
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            injector.set(BAGGAGE_HEADER, header_value);
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.extract_span_context(extractor)
            .map(|sc| cx.with_span_context(sc.with_baggage(self.extract_baggage(extractor))))
            .unwrap_or_else(|_| cx.clone())
    }

    fn fields(&self) -> Vec<&'static str> {
        vec![TRACEPARENT_HEADER, BAGGAGE_HEADER]
    }
}

fn is_lower_hex(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn parse_lower_hex_u8(value: &str) -> Result<u8, ()> {
    if value.len() != 2 || !is_lower_hex(value) {
        return Err(());
    }
    u8::from_str_radix(value, 16).map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn extract(headers: &[(&str, &str)]) -> Context {
        let carrier: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TraceContextPropagator::new().extract_with_context(&Context::new(), &carrier)
    }

    fn sampled_context() -> SpanContext {
        SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
        )
    }

    #[test]
    fn extract_valid_headers() {
        let valid: Vec<(&str, SpanContext)> = vec![
            (
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
                sampled_context(),
            ),
            (
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00",
                SpanContext::new(
                    TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
                    SpanId::from_hex("00f067aa0ba902b7").unwrap(),
                    TraceFlags::NOT_SAMPLED,
                    true,
                ),
            ),
            // Unknown flag bits are masked down to the sampled bit.
            (
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09",
                sampled_context(),
            ),
            // A future version may carry extra fields.
            (
                "cc-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-what-the-future-will-be-like",
                sampled_context(),
            ),
        ];

        for (header, expected) in valid {
            let cx = extract(&[("traceparent", header)]);
            assert_eq!(cx.span_context(), Some(&expected), "header {header:?}");
        }
    }

    #[test]
    fn extract_rejects_malformed_headers() {
        let invalid = vec![
            "",
            "0000-00000000000000000000000000000000-0000000000000000-01",
            "00-ab00000000000000000000000000000000-cd00000000000000-01", // wrong length
            "00-ab000000000000000000000000000000-cd0000000000000000-01",
            "00-ab000000000000000000000000000000-cd00000000000000",
            "ff-00000000000000000000000000000000-0000000000000000-01", // bad version
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01", // uppercase
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00F067AA0BA902B7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-junk", // v0 trailing
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01", // zero trace id
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01", // zero span id
            "00-qw000000000000000000000000000000-cd00000000000000-01", // non-hex
        ];

        for header in invalid {
            let cx = extract(&[("traceparent", header)]);
            assert_eq!(cx.span_context(), None, "header {header:?}");
        }
    }

    #[test]
    fn round_trip_with_baggage() {
        let mut baggage = Baggage::new();
        baggage.insert("user", "a lice,=x").unwrap();
        baggage.insert("tenant", "t-9").unwrap();
        let injected = sampled_context()
            .child(SpanId::from_hex("53995c3f42cd8ad8").unwrap())
            .with_baggage(baggage.clone());

        let mut carrier = HashMap::new();
        let propagator = TraceContextPropagator::new();
        propagator.inject_context(&Context::new().with_span_context(injected.clone()), &mut carrier);

        assert_eq!(
            Extractor::get(&carrier, "traceparent"),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-53995c3f42cd8ad8-01")
        );
        assert_eq!(
            Extractor::get(&carrier, "baggage"),
            Some("user=a%20lice%2C%3Dx,tenant=t-9")
        );

        // Parent linkage is not part of this encoding; everything else
        // survives the round trip.
        let extracted = propagator.extract_with_context(&Context::new(), &carrier);
        let expected = SpanContext::new(
            injected.trace_id(),
            injected.span_id(),
            TraceFlags::SAMPLED,
            true,
        )
        .with_baggage(baggage);
        assert_eq!(extracted.span_context(), Some(&expected));
        assert_eq!(extracted.span_context().unwrap().parent_span_id(), None);
    }

    #[test]
    fn invalid_context_injects_nothing() {
        let mut carrier = HashMap::new();
        TraceContextPropagator::new()
            .inject_context(&Context::new().with_span_context(SpanContext::empty()), &mut carrier);
        assert!(carrier.is_empty());
    }

    #[test]
    fn malformed_baggage_entries_are_skipped() {
        let cx = extract(&[
            (
                "traceparent",
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            ),
            ("baggage", "ok=1,no-equals-sign, =empty-key,also_ok=2"),
        ]);
        let baggage = cx.span_context().unwrap().baggage().clone();
        assert_eq!(baggage.len(), 2);
        assert_eq!(baggage.get("ok"), Some("1"));
        assert_eq!(baggage.get("also_ok"), Some("2"));
    }
}
