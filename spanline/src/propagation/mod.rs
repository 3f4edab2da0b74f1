//! Injecting and extracting trace context through text carriers.
//!
//! A carrier is anything that maps string keys to string values: HTTP
//! headers, RPC metadata, or a plain map. Codecs speak to carriers only
//! through [`Injector`] and [`Extractor`], so one codec serves every
//! transport.

mod b3;
mod composite;
mod trace_context;

pub use b3::B3Propagator;
pub use composite::CompositePropagator;
pub use trace_context::TraceContextPropagator;

use std::collections::HashMap;
use std::fmt;

use crate::Context;

/// Write half of a carrier.
pub trait Injector {
    /// Set a key/value pair, replacing any previous value.
    fn set(&mut self, key: &str, value: String);
}

/// Read half of a carrier.
pub trait Extractor {
    /// The value for `key`, if present and representable as a string.
    fn get(&self, key: &str) -> Option<&str>;

    /// All keys the carrier holds.
    fn keys(&self) -> Vec<&str>;
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(|k| k.as_str()).collect()
    }
}

/// One wire encoding of a span context.
///
/// Implementations own a disjoint set of carrier keys, so several codecs
/// can be applied to the same carrier without interference. Extraction
/// never fails: a malformed or absent encoding yields a context with no
/// remote parent.
pub trait TextMapPropagator: fmt::Debug + Send + Sync {
    /// Encode the context's active span into the carrier.
    ///
    /// A context without a valid span context writes nothing.
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector);

    /// Decode a remote span context from the carrier onto `cx`.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context;

    /// Encode the current context.
    fn inject(&self, injector: &mut dyn Injector) {
        self.inject_context(&Context::current(), injector)
    }

    /// Decode onto the current context.
    fn extract(&self, extractor: &dyn Extractor) -> Context {
        self.extract_with_context(&Context::current(), extractor)
    }

    /// The fixed carrier keys this codec reads and writes.
    fn fields(&self) -> Vec<&'static str>;
}
