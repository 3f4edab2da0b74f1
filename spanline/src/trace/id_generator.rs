use std::fmt;

use crate::{SpanId, TraceId};

/// Source of trace and span identifiers.
///
/// Generation is infallible; implementations must be cheap enough to call
/// once per span on the request path.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// A new trace id for a root span.
    fn new_trace_id(&self) -> TraceId;

    /// A new span id.
    fn new_span_id(&self) -> SpanId;
}

/// Generates random ids from a per-thread non-cryptographic RNG.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().gen::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().gen::<u64>()))
    }
}

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::cell::RefCell;

thread_local! {
    static CURRENT_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_entropy());
}

/// Deterministic generator for tests: ids count up from one.
#[cfg(feature = "testing")]
#[derive(Debug)]
pub struct IncrementIdGenerator {
    next: std::sync::atomic::AtomicU64,
}

#[cfg(feature = "testing")]
impl IncrementIdGenerator {
    pub fn new() -> Self {
        IncrementIdGenerator {
            next: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

// Zero is the invalid id, so the default counter must not start there.
#[cfg(feature = "testing")]
impl Default for IncrementIdGenerator {
    fn default() -> Self {
        IncrementIdGenerator::new()
    }
}

#[cfg(feature = "testing")]
impl IdGenerator for IncrementIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        let id = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        TraceId::from(id as u128)
    }

    fn new_span_id(&self) -> SpanId {
        let id = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        SpanId::from(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_distinct() {
        let generator = RandomIdGenerator::default();
        let a = generator.new_trace_id();
        let b = generator.new_trace_id();
        assert_ne!(a, b);
        assert_ne!(generator.new_span_id(), generator.new_span_id());
    }
}
