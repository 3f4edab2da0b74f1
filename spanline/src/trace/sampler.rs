use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Head sampling policy, consulted once per root span.
///
/// Descendants inherit the root's decision through their
/// [`SpanContext`](crate::trace::SpanContext) flags and never re-sample.
#[derive(Clone, Debug)]
pub enum Sampler {
    /// Sample every trace.
    AlwaysOn,
    /// Sample no traces; spans still propagate identity.
    AlwaysOff,
    /// Deterministically sample one trace in `every`.
    ///
    /// The counter is shared across clones of the sampler, so all tracers
    /// holding one instance count against the same window. The first trace
    /// observed is sampled.
    Counting {
        every: u64,
        counter: Arc<AtomicU64>,
    },
}

impl Sampler {
    /// A counting sampler admitting one in `every` traces.
    ///
    /// `every` of zero behaves as one (sample everything).
    pub fn counting(every: u64) -> Self {
        Sampler::Counting {
            every: every.max(1),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Decide whether a new root trace should be sampled.
    pub fn should_sample(&self) -> bool {
        match self {
            Sampler::AlwaysOn => true,
            Sampler::AlwaysOff => false,
            Sampler::Counting { every, counter } => {
                counter.fetch_add(1, Ordering::Relaxed) % every == 0
            }
        }
    }
}
