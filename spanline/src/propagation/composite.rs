use crate::propagation::{Extractor, Injector, TextMapPropagator};
use crate::Context;

/// Runs several codecs against one carrier.
///
/// Injection applies every codec; extraction applies them in order and the
/// last one that finds a valid remote context wins. Codecs own disjoint key
/// namespaces, so a carrier produced here can be read by peers that know
/// only one of the encodings.
#[derive(Debug)]
pub struct CompositePropagator {
    propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>>,
}

impl CompositePropagator {
    pub fn new(propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>>) -> Self {
        CompositePropagator { propagators }
    }
}

impl TextMapPropagator for CompositePropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        for propagator in &self.propagators {
            propagator.inject_context(cx, injector);
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.propagators
            .iter()
            .fold(cx.clone(), |current, propagator| {
                propagator.extract_with_context(&current, extractor)
            })
    }

    fn fields(&self) -> Vec<&'static str> {
        let mut fields: Vec<&'static str> = self
            .propagators
            .iter()
            .flat_map(|propagator| propagator.fields())
            .collect();
        fields.dedup();
        fields
    }
}
