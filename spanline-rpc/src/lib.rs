//! RPC bindings for `spanline`.
//!
//! Adapts `tonic::metadata::MetadataMap` to the carrier traits and defines
//! [`RpcTransport`], an abstract unary-call seam: method name, metadata,
//! opaque payload in, opaque payload or `tonic::Status` out. The
//! [`middleware`] module instruments both sides of that seam.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tonic::metadata::{KeyRef, MetadataKey, MetadataMap};

use spanline::propagation::{Extractor, Injector};

pub mod middleware;

pub use middleware::{serve, TracedRpcClient};

/// Minimal unary RPC contract.
///
/// Implemented by generated client stubs in real services; tests and the
/// demo chain implement it in process.
#[async_trait]
pub trait RpcTransport: fmt::Debug + Send + Sync {
    async fn call(
        &self,
        method: &str,
        metadata: MetadataMap,
        payload: Bytes,
    ) -> Result<Bytes, tonic::Status>;
}

/// Writes carrier keys as ASCII request metadata.
pub struct MetadataInjector<'a>(pub &'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(key) = MetadataKey::from_bytes(key.as_bytes()) {
            if let Ok(value) = value.parse() {
                self.0.insert(key, value);
            }
        }
    }
}

/// Reads carrier keys from request metadata.
pub struct MetadataExtractor<'a>(pub &'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|key| match key {
                KeyRef::Ascii(v) => v.as_str(),
                KeyRef::Binary(v) => v.as_str(),
            })
            .collect()
    }
}
