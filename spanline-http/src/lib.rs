//! HTTP bindings for `spanline`.
//!
//! This crate adapts `http::HeaderMap` to the carrier traits, defines an
//! abstract async [`HttpClient`] so nothing here commits to a particular
//! HTTP implementation, and builds two things on top: request middleware
//! ([`middleware`]) and an HTTP+JSON collector exporter ([`exporter`]).

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use spanline::propagation::{Extractor, Injector};

pub mod exporter;
pub mod middleware;

pub use exporter::JsonCollectorExporter;
pub use middleware::{serve, TracedHttpClient};

/// Opaque transport error produced by an [`HttpClient`].
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Minimal async HTTP client contract.
///
/// Implemented over whatever client a service already uses; tests use an
/// in-process loopback.
#[async_trait]
pub trait HttpClient: fmt::Debug + Send + Sync {
    /// Send a request and return the full response.
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError>;
}

/// Writes carrier keys as HTTP headers.
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(value) = HeaderValue::from_str(&value) {
                self.0.insert(name, value);
            }
        }
    }
}

/// Reads carrier keys from HTTP headers.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}
