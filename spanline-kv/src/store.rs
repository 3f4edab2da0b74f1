//! Key-value storage backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use spanline::trace::{SpanKind, Status, Tracer};
use spanline::Context;

/// Failure from a storage backend.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StorageError {
    #[error("key {0:?} not found")]
    NotFound(String),

    #[error("key must not be empty")]
    EmptyKey,

    #[error("value must not be empty")]
    EmptyValue,

    #[error("backend failure: {0}")]
    Backend(String),
}

/// The key-value storage contract the mid-tier forwards to.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Store `value` under `key`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> Result<(), StorageError>;

    /// The live value under `key`.
    async fn get(&self, key: &str) -> Result<String, StorageError>;
}

/// In-memory backend with lazy TTL eviction, standing in for the network
/// cache the real deployment talks to.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("store lock poisoned".to_owned()))?;
        entries.insert(key.to_owned(), (value.to_owned(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Backend("store lock poisoned".to_owned()))?;
        match entries.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                entries.remove(key);
                Err(StorageError::NotFound(key.to_owned()))
            }
            Some((value, _)) => Ok(value.clone()),
            None => Err(StorageError::NotFound(key.to_owned())),
        }
    }
}

/// Wrapper that fails every call while its switch is on. Test-only backend
/// for exercising error paths through the chain.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<dyn Storage>,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        FlakyStore {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::Relaxed) {
            Err(StorageError::Backend("injected failure".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for FlakyStore {
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        self.check()?;
        self.inner.get(key).await
    }
}

/// Storage wrapper that opens a `Client` span around every call.
///
/// Spans parent on the ambient context of the calling task and are named
/// `cache.set` / `cache.get`. Only the key is tagged; values never enter
/// the trace.
#[derive(Debug)]
pub struct TracedStore {
    inner: Arc<dyn Storage>,
    tracer: Tracer,
}

impl TracedStore {
    pub fn new(inner: Arc<dyn Storage>, tracer: Tracer) -> Self {
        TracedStore { inner, tracer }
    }

    fn finish(span: &mut spanline::trace::Span, result: &Result<(), &StorageError>) {
        if let Err(err) = result {
            span.set_status(Status::error(err.to_string()));
        }
        span.finish();
    }
}

#[async_trait]
impl Storage for TracedStore {
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut span =
            self.tracer
                .start_with_context("cache.set", &Context::current(), SpanKind::Client);
        span.set_tag("cache.key", key);
        let result = self.inner.set(key, value, ttl).await;
        Self::finish(&mut span, &result.as_ref().map(|_| ()));
        result
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let mut span =
            self.tracer
                .start_with_context("cache.get", &Context::current(), SpanKind::Client);
        span.set_tag("cache.key", key);
        let result = self.inner.get(key).await;
        Self::finish(&mut span, &result.as_ref().map(|_| ()));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spanline::export::{BatchConfigBuilder, BatchSpanProcessor, InMemorySpanExporter};
    use spanline::trace::{ServiceInfo, TagValue};

    #[tokio::test]
    async fn memory_store_round_trip_and_ttl() {
        let store = MemoryStore::new();
        store.set("k1", "v1", None).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), "v1");

        store
            .set("ephemeral", "x", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(
            store.get("ephemeral").await,
            Err(StorageError::NotFound("ephemeral".to_owned()))
        );
        assert_eq!(
            store.get("never-set").await,
            Err(StorageError::NotFound("never-set".to_owned()))
        );
    }

    #[tokio::test]
    async fn flaky_store_toggles_failures() {
        let flaky = FlakyStore::new(Arc::new(MemoryStore::new()));
        flaky.set("k1", "v1", None).await.unwrap();

        flaky.set_failing(true);
        assert!(matches!(
            flaky.get("k1").await,
            Err(StorageError::Backend(_))
        ));

        flaky.set_failing(false);
        assert_eq!(flaky.get("k1").await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn traced_store_tags_the_key_never_the_value() {
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::builder(ServiceInfo::new("store-test", "0.0.0"))
            .with_processor(BatchSpanProcessor::new(
                exporter.clone(),
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(60))
                    .build(),
            ))
            .build();
        let store = TracedStore::new(Arc::new(MemoryStore::new()), tracer.clone());

        store.set("secret-key", "secret-value", None).await.unwrap();
        store.get("secret-key").await.unwrap();
        tracer.force_flush().unwrap();

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "cache.set");
        assert_eq!(spans[1].name, "cache.get");
        for span in &spans {
            assert_eq!(
                span.tag("cache.key"),
                Some(&TagValue::String("secret-key".into()))
            );
            assert!(!span
                .tags
                .iter()
                .any(|(_, v)| matches!(v, TagValue::String(s) if s.contains("secret-value"))));
        }
    }

    #[tokio::test]
    async fn traced_store_parents_on_the_ambient_context() {
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::builder(ServiceInfo::new("store-test", "0.0.0"))
            .with_processor(BatchSpanProcessor::new(
                exporter.clone(),
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(60))
                    .build(),
            ))
            .build();
        let store = TracedStore::new(Arc::new(MemoryStore::new()), tracer.clone());

        let root = tracer.start_span("request", None, SpanKind::Server);
        let cx = Context::new().with_span_context(root.span_context().clone());
        {
            let _guard = cx.attach();
            store.set("k", "v", None).await.unwrap();
        }
        tracer.force_flush().unwrap();

        let spans = exporter.finished_spans();
        assert_eq!(
            spans[0].span_context.parent_span_id(),
            Some(root.span_context().span_id())
        );
    }
}
