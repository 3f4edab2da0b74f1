//! Inbound and outbound RPC instrumentation over [`RpcTransport`].

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tonic::metadata::MetadataMap;
use tonic::Status as RpcStatus;

use spanline::propagation::TextMapPropagator;
use spanline::trace::{SpanGuard, SpanKind, Status, Tracer};
use spanline::{Context, FutureExt};

use crate::{MetadataExtractor, MetadataInjector, RpcTransport};

/// Handle one inbound unary call inside a server span.
///
/// The remote context is extracted from the request metadata, a `Server`
/// span named after the method wraps the handler, and the handler runs
/// with that span's context passed explicitly and attached as ambient.
/// The result passes through unchanged; failures finish the span with
/// error status first, and a call future dropped mid-handler still
/// finishes the span with error status.
pub async fn serve<H, Fut>(
    tracer: &Tracer,
    propagator: &dyn TextMapPropagator,
    method: &str,
    metadata: &MetadataMap,
    handler: H,
) -> Result<Bytes, RpcStatus>
where
    H: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<Bytes, RpcStatus>>,
{
    let parent_cx =
        propagator.extract_with_context(&Context::new(), &MetadataExtractor(metadata));
    let mut span = SpanGuard::new(
        tracer.start_with_context(method.to_owned(), &parent_cx, SpanKind::Server),
        Status::error("call cancelled"),
    );
    span.set_tag("rpc.method", method);

    let cx = parent_cx.with_span_context(span.span_context().clone());
    match handler(cx.clone()).with_context(cx).await {
        Ok(payload) => {
            span.finish();
            Ok(payload)
        }
        Err(status) => {
            span.set_tag("rpc.grpc.status_code", i64::from(status.code() as i32));
            span.set_status(Status::error(status.message().to_owned()));
            span.finish();
            Err(status)
        }
    }
}

/// Outbound RPC wrapper that spans and propagates every unary call.
#[derive(Clone, Debug)]
pub struct TracedRpcClient {
    inner: Arc<dyn RpcTransport>,
    tracer: Tracer,
    propagator: Arc<dyn TextMapPropagator>,
}

impl TracedRpcClient {
    pub fn new(
        inner: Arc<dyn RpcTransport>,
        tracer: Tracer,
        propagator: Arc<dyn TextMapPropagator>,
    ) -> Self {
        TracedRpcClient {
            inner,
            tracer,
            propagator,
        }
    }

    /// Issue a unary call inside a `Client` span parented on `cx`.
    pub async fn call(
        &self,
        cx: &Context,
        method: &str,
        payload: Bytes,
    ) -> Result<Bytes, RpcStatus> {
        let mut span = SpanGuard::new(
            self.tracer
                .start_with_context(method.to_owned(), cx, SpanKind::Client),
            Status::error("call cancelled"),
        );
        span.set_tag("rpc.method", method);

        let send_cx = cx.with_span_context(span.span_context().clone());
        let mut metadata = MetadataMap::new();
        self.propagator
            .inject_context(&send_cx, &mut MetadataInjector(&mut metadata));

        match self
            .inner
            .call(method, metadata, payload)
            .with_context(send_cx)
            .await
        {
            Ok(response) => {
                span.finish();
                Ok(response)
            }
            Err(status) => {
                span.set_tag("rpc.grpc.status_code", i64::from(status.code() as i32));
                span.set_status(Status::error(status.message().to_owned()));
                span.finish();
                Err(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use spanline::export::{BatchConfigBuilder, BatchSpanProcessor, InMemorySpanExporter};
    use spanline::propagation::B3Propagator;
    use spanline::trace::{ServiceInfo, SpanData, TagValue};
    use std::time::Duration;

    fn test_tracer(name: &str) -> (Tracer, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::builder(ServiceInfo::new(name, "0.0.0"))
            .with_processor(BatchSpanProcessor::new(
                exporter.clone(),
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(60))
                    .build(),
            ))
            .build();
        (tracer, exporter)
    }

    fn flushed(tracer: &Tracer, exporter: &InMemorySpanExporter) -> Vec<SpanData> {
        tracer.force_flush().unwrap();
        exporter.finished_spans()
    }

    /// Transport that answers every call inside its own server span, the
    /// way a remote service would.
    #[derive(Debug)]
    struct EchoServer {
        tracer: Tracer,
        fail_with: Option<tonic::Code>,
    }

    #[async_trait]
    impl RpcTransport for EchoServer {
        async fn call(
            &self,
            method: &str,
            metadata: MetadataMap,
            payload: Bytes,
        ) -> Result<Bytes, RpcStatus> {
            let fail_with = self.fail_with;
            serve(&self.tracer, &B3Propagator::new(), method, &metadata, |_cx| async move {
                match fail_with {
                    Some(code) => Err(RpcStatus::new(code, "injected failure")),
                    None => Ok(payload),
                }
            })
            .await
        }
    }

    #[tokio::test]
    async fn client_and_server_spans_share_one_trace() {
        let (client_tracer, client_exporter) = test_tracer("edge");
        let (server_tracer, server_exporter) = test_tracer("mid");
        let client = TracedRpcClient::new(
            Arc::new(EchoServer {
                tracer: server_tracer.clone(),
                fail_with: None,
            }),
            client_tracer.clone(),
            Arc::new(B3Propagator::new()),
        );

        let response = client
            .call(&Context::new(), "kv.Storage/Get", Bytes::from_static(b"k1"))
            .await
            .unwrap();
        assert_eq!(response, Bytes::from_static(b"k1"));

        let client_spans = flushed(&client_tracer, &client_exporter);
        let server_spans = flushed(&server_tracer, &server_exporter);
        assert_eq!(client_spans.len(), 1);
        assert_eq!(server_spans.len(), 1);

        let client_span = &client_spans[0];
        let server_span = &server_spans[0];
        assert_eq!(client_span.kind, SpanKind::Client);
        assert_eq!(server_span.kind, SpanKind::Server);
        assert_eq!(
            server_span.span_context.trace_id(),
            client_span.span_context.trace_id()
        );
        assert_eq!(
            server_span.span_context.parent_span_id(),
            Some(client_span.span_context.span_id())
        );
        assert_eq!(
            server_span.tag("rpc.method"),
            Some(&TagValue::String("kv.Storage/Get".into()))
        );
    }

    #[tokio::test]
    async fn cancelled_calls_still_export_a_finished_server_span() {
        let (tracer, exporter) = test_tracer("mid");

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            serve(
                &tracer,
                &B3Propagator::new(),
                "kv.Storage/Get",
                &MetadataMap::new(),
                |_cx| async move { std::future::pending::<Result<Bytes, RpcStatus>>().await },
            ),
        )
        .await;
        assert!(result.is_err());

        let spans = flushed(&tracer, &exporter);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "kv.Storage/Get");
        assert_eq!(spans[0].status, Status::error("call cancelled"));
        assert_eq!(spans[0].tag("error"), Some(&TagValue::Bool(true)));
    }

    #[tokio::test]
    async fn failures_tag_both_sides_and_propagate() {
        let (client_tracer, client_exporter) = test_tracer("edge");
        let (server_tracer, server_exporter) = test_tracer("mid");
        let client = TracedRpcClient::new(
            Arc::new(EchoServer {
                tracer: server_tracer.clone(),
                fail_with: Some(tonic::Code::Unavailable),
            }),
            client_tracer.clone(),
            Arc::new(B3Propagator::new()),
        );

        let err = client
            .call(&Context::new(), "kv.Storage/Get", Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);

        for spans in [
            flushed(&client_tracer, &client_exporter),
            flushed(&server_tracer, &server_exporter),
        ] {
            assert_eq!(spans.len(), 1);
            assert_eq!(spans[0].tag("error"), Some(&TagValue::Bool(true)));
            assert_eq!(spans[0].status, Status::error("injected failure"));
        }
    }
}
