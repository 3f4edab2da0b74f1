//! Inbound and outbound HTTP instrumentation.
//!
//! Both directions share one shape: derive a span from the surrounding
//! context, move trace identity through the headers, tag the outcome, and
//! finish the span on every path including failures.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};

use spanline::propagation::TextMapPropagator;
use spanline::trace::{SpanGuard, SpanKind, Status, Tracer};
use spanline::{Context, FutureExt};

use crate::{HeaderExtractor, HeaderInjector, HttpClient, HttpError};

/// Handle one inbound request inside a server span.
///
/// The remote context is extracted from the request headers (malformed or
/// absent headers start a fresh trace), a `Server` span named after the
/// request path wraps the handler, and the handler runs with that span's
/// context both passed explicitly and attached as the ambient context.
/// Handler errors become a 500 response; either way the span is finished
/// with the response code tagged. Dropping the returned future mid-handler
/// (a timeout, a client disconnect) still finishes the span, with error
/// status marking the cancellation.
pub async fn serve<H, Fut>(
    tracer: &Tracer,
    propagator: &dyn TextMapPropagator,
    request: Request<Bytes>,
    handler: H,
) -> Response<Bytes>
where
    H: FnOnce(Request<Bytes>, Context) -> Fut,
    Fut: Future<Output = Result<Response<Bytes>, HttpError>>,
{
    let parent_cx =
        propagator.extract_with_context(&Context::new(), &HeaderExtractor(request.headers()));
    let mut span = SpanGuard::new(
        tracer.start_with_context(
            request.uri().path().to_owned(),
            &parent_cx,
            SpanKind::Server,
        ),
        Status::error("request cancelled"),
    );
    span.set_tag("http.method", request.method().as_str());
    span.set_tag("http.target", request.uri().path());

    let cx = parent_cx.with_span_context(span.span_context().clone());
    match handler(request, cx.clone()).with_context(cx).await {
        Ok(response) => {
            span.set_tag("http.status_code", i64::from(response.status().as_u16()));
            if response.status().is_server_error() {
                span.set_status(Status::error(format!(
                    "server error {}",
                    response.status().as_u16()
                )));
            }
            span.finish();
            response
        }
        Err(err) => {
            span.set_tag(
                "http.status_code",
                i64::from(StatusCode::INTERNAL_SERVER_ERROR.as_u16()),
            );
            span.set_status(Status::error(err.to_string()));
            span.finish();
            let mut response = Response::new(Bytes::from(err.to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// Outbound HTTP client wrapper that spans and propagates every request.
#[derive(Clone, Debug)]
pub struct TracedHttpClient {
    inner: Arc<dyn HttpClient>,
    tracer: Tracer,
    propagator: Arc<dyn TextMapPropagator>,
}

impl TracedHttpClient {
    pub fn new(
        inner: Arc<dyn HttpClient>,
        tracer: Tracer,
        propagator: Arc<dyn TextMapPropagator>,
    ) -> Self {
        TracedHttpClient {
            inner,
            tracer,
            propagator,
        }
    }

    /// Send a request inside a `Client` span parented on `cx`.
    ///
    /// The span's own identity is injected into the request headers, so the
    /// callee parents on this hop rather than on the caller's server span.
    /// Transport errors are returned to the caller after the span is
    /// finished with error status.
    pub async fn send(
        &self,
        cx: &Context,
        mut request: Request<Bytes>,
    ) -> Result<Response<Bytes>, HttpError> {
        let mut span = SpanGuard::new(
            self.tracer.start_with_context(
                format!("{} {}", request.method(), request.uri().path()),
                cx,
                SpanKind::Client,
            ),
            Status::error("request cancelled"),
        );
        span.set_tag("http.method", request.method().as_str());
        span.set_tag("http.url", request.uri().to_string());

        let send_cx = cx.with_span_context(span.span_context().clone());
        self.propagator
            .inject_context(&send_cx, &mut HeaderInjector(request.headers_mut()));

        match self.inner.send_bytes(request).with_context(send_cx).await {
            Ok(response) => {
                span.set_tag("http.status_code", i64::from(response.status().as_u16()));
                if response.status().is_server_error() {
                    span.set_status(Status::error(format!(
                        "server error {}",
                        response.status().as_u16()
                    )));
                }
                span.finish();
                Ok(response)
            }
            Err(err) => {
                span.set_status(Status::error(err.to_string()));
                span.finish();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::HeaderMap;
    use spanline::export::{BatchConfigBuilder, BatchSpanProcessor, InMemorySpanExporter};
    use spanline::propagation::TraceContextPropagator;
    use spanline::trace::{ServiceInfo, SpanData, SpanKind, TagValue};
    use std::sync::Mutex;
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

    fn get_request(path: &str) -> Request<Bytes> {
        Request::builder()
            .method("GET")
            .uri(format!("http://upstream{path}"))
            .body(Bytes::new())
            .unwrap()
    }

    #[derive(Debug)]
    struct Loopback {
        status: StatusCode,
        seen_headers: Arc<Mutex<Vec<HeaderMap>>>,
    }

    impl Loopback {
        fn ok() -> (Arc<Self>, Arc<Mutex<Vec<HeaderMap>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let client = Arc::new(Loopback {
                status: StatusCode::OK,
                seen_headers: Arc::clone(&seen),
            });
            (client, seen)
        }
    }

    #[async_trait]
    impl HttpClient for Loopback {
        async fn send_bytes(
            &self,
            request: Request<Bytes>,
        ) -> Result<Response<Bytes>, HttpError> {
            self.seen_headers
                .lock()
                .unwrap()
                .push(request.headers().clone());
            let mut response = Response::new(Bytes::new());
            *response.status_mut() = self.status;
            Ok(response)
        }
    }

    #[tokio::test]
    async fn serve_without_carrier_starts_a_fresh_root() {
        let (tracer, exporter) = test_tracer("edge");
        let propagator = TraceContextPropagator::new();

        let response = serve(&tracer, &propagator, get_request("/kv/get"), |_req, cx| async move {
            assert!(cx.has_active_span());
            assert_eq!(Context::current().span_context(), cx.span_context());
            Ok(Response::new(Bytes::from_static(b"ok")))
        })
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let spans = flushed(&tracer, &exporter);
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "/kv/get");
        assert_eq!(span.kind, SpanKind::Server);
        assert_eq!(span.span_context.parent_span_id(), None);
        assert_eq!(span.tag("http.method"), Some(&TagValue::String("GET".into())));
        assert_eq!(span.tag("http.status_code"), Some(&TagValue::I64(200)));
    }

    #[tokio::test]
    async fn serve_parents_on_the_extracted_context() {
        let (tracer, exporter) = test_tracer("edge");
        let propagator = TraceContextPropagator::new();

        let mut request = get_request("/kv/get");
        request.headers_mut().insert(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
                .parse()
                .unwrap(),
        );

        serve(&tracer, &propagator, request, |_req, _cx| async move {
            Ok(Response::new(Bytes::new()))
        })
        .await;

        let spans = flushed(&tracer, &exporter);
        let span = &spans[0];
        assert_eq!(
            format!("{}", span.span_context.trace_id()),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(
            span.span_context.parent_span_id().map(|id| format!("{id}")),
            Some("00f067aa0ba902b7".to_string())
        );
    }

    #[tokio::test]
    async fn handler_errors_become_500_and_an_error_span() {
        let (tracer, exporter) = test_tracer("edge");
        let propagator = TraceContextPropagator::new();

        let response = serve(&tracer, &propagator, get_request("/kv/put"), |_req, _cx| async move {
            Err::<Response<Bytes>, HttpError>("downstream unavailable".into())
        })
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let spans = flushed(&tracer, &exporter);
        let span = &spans[0];
        assert_eq!(span.status, Status::error("downstream unavailable"));
        assert_eq!(span.tag("error"), Some(&TagValue::Bool(true)));
        assert_eq!(span.tag("http.status_code"), Some(&TagValue::I64(500)));
    }

    #[tokio::test]
    async fn cancelled_requests_still_export_a_finished_server_span() {
        let (tracer, exporter) = test_tracer("edge");
        let propagator = TraceContextPropagator::new();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            serve(&tracer, &propagator, get_request("/kv/get"), |_req, _cx| async move {
                std::future::pending::<Result<Response<Bytes>, HttpError>>().await
            }),
        )
        .await;
        assert!(result.is_err());

        let spans = flushed(&tracer, &exporter);
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "/kv/get");
        assert_eq!(span.kind, SpanKind::Server);
        assert_eq!(span.status, Status::error("request cancelled"));
        assert_eq!(span.tag("error"), Some(&TagValue::Bool(true)));
    }

    #[tokio::test]
    async fn outbound_client_injects_its_own_span() {
        let (tracer, exporter) = test_tracer("edge");
        let propagator: Arc<dyn TextMapPropagator> = Arc::new(TraceContextPropagator::new());
        let (loopback, seen) = Loopback::ok();
        let client = TracedHttpClient::new(loopback, tracer.clone(), Arc::clone(&propagator));

        let inner_client = client.clone();
        serve(
            &tracer,
            propagator.as_ref(),
            get_request("/kv/get"),
            |_req, cx| async move {
                inner_client
                    .send(&cx, get_request("/storage/get"))
                    .await
                    .map(|_| Response::new(Bytes::new()))
            },
        )
        .await;

        let spans = flushed(&tracer, &exporter);
        assert_eq!(spans.len(), 2);
        let client_span = spans.iter().find(|s| s.kind == SpanKind::Client).unwrap();
        let server_span = spans.iter().find(|s| s.kind == SpanKind::Server).unwrap();
        assert_eq!(
            client_span.span_context.trace_id(),
            server_span.span_context.trace_id()
        );
        assert_eq!(
            client_span.span_context.parent_span_id(),
            Some(server_span.span_context.span_id())
        );

        // The wire carries the client span, not the server span.
        let seen = seen.lock().unwrap();
        let outbound = HeaderExtractor(&seen[0]);
        let extracted =
            propagator.extract_with_context(&Context::new(), &outbound);
        let remote = extracted.span_context().unwrap();
        assert_eq!(remote.trace_id(), client_span.span_context.trace_id());
        assert_eq!(remote.span_id(), client_span.span_context.span_id());
    }
}
