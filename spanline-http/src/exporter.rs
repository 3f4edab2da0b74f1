//! HTTP+JSON span submission.
//!
//! Serializes finished spans to a JSON array and POSTs each batch to a
//! collector endpoint through the [`HttpClient`] contract. The wire model
//! is self-describing JSON, not a collector-specific schema; a collector
//! adapter only needs `serde` on the other side.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{header::CONTENT_TYPE, Method, Request, Uri};
use serde::Serialize;

use spanline::export::{ExportError, ExportResult, SpanExporter};
use spanline::trace::{SpanData, SpanKind, Status, TagValue};

use crate::HttpClient;

const DEFAULT_COLLECTOR_ENDPOINT: &str = "http://127.0.0.1:9411/api/v2/spans";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSpan {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    name: String,
    kind: &'static str,
    service_name: String,
    service_version: String,
    /// Microseconds since the Unix epoch.
    timestamp: u64,
    /// Microseconds.
    duration: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<WireTag>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_message: Option<String>,
}

#[derive(Serialize)]
struct WireTag {
    key: String,
    value: serde_json::Value,
}

fn unix_micros(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

impl From<SpanData> for WireSpan {
    fn from(span: SpanData) -> Self {
        let (status, status_message) = match &span.status {
            Status::Unset => ("unset", None),
            Status::Ok => ("ok", None),
            Status::Error { message } => ("error", Some(message.to_string())),
        };
        WireSpan {
            trace_id: span.span_context.trace_id().to_string(),
            span_id: span.span_context.span_id().to_string(),
            parent_span_id: span
                .span_context
                .parent_span_id()
                .map(|id| id.to_string()),
            name: span.name.into_owned(),
            kind: match span.kind {
                SpanKind::Server => "server",
                SpanKind::Client => "client",
                SpanKind::Internal => "internal",
            },
            service_name: span.service.name,
            service_version: span.service.version,
            timestamp: unix_micros(span.start_time),
            duration: unix_micros(span.end_time).saturating_sub(unix_micros(span.start_time)),
            tags: span
                .tags
                .into_iter()
                .map(|(key, value)| WireTag {
                    key,
                    value: match value {
                        TagValue::String(v) => serde_json::Value::from(v),
                        TagValue::I64(v) => serde_json::Value::from(v),
                        TagValue::F64(v) => serde_json::Value::from(v),
                        TagValue::Bool(v) => serde_json::Value::from(v),
                    },
                })
                .collect(),
            status,
            status_message,
        }
    }
}

/// Builder for [`JsonCollectorExporter`].
#[derive(Debug)]
pub struct JsonCollectorExporterBuilder {
    client: Arc<dyn HttpClient>,
    endpoint: String,
}

impl JsonCollectorExporterBuilder {
    /// Override the collector endpoint (default `127.0.0.1:9411`).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn build(self) -> Result<JsonCollectorExporter, ExportError> {
        let endpoint: Uri = self
            .endpoint
            .parse()
            .map_err(|err| ExportError::Internal(format!("invalid collector endpoint: {err}")))?;
        Ok(JsonCollectorExporter {
            client: self.client,
            endpoint,
        })
    }
}

/// Exports span batches as JSON over HTTP.
#[derive(Debug)]
pub struct JsonCollectorExporter {
    client: Arc<dyn HttpClient>,
    endpoint: Uri,
}

impl JsonCollectorExporter {
    pub fn builder(client: Arc<dyn HttpClient>) -> JsonCollectorExporterBuilder {
        JsonCollectorExporterBuilder {
            client,
            endpoint: DEFAULT_COLLECTOR_ENDPOINT.to_string(),
        }
    }
}

impl SpanExporter for JsonCollectorExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let wire: Vec<WireSpan> = batch.into_iter().map(WireSpan::from).collect();
        let payload = match serde_json::to_vec(&wire) {
            Ok(payload) => payload,
            Err(err) => {
                return Box::pin(futures_util::future::ready(Err(ExportError::Internal(
                    format!("span serialization failed: {err}"),
                ))))
            }
        };

        let client = Arc::clone(&self.client);
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let request = Request::builder()
                .method(Method::POST)
                .uri(endpoint)
                .header(CONTENT_TYPE, "application/json")
                .body(Bytes::from(payload))
                .map_err(|err| ExportError::Internal(err.to_string()))?;

            let response = client
                .send_bytes(request)
                .await
                .map_err(|err| ExportError::Transport(err.to_string()))?;
            if !response.status().is_success() {
                return Err(ExportError::Transport(format!(
                    "collector returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}
