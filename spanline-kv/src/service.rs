//! The two service tiers of the demo chain.
//!
//! `EdgeService` terminates HTTP and forwards to `StorageService` over the
//! RPC seam; `StorageService` validates and forwards to a [`Storage`]
//! backend. Each tier owns its own tracer, so the chain exercises context
//! propagation across two process boundaries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tonic::metadata::MetadataMap;
use tonic::Status as RpcStatus;

use spanline::propagation::TextMapPropagator;
use spanline::trace::Tracer;
use spanline::Context;
use spanline_http::{serve as serve_http, HttpError};
use spanline_rpc::{serve as serve_rpc, RpcTransport, TracedRpcClient};

use crate::store::{Storage, StorageError, TracedStore};

pub const SET_METHOD: &str = "kv.Storage/Set";
pub const GET_METHOD: &str = "kv.Storage/Get";

#[derive(Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
}

#[derive(Serialize, Deserialize)]
pub struct GetResponse {
    pub value: String,
}

fn rpc_status(err: &StorageError) -> RpcStatus {
    match err {
        StorageError::NotFound(_) => RpcStatus::not_found(err.to_string()),
        StorageError::EmptyKey | StorageError::EmptyValue => {
            RpcStatus::invalid_argument(err.to_string())
        }
        StorageError::Backend(_) => RpcStatus::internal(err.to_string()),
    }
}

/// Mid-tier service: answers the RPC seam and forwards to storage.
///
/// Every backend call goes through a [`TracedStore`], so each request
/// produces a server span with a `cache.*` client span beneath it.
#[derive(Debug)]
pub struct StorageService {
    store: TracedStore,
    tracer: Tracer,
    propagator: Arc<dyn TextMapPropagator>,
}

impl StorageService {
    pub fn new(
        store: Arc<dyn Storage>,
        tracer: Tracer,
        propagator: Arc<dyn TextMapPropagator>,
    ) -> Self {
        StorageService {
            store: TracedStore::new(store, tracer.clone()),
            tracer,
            propagator,
        }
    }

    async fn set(&self, request: SetRequest) -> Result<Bytes, RpcStatus> {
        if request.key.is_empty() {
            return Err(rpc_status(&StorageError::EmptyKey));
        }
        if request.value.is_empty() {
            return Err(rpc_status(&StorageError::EmptyValue));
        }
        self.store
            .set(
                &request.key,
                &request.value,
                request.ttl_ms.map(Duration::from_millis),
            )
            .await
            .map_err(|err| rpc_status(&err))?;
        Ok(Bytes::new())
    }

    async fn get(&self, request: GetRequest) -> Result<Bytes, RpcStatus> {
        if request.key.is_empty() {
            return Err(rpc_status(&StorageError::EmptyKey));
        }
        let value = self
            .store
            .get(&request.key)
            .await
            .map_err(|err| rpc_status(&err))?;
        let payload = serde_json::to_vec(&GetResponse { value })
            .map_err(|err| RpcStatus::internal(err.to_string()))?;
        Ok(Bytes::from(payload))
    }
}

#[async_trait]
impl RpcTransport for StorageService {
    async fn call(
        &self,
        method: &str,
        metadata: MetadataMap,
        payload: Bytes,
    ) -> Result<Bytes, RpcStatus> {
        serve_rpc(
            &self.tracer,
            self.propagator.as_ref(),
            method,
            &metadata,
            |_cx| async move {
                match method {
                    SET_METHOD => {
                        let request: SetRequest = serde_json::from_slice(&payload)
                            .map_err(|err| RpcStatus::invalid_argument(err.to_string()))?;
                        self.set(request).await
                    }
                    GET_METHOD => {
                        let request: GetRequest = serde_json::from_slice(&payload)
                            .map_err(|err| RpcStatus::invalid_argument(err.to_string()))?;
                        self.get(request).await
                    }
                    other => Err(RpcStatus::unimplemented(format!(
                        "unknown method {other:?}"
                    ))),
                }
            },
        )
        .await
    }
}

/// Edge tier: HTTP in, RPC out.
///
/// Routes:
/// - `POST /kv/put` with a JSON [`SetRequest`] body
/// - `GET /kv/get?key={key}`
#[derive(Clone, Debug)]
pub struct EdgeService {
    mid: TracedRpcClient,
    tracer: Tracer,
    propagator: Arc<dyn TextMapPropagator>,
}

impl EdgeService {
    pub fn new(
        mid: Arc<dyn RpcTransport>,
        tracer: Tracer,
        propagator: Arc<dyn TextMapPropagator>,
    ) -> Self {
        EdgeService {
            mid: TracedRpcClient::new(mid, tracer.clone(), Arc::clone(&propagator)),
            tracer,
            propagator,
        }
    }

    /// Handle one inbound HTTP request end to end.
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let mid = self.mid.clone();
        serve_http(
            &self.tracer,
            self.propagator.as_ref(),
            request,
            |request, cx| async move { Self::route(&mid, request, cx).await },
        )
        .await
    }

    async fn route(
        mid: &TracedRpcClient,
        request: Request<Bytes>,
        cx: Context,
    ) -> Result<Response<Bytes>, HttpError> {
        match (request.method().as_str(), request.uri().path()) {
            ("POST", "/kv/put") => {
                let Ok(body) = serde_json::from_slice::<SetRequest>(request.body()) else {
                    return Ok(text_response(StatusCode::BAD_REQUEST, "malformed body"));
                };
                if body.key.is_empty() || body.value.is_empty() {
                    return Ok(text_response(
                        StatusCode::BAD_REQUEST,
                        "key and value must not be empty",
                    ));
                }
                let payload = Bytes::from(serde_json::to_vec(&body)?);
                match mid.call(&cx, SET_METHOD, payload).await {
                    Ok(_) => Ok(text_response(StatusCode::OK, "stored")),
                    Err(status) => Ok(rpc_error_response(status)?),
                }
            }
            ("GET", "/kv/get") => {
                let Some(key) = request
                    .uri()
                    .query()
                    .and_then(|q| q.split('&').find_map(|p| p.strip_prefix("key=")))
                    .filter(|key| !key.is_empty())
                else {
                    return Ok(text_response(StatusCode::BAD_REQUEST, "missing key"));
                };
                let payload = Bytes::from(serde_json::to_vec(&GetRequest {
                    key: key.to_owned(),
                })?);
                match mid.call(&cx, GET_METHOD, payload).await {
                    Ok(response) => {
                        let parsed: GetResponse = serde_json::from_slice(&response)?;
                        Ok(text_response(StatusCode::OK, &parsed.value))
                    }
                    Err(status) => Ok(rpc_error_response(status)?),
                }
            }
            _ => Ok(text_response(StatusCode::NOT_FOUND, "no such route")),
        }
    }
}

fn text_response(status: StatusCode, body: &str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(body.to_owned()));
    *response.status_mut() = status;
    response
}

/// Map an RPC failure onto the edge's HTTP surface. Client-caused failures
/// become 4xx responses; everything else propagates as a handler error so
/// the server span records it.
fn rpc_error_response(status: RpcStatus) -> Result<Response<Bytes>, HttpError> {
    match status.code() {
        tonic::Code::NotFound => Ok(text_response(StatusCode::NOT_FOUND, status.message())),
        tonic::Code::InvalidArgument => {
            Ok(text_response(StatusCode::BAD_REQUEST, status.message()))
        }
        _ => Err(status.message().to_owned().into()),
    }
}
