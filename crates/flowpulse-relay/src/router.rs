use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use flowpulse_common::{FunctionConfig, GlobalConfig};
use flowpulse_protocol::{ChatCompletionRequest, Message, RelayRequestBody};

use crate::error::RelayError;
use crate::headers::{
    Headers, header_set, is_event_stream, is_hop_by_hop_or_framing_header, is_json,
};
use crate::prompt::render_system_prompt;
use crate::upstream_client::{
    UpstreamBody, UpstreamChunk, UpstreamClient, UpstreamFailure, UpstreamRequest,
    UpstreamResponse,
};

pub const REQUEST_ID_HEADER: &str = "x-flowpulse-request-id";

const SSE_HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";
const MAX_LOGGED_ERROR_BODY_BYTES: usize = 2048;

#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<GlobalConfig>,
    pub upstream: Arc<dyn UpstreamClient>,
}

impl RelayState {
    pub fn new(config: GlobalConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            config: Arc::new(config),
            upstream,
        }
    }
}

#[derive(Clone)]
struct RequestTraceId(String);

pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/{function}", any(relay_function))
        .route("/functions/v1/{function}", any(relay_function))
        .fallback(unknown_route)
        .layer(middleware::from_fn(relay_edge))
        .with_state(state)
}

/// Assigns the trace id, answers preflight and stamps CORS headers on every response.
async fn relay_edge(mut req: Request<Body>, next: Next) -> Response {
    let trace_id = uuid::Uuid::new_v4().to_string();
    req.extensions_mut()
        .insert(RequestTraceId(trace_id.clone()));

    let mut resp = if req.method() == Method::OPTIONS {
        debug!(event = "preflight", trace_id = %trace_id, path = %req.uri().path());
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = resp.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization, x-client-info, apikey, content-type"),
    );
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    resp
}

async fn unknown_route() -> Response {
    RelayError::UnknownFunction("no function at this path".to_string()).into_response()
}

async fn relay_function(
    State(state): State<RelayState>,
    Extension(RequestTraceId(trace_id)): Extension<RequestTraceId>,
    Path(function): Path<String>,
    method: Method,
    body: Bytes,
) -> Response {
    let started_at = Instant::now();
    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        function = %function,
        method = %method,
        body_bytes = body.len()
    );

    let result = handle_relay(&state, &trace_id, &function, &method, body).await;
    match result {
        Ok(resp) => {
            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                function = %function,
                status = resp.status().as_u16(),
                elapsed_ms = started_at.elapsed().as_millis()
            );
            resp
        }
        Err(err) => {
            warn!(
                event = "downstream_responded",
                trace_id = %trace_id,
                function = %function,
                status = err.status().as_u16(),
                error = %err,
                elapsed_ms = started_at.elapsed().as_millis()
            );
            err.into_response()
        }
    }
}

async fn handle_relay(
    state: &RelayState,
    trace_id: &str,
    function: &str,
    method: &Method,
    body: Bytes,
) -> Result<Response, RelayError> {
    let Some(function_config) = state.config.function(function) else {
        return Err(RelayError::UnknownFunction(function.to_string()));
    };
    if method != Method::POST {
        return Err(RelayError::MethodNotAllowed);
    }
    let request = parse_relay_body(&body)?;

    let upstream_req = build_upstream_request(&state.config, function_config, request)?;
    let is_stream = upstream_req.is_stream;
    info!(
        event = "upstream_request",
        trace_id = %trace_id,
        function = %function,
        is_stream
    );

    let upstream_started = Instant::now();
    let upstream_resp = match state.upstream.send(upstream_req).await {
        Ok(resp) => resp,
        Err(failure) => {
            warn!(
                event = "upstream_transport_error",
                trace_id = %trace_id,
                kind = %failure.kind,
                error = %failure.message,
                elapsed_ms = upstream_started.elapsed().as_millis()
            );
            return Err(RelayError::Transport {
                kind: failure.kind,
                message: failure.message,
            });
        }
    };
    info!(
        event = "upstream_response",
        trace_id = %trace_id,
        function = %function,
        status = upstream_resp.status,
        elapsed_ms = upstream_started.elapsed().as_millis()
    );

    if !(200..300).contains(&upstream_resp.status) {
        let body = match upstream_resp.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(rx) => collect_stream(rx)
                .await
                .unwrap_or_else(|failure| Bytes::from(failure.message)),
        };
        let body = truncated_text(&body);
        warn!(
            event = "upstream_error",
            trace_id = %trace_id,
            status = upstream_resp.status,
            body = %body
        );
        return Err(RelayError::from_upstream_status(upstream_resp.status, body));
    }

    if is_stream && !is_json(&upstream_resp.headers) {
        return Ok(to_stream_response(upstream_resp, state.config.heartbeat()));
    }
    if is_stream {
        debug!(
            event = "upstream_answered_buffered",
            trace_id = %trace_id,
            function = %function
        );
    }
    to_json_response(upstream_resp).await
}

fn parse_relay_body(body: &Bytes) -> Result<RelayRequestBody, RelayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RelayError::MissingBody);
    }
    let request: RelayRequestBody =
        serde_json::from_slice(body).map_err(|err| RelayError::InvalidBody(err.to_string()))?;
    if request.messages.is_empty() {
        return Err(RelayError::EmptyMessages);
    }
    Ok(request)
}

fn build_upstream_request(
    config: &GlobalConfig,
    function: &FunctionConfig,
    request: RelayRequestBody,
) -> Result<UpstreamRequest, RelayError> {
    let is_stream = request.stream.unwrap_or(function.stream_by_default);
    let system = render_system_prompt(&function.system_prompt, &request);
    let temperature = request.fields.get("temperature").and_then(|v| v.as_f64());
    let max_tokens = request.fields.get("max_tokens").and_then(|v| v.as_i64());

    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(Message::system(system));
    messages.extend(request.messages);

    let payload = ChatCompletionRequest {
        model: function
            .model
            .clone()
            .unwrap_or_else(|| config.model.clone()),
        messages,
        stream: is_stream,
        temperature,
        max_tokens,
    };
    let body = serde_json::to_vec(&payload).map_err(|err| RelayError::Internal(err.to_string()))?;

    let mut headers: Headers = Vec::new();
    header_set(
        &mut headers,
        "authorization",
        format!("Bearer {}", config.upstream_api_key),
    );
    header_set(&mut headers, "content-type", "application/json");
    if is_stream {
        header_set(&mut headers, "accept", "text/event-stream");
    }

    Ok(UpstreamRequest {
        url: config.upstream_url.clone(),
        headers,
        body: Bytes::from(body),
        is_stream,
    })
}

async fn to_json_response(resp: UpstreamResponse) -> Result<Response, RelayError> {
    let body = match resp.body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(rx) => {
            collect_stream(rx)
                .await
                .map_err(|failure| RelayError::Transport {
                    kind: failure.kind,
                    message: failure.message,
                })?
        }
    };
    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| RelayError::MalformedUpstream)?;
    Ok((StatusCode::OK, axum::Json(value)).into_response())
}

fn to_stream_response(resp: UpstreamResponse, heartbeat: Duration) -> Response {
    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(h) = builder.headers_mut() {
        for (k, v) in &resp.headers {
            if is_hop_by_hop_or_framing_header(k) || k.eq_ignore_ascii_case("content-type") {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                h.append(name, value);
            }
        }
        let content_type = if is_event_stream(&resp.headers) {
            resp.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                .and_then(|(_, v)| HeaderValue::from_str(v).ok())
                .unwrap_or(HeaderValue::from_static("text/event-stream"))
        } else {
            HeaderValue::from_static("text/event-stream")
        };
        h.insert(header::CONTENT_TYPE, content_type);
        // Hint reverse proxies not to buffer the stream.
        h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        h.insert(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        );
    }

    let body = match resp.body {
        UpstreamBody::Bytes(bytes) => Body::from(bytes),
        UpstreamBody::Stream(rx) => {
            let rx = wrap_sse_stream_with_heartbeat(rx, heartbeat);
            Body::from_stream(ReceiverStream::new(rx))
        }
    };

    builder.body(body).unwrap_or_else(|err| {
        RelayError::Internal(format!("response build failed: {err}")).into_response()
    })
}

/// Forwards upstream chunks and emits a keep-alive comment after `interval` of silence.
///
/// A heartbeat is only written at a line boundary so it never lands inside a frame.
/// An upstream `Err` is passed on as the last item, which aborts the response body.
pub fn wrap_sse_stream_with_heartbeat(
    mut upstream_rx: mpsc::Receiver<UpstreamChunk>,
    interval: Duration,
) -> mpsc::Receiver<UpstreamChunk> {
    let (tx, rx) = mpsc::channel::<UpstreamChunk>(32);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        let mut at_line_boundary = true;

        loop {
            tokio::select! {
                maybe_chunk = upstream_rx.recv() => {
                    let Some(item) = maybe_chunk else {
                        break;
                    };
                    let chunk = match item {
                        Ok(chunk) => chunk,
                        Err(failure) => {
                            let _ = tx.send(Err(failure)).await;
                            break;
                        }
                    };
                    if let Some(last) = chunk.last() {
                        at_line_boundary = *last == b'\n';
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    if !at_line_boundary {
                        continue;
                    }
                    if tx.send(Ok(Bytes::from_static(SSE_HEARTBEAT_FRAME))).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

async fn collect_stream(
    mut rx: mpsc::Receiver<UpstreamChunk>,
) -> Result<Bytes, UpstreamFailure> {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(out))
}

fn truncated_text(body: &[u8]) -> String {
    let end = body.len().min(MAX_LOGGED_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&body[..end]).into_owned()
}
