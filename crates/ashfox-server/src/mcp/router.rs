// crates/ashfox-server/src/mcp/router.rs
// The HTTP face of the gateway: JSON-RPC over POST, SSE over GET, session
// close over DELETE, plus /health and /metrics.

use super::Gateway;
use super::jsonrpc::{
    self, GATEWAY_UNREACHABLE, INVALID_PARAMS, INVALID_REQUEST, JsonRpcRequest, METHOD_NOT_FOUND,
    PARSE_ERROR, SESSION_ERROR,
};
use super::sessions::AttachError;
use super::sse::{KEEP_ALIVE, STREAM_OPEN};
use crate::adapter::{ToolCallOutcome, ToolDescriptor};
use crate::config::{MAX_BODY_BYTES, MAX_HEADER_BYTES, SSE_KEEPALIVE_SECS, SUPPORTED_PROTOCOL_VERSIONS};
use crate::error::envelope;
use crate::proxy::ProxyRouter;
use crate::tools::ToolName;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Methods that may run without a prior `initialize` handshake; the first
/// POST creates an ephemeral, already-initialized session.
const IMPLICIT_SESSION_METHODS: &[&str] = &["tools/list", "tools/call", "ping"];

pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("last-event-id"),
            header::AUTHORIZATION,
            header::HeaderName::from_static("mcp-protocol-version"),
            header::HeaderName::from_static("mcp-session-id"),
        ])
        .max_age(Duration::from_secs(86400));

    let mcp_path = gateway.config.mcp_path.clone();
    Router::new()
        .route(
            &mcp_path,
            axum::routing::post(handle_post)
                .get(handle_get)
                .delete(handle_delete),
        )
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_block_size(headers: &HeaderMap) -> usize {
    headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum()
}

fn http_error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({ "error": { "code": code, "message": message } });
    (status, axum::Json(body)).into_response()
}

fn default_protocol() -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS[0]
}

// ---------------------------------------------------------------
// POST: JSON-RPC
// ---------------------------------------------------------------

enum PostOutcome {
    /// JSON-RPC response body, plus the session id to expose in the
    /// `Mcp-Session-Id` header when one was allocated by this request.
    Json {
        body: Value,
        session_id: Option<String>,
    },
    /// Notification accepted; no body.
    Accepted,
}

fn rpc(body: Value) -> PostOutcome {
    PostOutcome::Json {
        body,
        session_id: None,
    }
}

async fn handle_post(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if header_block_size(&headers) > MAX_HEADER_BYTES {
        return http_error(
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            "payload_too_large",
            "request header block exceeds 16 KiB",
        );
    }
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return http_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "request body exceeds 5000000 bytes",
            );
        }
    };

    let parsed: Result<Value, _> = serde_json::from_slice(&bytes);
    let raw = match parsed {
        Ok(raw) => raw,
        Err(_) => {
            return json_response(
                jsonrpc::response_error(None, PARSE_ERROR, "malformed JSON", Some("parse_error")),
                None,
            );
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(_) => {
            return json_response(
                jsonrpc::response_error(
                    None,
                    INVALID_REQUEST,
                    "not a JSON-RPC request",
                    Some("invalid_request"),
                ),
                None,
            );
        }
    };

    match dispatch(&gateway, &headers, request).await {
        PostOutcome::Json { body, session_id } => json_response(body, session_id),
        PostOutcome::Accepted => StatusCode::ACCEPTED.into_response(),
    }
}

fn json_response(body: Value, session_id: Option<String>) -> Response {
    let mut response = axum::Json(body).into_response();
    if let Some(session_id) = session_id {
        if let Ok(value) = header::HeaderValue::from_str(&session_id) {
            response.headers_mut().insert("mcp-session-id", value);
        }
    }
    response
}

async fn dispatch(gateway: &Gateway, headers: &HeaderMap, request: JsonRpcRequest) -> PostOutcome {
    if request.method == "initialize" {
        return handle_initialize(gateway, request);
    }

    // Session resolution.
    let header_session = header_str(headers, "mcp-session-id");
    let (session_id, allocated) = match header_session {
        Some(sid) => {
            if !gateway.sessions.exists(sid) {
                return rpc(jsonrpc::response_error(
                    request.id.as_ref(),
                    SESSION_ERROR,
                    "unknown or expired session",
                    Some("session_unavailable"),
                ));
            }
            (sid.to_string(), None)
        }
        None if IMPLICIT_SESSION_METHODS.contains(&request.method.as_str()) => {
            let sid = gateway.sessions.create(default_protocol(), true);
            (sid.clone(), Some(sid))
        }
        None => {
            return rpc(jsonrpc::response_error(
                request.id.as_ref(),
                SESSION_ERROR,
                "Mcp-Session-Id header is required",
                Some("session_id_required"),
            ));
        }
    };

    // After initialize, the negotiated version binds the session.
    if let Some(header_protocol) = header_str(headers, "mcp-protocol-version") {
        let negotiated = gateway.sessions.protocol_version(&session_id);
        if negotiated.as_deref() != Some(header_protocol) {
            return rpc(jsonrpc::response_error(
                request.id.as_ref(),
                INVALID_REQUEST,
                "protocol version does not match the session",
                Some("protocol_version_mismatch"),
            ));
        }
    }
    gateway.sessions.touch(&session_id);

    if request.method == "notifications/initialized" {
        gateway.sessions.mark_initialized(&session_id);
        return PostOutcome::Accepted;
    }
    if gateway.sessions.is_initialized(&session_id) != Some(true) {
        return rpc(jsonrpc::response_error(
            request.id.as_ref(),
            SESSION_ERROR,
            "send notifications/initialized before other methods",
            Some("server_not_initialized"),
        ));
    }

    let outcome = match request.method.as_str() {
        "ping" => respond(&request, json!({})),
        "tools/list" => handle_tools_list(gateway, &request).await,
        "tools/call" => handle_tools_call(gateway, &request).await,
        "resources/list" => respond(&request, json!({ "resources": [] })),
        "resources/templates/list" => respond(&request, json!({ "resourceTemplates": [] })),
        "resources/read" => rpc(jsonrpc::response_error(
            request.id.as_ref(),
            INVALID_PARAMS,
            "no such resource",
            Some("unknown_resource"),
        )),
        _ if request.is_notification() => PostOutcome::Accepted,
        other => rpc(jsonrpc::response_error(
            request.id.as_ref(),
            METHOD_NOT_FOUND,
            &format!("method '{other}' is not supported"),
            Some("method_not_found"),
        )),
    };

    // Surface the id of a session this request implicitly allocated.
    match (outcome, allocated) {
        (PostOutcome::Json { body, session_id: None }, Some(sid)) => PostOutcome::Json {
            body,
            session_id: Some(sid),
        },
        (outcome, _) => outcome,
    }
}

fn respond(request: &JsonRpcRequest, result: Value) -> PostOutcome {
    match &request.id {
        Some(id) => rpc(jsonrpc::response_ok(id, result)),
        None => PostOutcome::Accepted,
    }
}

fn handle_initialize(gateway: &Gateway, request: JsonRpcRequest) -> PostOutcome {
    let Some(id) = request.id.clone() else {
        return rpc(jsonrpc::response_error(
            None,
            INVALID_REQUEST,
            "initialize requires an id",
            Some("initialize_requires_id"),
        ));
    };
    let requested = request.param_str("protocolVersion");
    let negotiated = requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().copied().find(|s| *s == v))
        .unwrap_or_else(default_protocol);
    let session_id = gateway.sessions.create(negotiated, false);
    tracing::info!(session_id = %session_id, protocol = %negotiated, "session created");
    let result = json!({
        "protocolVersion": negotiated,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": "ashfox",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "sessionId": session_id,
    });
    PostOutcome::Json {
        body: jsonrpc::response_ok(&id, result),
        session_id: Some(session_id),
    }
}

fn descriptor_json(descriptor: &ToolDescriptor) -> Value {
    json!({
        "name": descriptor.name,
        "title": descriptor.title,
        "description": descriptor.description,
        "inputSchema": descriptor.input_schema,
    })
}

async fn handle_tools_list(gateway: &Gateway, request: &JsonRpcRequest) -> PostOutcome {
    let mut tools = match gateway.backend.list_tools().await {
        Ok(tools) => tools,
        Err(message) => {
            return rpc(jsonrpc::response_error(
                request.id.as_ref(),
                GATEWAY_UNREACHABLE,
                &message,
                Some("gateway_unreachable"),
            ));
        }
    };
    if gateway.proxy.is_some() {
        tools.extend(ProxyRouter::descriptors());
    }
    let tools: Vec<Value> = tools.iter().map(descriptor_json).collect();
    respond(request, json!({ "tools": tools }))
}

async fn handle_tools_call(gateway: &Gateway, request: &JsonRpcRequest) -> PostOutcome {
    let Some(name) = request.param_str("name").map(str::to_string) else {
        return rpc(jsonrpc::response_error(
            request.id.as_ref(),
            INVALID_PARAMS,
            "tools/call requires params.name",
            Some("missing_tool_name"),
        ));
    };
    let arguments = request
        .param("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let start = Instant::now();
    let result_envelope: Value = if let (Some(proxy), Some(tool)) =
        (&gateway.proxy, ProxyRouter::parse(&name))
    {
        proxy.call(tool, arguments).await
    } else if let Some(service) = &gateway.service {
        // Local dispatch validates here so violations map to −32602.
        let Some(spec) = service.registry().get(&name) else {
            return rpc(jsonrpc::response_error(
                request.id.as_ref(),
                INVALID_PARAMS,
                &format!("unknown tool '{name}'"),
                Some("unknown_tool"),
            ));
        };
        match spec.schema.validate(arguments) {
            Err(violation) => {
                return rpc(jsonrpc::response_error(
                    request.id.as_ref(),
                    INVALID_PARAMS,
                    &violation.message,
                    Some("schema_violation"),
                ));
            }
            Ok(validated) => {
                let tool = ToolName::from_str(&name)
                    .unwrap_or_else(|_| unreachable!("registry names parse as ToolName"));
                envelope(&service.call_validated(tool, validated).await)
            }
        }
    } else {
        match gateway.backend.call_tool(&name, arguments).await {
            ToolCallOutcome::Completed(envelope) => envelope,
            ToolCallOutcome::UnknownTool => {
                return rpc(jsonrpc::response_error(
                    request.id.as_ref(),
                    INVALID_PARAMS,
                    &format!("unknown tool '{name}'"),
                    Some("unknown_tool"),
                ));
            }
            ToolCallOutcome::Unreachable(message) => {
                return rpc(jsonrpc::response_error(
                    request.id.as_ref(),
                    GATEWAY_UNREACHABLE,
                    &message,
                    Some("gateway_unreachable"),
                ));
            }
        }
    };

    let ok = result_envelope
        .get("ok")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let duration = start.elapsed().as_secs_f64();
    let error_code = result_envelope
        .pointer("/error/code")
        .and_then(Value::as_str);
    let error_reason = result_envelope
        .pointer("/error/details/reason")
        .and_then(Value::as_str);
    tracing::info!(
        tool = %name,
        ok,
        duration_ms = (duration * 1000.0) as u64,
        error_code,
        error_reason,
        "tool call",
    );
    gateway.metrics.inc_counter(
        "tool_calls_total",
        &[
            ("tool", name.as_str()),
            ("ok", if ok { "true" } else { "false" }),
        ],
    );
    gateway.metrics.observe_duration(
        "tool_call_duration_seconds",
        &[("tool", name.as_str())],
        duration,
    );

    respond(request, jsonrpc::tool_call_result(result_envelope))
}

// ---------------------------------------------------------------
// GET: SSE
// ---------------------------------------------------------------

/// Detaches the connection when the response body is dropped. Detach is
/// idempotent, so racing the send-failure cleanup is fine.
struct DetachOnDrop {
    sessions: Arc<super::sessions::SessionStore>,
    session_id: String,
    connection_id: u64,
}

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        self.sessions.detach_sse(&self.session_id, self.connection_id);
    }
}

async fn handle_get(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let accepts_sse = header_str(&headers, "accept")
        .map(|accept| accept.contains("text/event-stream") || accept.contains("*/*"))
        .unwrap_or(false);
    if !accepts_sse {
        return http_error(
            StatusCode::NOT_ACCEPTABLE,
            "invalid_request",
            "SSE requires Accept: text/event-stream",
        );
    }
    let Some(session_id) = header_str(&headers, "mcp-session-id").map(str::to_string) else {
        return http_error(
            StatusCode::BAD_REQUEST,
            "session_id_required",
            "Mcp-Session-Id header is required",
        );
    };
    if !gateway.sessions.exists(&session_id) {
        return http_error(
            StatusCode::NOT_FOUND,
            "session_unavailable",
            "unknown or expired session",
        );
    }

    let project_id = query.get("projectId").cloned();
    let last_event_id = header_str(&headers, "last-event-id")
        .map(str::to_string)
        .or_else(|| query.get("lastEventId").cloned())
        .and_then(|raw| raw.parse::<u64>().ok());

    let (connection_id, mut rx) = match gateway
        .sessions
        .attach_sse(&session_id, project_id.clone())
    {
        Ok(attached) => attached,
        Err(AttachError::TooManyConnections) => {
            return http_error(
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                "a session may hold at most 3 SSE connections",
            );
        }
        Err(AttachError::SessionNotFound) => {
            return http_error(
                StatusCode::NOT_FOUND,
                "session_unavailable",
                "unknown or expired session",
            );
        }
    };

    // Best-effort replay from the retained event window.
    let mut replay = Vec::new();
    if let (Some(project_id), Some(last)) = (&project_id, last_event_id) {
        match gateway.store.get_project_events_since(project_id, last).await {
            Ok(events) => {
                replay = events
                    .iter()
                    .map(super::sessions::project_event_frame)
                    .map(|e| e.encode())
                    .collect();
            }
            Err(e) => tracing::debug!("event replay unavailable: {e}"),
        }
    }

    let guard = DetachOnDrop {
        sessions: gateway.sessions.clone(),
        session_id,
        connection_id,
    };
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<Bytes, Infallible>(Bytes::from(STREAM_OPEN));
        for frame in replay {
            yield Ok(Bytes::from(frame));
        }
        let mut keepalive = tokio::time::interval(Duration::from_secs(SSE_KEEPALIVE_SECS));
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        keepalive.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(frame) => yield Ok(Bytes::from(frame)),
                    None => break,
                },
                _ = keepalive.tick() => yield Ok(Bytes::from(KEEP_ALIVE)),
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ---------------------------------------------------------------
// DELETE, /health, /metrics
// ---------------------------------------------------------------

async fn handle_delete(State(gateway): State<Arc<Gateway>>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_str(&headers, "mcp-session-id") else {
        return http_error(
            StatusCode::BAD_REQUEST,
            "session_id_required",
            "Mcp-Session-Id header is required",
        );
    };
    if gateway.sessions.close(session_id) {
        tracing::info!(session_id, "session closed");
        (StatusCode::OK, axum::Json(json!({ "closed": true }))).into_response()
    } else {
        http_error(
            StatusCode::NOT_FOUND,
            "session_unavailable",
            "unknown or expired session",
        )
    }
}

async fn handle_health() -> Response {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn handle_metrics(State(gateway): State<Arc<Gateway>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gateway.metrics.render(),
    )
        .into_response()
}
