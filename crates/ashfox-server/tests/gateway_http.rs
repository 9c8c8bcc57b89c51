// crates/ashfox-server/tests/gateway_http.rs
// End-to-end JSON-RPC and SSE tests driven straight through the axum
// router, no sockets involved.

use ashfox::adapter::NullEditorAdapter;
use ashfox::config::{GatewayConfig, MAX_BODY_BYTES};
use ashfox::mcp::Gateway;
use ashfox::mcp::router::build_router;
use ashfox_types::JobKind;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt;

async fn gateway() -> (Arc<Gateway>, Router) {
    let config = GatewayConfig::default();
    let gateway = Arc::new(
        Gateway::assemble(config, Arc::new(NullEditorAdapter))
            .await
            .expect("gateway assembles"),
    );
    let router = build_router(gateway.clone());
    (gateway, router)
}

fn post(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn post_with_session(body: Value, session_id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", session_id)
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

async fn call_tool(router: &Router, session_id: &str, name: &str, arguments: Value) -> Value {
    let request = post_with_session(
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        }),
        session_id,
    );
    let response = router.clone().oneshot(request).await.expect("router serves");
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

/// Open an implicit initialized session and return its id.
async fn implicit_session(router: &Router) -> String {
    let response = router
        .clone()
        .oneshot(post(json!({
            "jsonrpc": "2.0", "id": 1, "method": "ping"
        })))
        .await
        .expect("router serves");
    response
        .headers()
        .get("mcp-session-id")
        .expect("implicit session header")
        .to_str()
        .expect("header is ascii")
        .to_string()
}

#[tokio::test]
async fn happy_init_handshake() {
    let (gateway, router) = gateway().await;

    let response = router
        .clone()
        .oneshot(post(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2025-06-18" },
        })))
        .await
        .expect("router serves");
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .expect("session header")
        .to_str()
        .expect("ascii")
        .to_string();
    let body = json_body(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(gateway.sessions.is_initialized(&session_id), Some(false));

    // Calling before notifications/initialized is refused.
    let early = router
        .clone()
        .oneshot(post_with_session(
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            &session_id,
        ))
        .await
        .expect("router serves");
    let early = json_body(early).await;
    assert_eq!(early["error"]["code"], -32000);
    assert_eq!(early["error"]["data"]["reason"], "server_not_initialized");

    // The initialized notification has no response body.
    let notified = router
        .clone()
        .oneshot(post_with_session(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            &session_id,
        ))
        .await
        .expect("router serves");
    assert_eq!(notified.status(), StatusCode::ACCEPTED);
    assert_eq!(gateway.sessions.is_initialized(&session_id), Some(true));

    // Now normal operation proceeds.
    let listed = router
        .clone()
        .oneshot(post_with_session(
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}),
            &session_id,
        ))
        .await
        .expect("router serves");
    let listed = json_body(listed).await;
    let tools = listed["result"]["tools"].as_array().expect("tools array");
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"add_bone"));
    assert!(names.contains(&"apply_texture_spec"));
}

#[tokio::test]
async fn unsupported_protocol_falls_back_to_default() {
    let (_, router) = gateway().await;
    let response = router
        .oneshot(post(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "1999-01-01" },
        })))
        .await
        .expect("router serves");
    let body = json_body(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
}

#[tokio::test]
async fn initialize_without_id_is_invalid() {
    let (_, router) = gateway().await;
    let response = router
        .oneshot(post(json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": { "protocolVersion": "2025-06-18" },
        })))
        .await
        .expect("router serves");
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["error"]["data"]["reason"], "initialize_requires_id");
}

#[tokio::test]
async fn session_required_for_non_implicit_methods() {
    let (_, router) = gateway().await;
    let response = router
        .oneshot(post(json!({
            "jsonrpc": "2.0", "id": 1, "method": "resources/list"
        })))
        .await
        .expect("router serves");
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["data"]["reason"], "session_id_required");
}

#[tokio::test]
async fn protocol_header_mismatch_is_rejected() {
    let (_, router) = gateway().await;
    let session_id = implicit_session(&router).await;
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("mcp-session-id", &session_id)
        .header("mcp-protocol-version", "2024-01-01")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string(),
        ))
        .expect("request builds");
    let response = router.oneshot(request).await.expect("router serves");
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["error"]["data"]["reason"], "protocol_version_mismatch");
}

#[tokio::test]
async fn malformed_json_is_parse_error() {
    let (_, router) = gateway().await;
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request builds");
    let body = json_body(router.oneshot(request).await.expect("router serves")).await;
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn unknown_tool_is_invalid_params() {
    let (_, router) = gateway().await;
    let session_id = implicit_session(&router).await;
    let request = post_with_session(
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": "definitely_not_a_tool", "arguments": {} },
        }),
        &session_id,
    );
    let body = json_body(router.oneshot(request).await.expect("router serves")).await;
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(body["error"]["data"]["reason"], "unknown_tool");
}

#[tokio::test]
async fn schema_violation_is_invalid_params() {
    let (_, router) = gateway().await;
    let session_id = implicit_session(&router).await;
    let request = post_with_session(
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": "create_project", "arguments": { "name": 42 } },
        }),
        &session_id,
    );
    let body = json_body(router.oneshot(request).await.expect("router serves")).await;
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(body["error"]["data"]["reason"], "schema_violation");
}

#[tokio::test]
async fn body_size_boundary() {
    let (_, router) = gateway().await;
    // Build a ping whose body is exactly the cap.
    let skeleton = json!({
        "jsonrpc": "2.0", "id": 1, "method": "ping",
        "params": { "pad": "" },
    })
    .to_string();
    let padding = MAX_BODY_BYTES - skeleton.len();
    let body = skeleton.replace(
        "\"pad\":\"\"",
        &format!("\"pad\":\"{}\"", "x".repeat(padding)),
    );
    assert_eq!(body.len(), MAX_BODY_BYTES);

    let at_limit = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(body.clone()))
        .expect("request builds");
    let response = router.clone().oneshot(at_limit).await.expect("router serves");
    assert_eq!(response.status(), StatusCode::OK);

    let over = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(format!("{body} ")))
        .expect("request builds");
    let response = router.oneshot(over).await.expect("router serves");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn revision_guard_over_http() {
    let (_, router) = gateway().await;
    let session_id = implicit_session(&router).await;

    let created = call_tool(&router, &session_id, "create_project", json!({"name": "fox"})).await;
    assert!(created["result"].get("isError").is_none());

    let state = call_tool(&router, &session_id, "get_project_state", json!({})).await;
    let revision = state["result"]["structuredContent"]["revision"]
        .as_str()
        .expect("revision")
        .to_string();

    let added = call_tool(
        &router,
        &session_id,
        "add_bone",
        json!({"name": "root", "ifRevision": revision}),
    )
    .await;
    let content = &added["result"]["structuredContent"];
    assert_eq!(content["ok"], true);
    let next = content["revision"].as_str().expect("new revision");
    assert_ne!(next, revision);

    // Stale guard: business error inside the result, not a JSON-RPC error.
    let stale = call_tool(
        &router,
        &session_id,
        "add_bone",
        json!({"name": "arm", "ifRevision": revision}),
    )
    .await;
    assert_eq!(stale["result"]["isError"], true);
    let error = &stale["result"]["structuredContent"]["error"];
    assert_eq!(error["details"]["reason"], "revision_mismatch");
    assert_eq!(error["details"]["expected"], revision);
    assert_eq!(error["details"]["actual"], next);
}

#[tokio::test]
async fn uv_usage_recovery_over_http() {
    let (_, router) = gateway().await;
    let session_id = implicit_session(&router).await;
    call_tool(&router, &session_id, "create_project", json!({"name": "fox"})).await;
    call_tool(
        &router,
        &session_id,
        "import_texture",
        json!({"name": "skin", "width": 64, "height": 64}),
    )
    .await;
    call_tool(&router, &session_id, "add_bone", json!({"name": "root"})).await;
    call_tool(
        &router,
        &session_id,
        "add_cube",
        json!({"name": "body", "bone": "root", "from": [0,0,0], "to": [4,4,4]}),
    )
    .await;

    let preflight = call_tool(&router, &session_id, "preflight_texture", json!({})).await;
    let token = preflight["result"]["structuredContent"]["data"]["uvUsageId"]
        .as_str()
        .expect("token")
        .to_string();

    // Move a face so the token goes stale.
    call_tool(
        &router,
        &session_id,
        "set_face_uv",
        json!({"cube": "body", "face": "north", "uv": [0, 0, 8, 8], "texture": "skin"}),
    )
    .await;

    let stale = call_tool(
        &router,
        &session_id,
        "paint_faces",
        json!({"uvUsageId": token, "ops": [{"texture": "skin", "color": "#ff8800"}]}),
    )
    .await;
    assert_eq!(
        stale["result"]["structuredContent"]["error"]["details"]["reason"],
        "uv_usage_changed"
    );

    // The compound tool recovers when asked to.
    let recovered = call_tool(
        &router,
        &session_id,
        "apply_texture_spec",
        json!({
            "uvUsageId": token,
            "autoRecover": true,
            "ops": [{"texture": "skin", "color": "#ff8800"}],
        }),
    )
    .await;
    let content = &recovered["result"]["structuredContent"];
    assert_eq!(content["ok"], true, "unexpected: {content}");
    assert_eq!(content["data"]["recovery"]["reason"], "uv_usage_changed");
}

#[tokio::test]
async fn sse_requires_accept_and_session() {
    let (_, router) = gateway().await;

    let no_accept = Request::builder()
        .method("GET")
        .uri("/mcp")
        .body(Body::empty())
        .expect("request builds");
    let response = router.clone().oneshot(no_accept).await.expect("router serves");
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

    let no_session = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header("accept", "text/event-stream")
        .body(Body::empty())
        .expect("request builds");
    let response = router.oneshot(no_session).await.expect("router serves");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "session_id_required");
}

fn sse_get(session_id: &str, query: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!("/mcp{query}"))
        .header("accept", "text/event-stream")
        .header("mcp-session-id", session_id)
        .body(Body::empty())
        .expect("request builds")
}

#[tokio::test]
async fn sse_connection_limit_is_three() {
    let (_, router) = gateway().await;
    let session_id = implicit_session(&router).await;

    let mut held = Vec::new();
    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(sse_get(&session_id, ""))
            .await
            .expect("router serves");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").map(|v| v.as_bytes()),
            Some(&b"text/event-stream"[..])
        );
        held.push(response);
    }
    let fourth = router
        .oneshot(sse_get(&session_id, ""))
        .await
        .expect("router serves");
    assert_eq!(fourth.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(fourth).await;
    assert_eq!(body["error"]["code"], "too_many_requests");
}

#[tokio::test]
async fn sse_fan_out_of_project_events() {
    let (gateway, router) = gateway().await;
    let session_id = implicit_session(&router).await;

    let workspace = gateway.store.create_workspace("studio").await.expect("workspace");
    let project = gateway
        .store
        .create_project(&workspace.id, "fox", None)
        .await
        .expect("project");

    let response = router
        .clone()
        .oneshot(sse_get(&session_id, &format!("?projectId={}", project.project_id)))
        .await
        .expect("router serves");
    assert_eq!(response.status(), StatusCode::OK);
    let mut stream = response.into_body().into_data_stream();

    // First bytes announce the stream.
    let first = stream.next().await.expect("first chunk").expect("chunk ok");
    assert_eq!(&first[..], b": stream open\n\n");

    // A job finishing on the project pushes framed events.
    let job = gateway
        .store
        .submit_job(&project.project_id, JobKind::TexturePreflight, json!({}))
        .await
        .expect("submit");
    let frame = stream.next().await.expect("event chunk").expect("chunk ok");
    let text = String::from_utf8(frame.to_vec()).expect("utf8");
    assert!(text.contains("event: job.status"), "got: {text}");
    assert!(text.contains(&job.id));

    gateway
        .store
        .claim_next_job("w1", None)
        .await
        .expect("claim");
    gateway
        .store
        .complete_job(&job.id, json!({"status": "ok"}))
        .await
        .expect("complete");

    // running, completed, then the project snapshot — in seq order.
    let mut seen = String::new();
    for _ in 0..3 {
        let frame = stream.next().await.expect("event chunk").expect("chunk ok");
        seen.push_str(&String::from_utf8(frame.to_vec()).expect("utf8"));
    }
    assert!(seen.contains("event: project.snapshot"), "got: {seen}");
    let ids: Vec<&str> = seen
        .lines()
        .filter_map(|l| l.strip_prefix("id: "))
        .collect();
    assert_eq!(ids, vec!["3", "4", "5"]);
}

#[tokio::test]
async fn sse_replays_from_last_event_id() {
    let (gateway, router) = gateway().await;
    let session_id = implicit_session(&router).await;

    let workspace = gateway.store.create_workspace("studio").await.expect("workspace");
    let project = gateway
        .store
        .create_project(&workspace.id, "fox", None)
        .await
        .expect("project");
    let job = gateway
        .store
        .submit_job(&project.project_id, JobKind::GltfConvert, json!({}))
        .await
        .expect("submit");
    gateway.store.claim_next_job("w1", None).await.expect("claim");
    gateway
        .store
        .fail_job(&job.id, "exporter crashed")
        .await
        .expect("fail");

    // Resume after seq 2: events 3.. replay before the stream goes live.
    let request = Request::builder()
        .method("GET")
        .uri(format!("/mcp?projectId={}", project.project_id))
        .header("accept", "text/event-stream")
        .header("mcp-session-id", &session_id)
        .header("last-event-id", "2")
        .body(Body::empty())
        .expect("request builds");
    let response = router.oneshot(request).await.expect("router serves");
    let mut stream = response.into_body().into_data_stream();

    let first = stream.next().await.expect("open frame").expect("chunk ok");
    assert_eq!(&first[..], b": stream open\n\n");
    let mut replayed = String::new();
    for _ in 0..3 {
        let frame = stream.next().await.expect("replay chunk").expect("chunk ok");
        replayed.push_str(&String::from_utf8(frame.to_vec()).expect("utf8"));
    }
    let ids: Vec<&str> = replayed
        .lines()
        .filter_map(|l| l.strip_prefix("id: "))
        .collect();
    assert_eq!(ids, vec!["3", "4", "5"]);
    assert!(replayed.contains("exporter crashed"));
}

#[tokio::test]
async fn delete_closes_the_session() {
    let (_, router) = gateway().await;
    let session_id = implicit_session(&router).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header("mcp-session-id", &session_id)
        .body(Body::empty())
        .expect("request builds");
    let response = router.clone().oneshot(request).await.expect("router serves");
    assert_eq!(response.status(), StatusCode::OK);

    // The session is gone now.
    let response = router
        .oneshot(post_with_session(
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
            &session_id,
        ))
        .await
        .expect("router serves");
    let body = json_body(response).await;
    assert_eq!(body["error"]["data"]["reason"], "session_unavailable");
}

#[tokio::test]
async fn health_and_metrics_endpoints() {
    let (_, router) = gateway().await;
    let session_id = implicit_session(&router).await;
    call_tool(&router, &session_id, "create_project", json!({"name": "fox"})).await;

    let health = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router serves");
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(json_body(health).await["status"], "ok");

    let metrics = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router serves");
    assert_eq!(metrics.status(), StatusCode::OK);
    let text = String::from_utf8(
        metrics
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes()
            .to_vec(),
    )
    .expect("utf8");
    assert!(text.contains("tool_calls_total{ok=\"true\",tool=\"create_project\"} 1"));
    assert!(text.contains("# TYPE tool_call_duration_seconds histogram"));
}

#[tokio::test]
async fn cors_preflight_carries_fixed_headers() {
    let (_, router) = gateway().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/mcp")
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .expect("request builds");
    let response = router.oneshot(request).await.expect("router serves");
    let headers = response.headers();
    assert_eq!(
        headers.get("access-control-allow-origin").map(|v| v.as_bytes()),
        Some(&b"*"[..])
    );
    let allowed = headers
        .get("access-control-allow-headers")
        .expect("allow headers")
        .to_str()
        .expect("ascii")
        .to_ascii_lowercase();
    for required in [
        "content-type",
        "last-event-id",
        "authorization",
        "mcp-protocol-version",
        "mcp-session-id",
    ] {
        assert!(allowed.contains(required), "missing {required} in {allowed}");
    }
    assert_eq!(
        headers.get("access-control-max-age").map(|v| v.as_bytes()),
        Some(&b"86400"[..])
    );
}
