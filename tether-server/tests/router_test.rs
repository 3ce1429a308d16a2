use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tether_config::TetherConfig;
use tether_runtime::Engine;
use tether_server::{build_engine, router, AppState, REQUEST_ID_HEADER};
use tower::ServiceExt;

struct TestServer {
    app: Router,
    _dir: tempfile::TempDir,
}

async fn server() -> TestServer {
    server_with(|_| {}).await
}

async fn server_with(configure: impl FnOnce(&mut TetherConfig)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = TetherConfig::default();
    config.database.url = format!("sqlite://{}", dir.path().join("tether.db").display());
    configure(&mut config);

    let engine: Engine = build_engine(&config).await.expect("engine should start");
    let state = AppState::new(Arc::new(engine), config.server.max_body_bytes);
    TestServer {
        app: router(state),
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, JsonValue) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(JsonValue::Null))
}

fn execute_request(body: JsonValue) -> Request<Body> {
    Request::post("/api/execute")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_then_dispatch() {
    let server = server().await;

    let (status, body) = send_json(
        &server.app,
        execute_request(json!({
            "code": "app.get('/hello', (req, res) => res.json({ msg: 'hi' })); 'ok'"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], json!("ok"));

    let (status, headers, body) = send(&server.app, get("/hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(serde_json::from_slice::<JsonValue>(&body).unwrap(), json!({ "msg": "hi" }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_reports_script_errors() {
    let server = server().await;
    let (status, body) = send_json(
        &server.app,
        execute_request(json!({ "code": "throw new Error('bad')", "sessionId": "s1" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], json!("Error: bad"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_rejects_empty_code() {
    let server = server().await;
    let (status, body) = send_json(&server.app, execute_request(json!({ "code": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("code"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_route_is_json_404() {
    let server = server().await;
    let (status, body) = send_json(&server.app, get("/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("/missing"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_executions_are_persisted_per_session() {
    let server = server().await;
    for code in ["1", "2", "3"] {
        send_json(
            &server.app,
            execute_request(json!({ "code": code, "sessionId": "abc" })),
        )
        .await;
    }
    send_json(&server.app, execute_request(json!({ "code": "4" }))).await;

    let (status, records) = send_json(&server.app, get("/api/executions?sessionId=abc")).await;
    assert_eq!(status, StatusCode::OK);

    let codes: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes.len(), 3);
    assert!(codes.iter().all(|code| ["1", "2", "3"].contains(code)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_log_endpoints() {
    let server = server().await;
    send_json(
        &server.app,
        execute_request(json!({
            "code": "app.post('/echo', (req, res) => { console.log('echo'); res.status(201).json(req.body); })"
        })),
    )
    .await;

    let request = Request::post("/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"a":1}"#))
        .unwrap();
    let (status, body) = send_json(&server.app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({ "a": 1 }));

    // Jobs run one at a time, so this returns only after the handler job
    // has finished its log entry
    send_json(&server.app, execute_request(json!({ "code": "0" }))).await;

    let (_, list) = send_json(&server.app, get("/api/requests?method=POST")).await;
    let entries = list.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry["request"]["path"], json!("/echo"));
    assert_eq!(entry["status"], json!(201));
    assert_eq!(entry["logs"][0]["message"], json!("echo"));

    let id = entry["id"].as_str().unwrap();
    let (status, one) = send_json(&server.app, get(&format!("/api/requests/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["id"], json!(id));

    let (status, _) = send_json(&server.app, get("/api/requests/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, stats) = send_json(&server.app, get("/api/requests/stats")).await;
    assert!(stats["total"].as_u64().unwrap() >= 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_routes_listing() {
    let server = server().await;
    send_json(
        &server.app,
        execute_request(json!({
            "code": "app.get('/a/:id', () => {}); app.file('/robots.txt', () => {});"
        })),
    )
    .await;

    let (_, body) = send_json(&server.app, get("/api/routes")).await;
    assert_eq!(body["routes"][0]["pattern"], json!("/a/:id"));
    assert_eq!(body["files"][0]["pattern"], json!("/robots.txt"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_id_is_echoed_or_generated() {
    let server = server().await;

    let request = Request::get("/health")
        .header(REQUEST_ID_HEADER, "req-123")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&server.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[REQUEST_ID_HEADER], "req-123");

    let (_, headers, _) = send(&server.app, get("/health")).await;
    assert!(!headers[REQUEST_ID_HEADER].is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_log_is_found_by_request_id_header() {
    let server = server().await;
    send_json(
        &server.app,
        execute_request(json!({ "code": "app.get('/traced', (req, res) => res.send('ok'))" })),
    )
    .await;

    let request = Request::get("/traced")
        .header(REQUEST_ID_HEADER, "trace-42")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&server.app, request).await;
    assert_eq!(status, StatusCode::OK);

    // Minted ids are recorded as well
    let (_, headers, _) = send(&server.app, get("/traced")).await;
    let minted = headers[REQUEST_ID_HEADER].to_str().unwrap().to_string();

    send_json(&server.app, execute_request(json!({ "code": "0" }))).await;

    let (status, entry) = send_json(&server.app, get("/api/requests/trace-42")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["request"]["path"], json!("/traced"));
    assert_eq!(entry["request"]["correlationId"], json!("trace-42"));

    let (status, entry) = send_json(&server.app, get(&format!("/api/requests/{minted}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["request"]["correlationId"], json!(minted));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_bodies_are_rejected() {
    let server = server_with(|config| config.server.max_body_bytes = 16).await;
    send_json(
        &server.app,
        execute_request(json!({ "code": "app.post('/upload', (req, res) => res.send('ok'))" })),
    )
    .await;

    let request = Request::post("/upload")
        .body(Body::from(vec![b'x'; 64]))
        .unwrap();
    let (status, _) = send_json(&server.app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_state_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = TetherConfig::default();
    config.database.url = format!("sqlite://{}", dir.path().join("state.db").display());

    let engine = build_engine(&config).await.unwrap();
    let result = engine
        .execute("state.set('greeting', 'hello')", tether_runtime::JobSource::Api, None)
        .await
        .unwrap();
    assert!(result.is_success());
    engine.shutdown().await;

    let engine = build_engine(&config).await.unwrap();
    let result = engine
        .execute("state.get('greeting')", tether_runtime::JobSource::Api, None)
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!("hello")));
    engine.shutdown().await;
}
