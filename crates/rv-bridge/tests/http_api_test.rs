//! Router-level tests for the operational endpoints and WebSocket origin
//! enforcement that aren't exercised by the task-lifecycle integration test
//! in `rv-daemon` (which covers submit/list/show/retry/cancel instead).

use std::sync::Arc;

use futures_util::StreamExt;
use rv_bridge::api_state::ApiState;
use rv_core::config::Config;
use rv_core::store::Store;
use rv_core::types::{AIModel, User, UserRole};
use rv_harness::governor::ResourceGovernor;
use rv_harness::shutdown::ShutdownSignal;
use rv_pipeline::reporters::CsvReporter;
use rv_telemetry::Metrics;
use uuid::Uuid;

async fn start_test_server() -> (String, Arc<Store>, User) {
    let store = Arc::new(Store::new_in_memory().await.expect("in-memory store"));
    let model = AIModel { id: Uuid::new_v4(), key: "stub".into(), provider: "local".into(), config: serde_json::json!({}), is_default: true };
    store.upsert_ai_model(&model).await.expect("seed ai model");
    let user = User::new("test-uid", "Test User", "test@example.com", UserRole::User);
    store.upsert_user(&user).await.expect("seed user");

    let config = Arc::new(Config::default());
    let state = ApiState {
        store: store.clone(),
        governor: Arc::new(ResourceGovernor::new(config.governor.system_max_concurrent, config.governor.default_user_max_concurrent, config.governor.user_db_connection_limit as usize)),
        log_bus: Arc::new(rv_bridge::log_bus::LogBus::new(store.clone(), config.logbus.per_task_history_max, config.logbus.per_sub_buffer_max)),
        config,
        shutdown: ShutdownSignal::new(),
        reporter: Arc::new(CsvReporter),
        metrics: Arc::new(Metrics::new()),
    };
    let router = rv_bridge::routes::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), store, user)
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (base, _store, _user) = start_test_server().await;
    let resp = reqwest::get(format!("{base}/healthz")).await.expect("healthz request");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let (base, _store, _user) = start_test_server().await;

    // Hit an authenticated route first so the request middleware has
    // something to record.
    reqwest::get(format!("{base}/healthz")).await.unwrap();

    let resp = reqwest::get(format!("{base}/metrics")).await.expect("metrics request");
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let body = resp.text().await.unwrap();
    assert!(body.contains("api_requests_total"));
}

#[tokio::test]
async fn websocket_upgrade_without_origin_header_is_rejected() {
    let (base, _store, user) = start_test_server().await;
    let client = reqwest::Client::new();

    // Create a task first so the WebSocket route has something to look up.
    let form = reqwest::multipart::Form::new().part("file", reqwest::multipart::Part::bytes(b"x".to_vec()).file_name("a.txt"));
    let resp = client.post(format!("{base}/api/tasks")).bearer_auth(&user.external_uid).multipart(form).send().await.expect("submit request");
    let task: serde_json::Value = resp.json().await.unwrap();
    let task_id = task["id"].as_str().unwrap();

    // A plain GET against the WebSocket route (no Upgrade/Origin headers)
    // never reaches a successful upgrade; origin validation runs first and
    // rejects it before axum even attempts the handshake.
    let resp = client
        .get(format!("{base}/ws/tasks/{task_id}/logs"))
        .bearer_auth(&user.external_uid)
        .send()
        .await
        .expect("ws request");
    assert!(!resp.status().is_success());
}

#[tokio::test]
async fn websocket_log_stream_upgrades_with_a_valid_origin() {
    let (base, _store, user) = start_test_server().await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part("file", reqwest::multipart::Part::bytes(b"x".to_vec()).file_name("a.txt"));
    let resp = client.post(format!("{base}/api/tasks")).bearer_auth(&user.external_uid).multipart(form).send().await.expect("submit request");
    let task: serde_json::Value = resp.json().await.unwrap();
    let task_id = task["id"].as_str().unwrap();

    let ws_url = base.replacen("http://", "ws://", 1) + &format!("/ws/tasks/{task_id}/logs");
    let request = tokio_tungstenite::tungstenite::http::Request::builder()
        .uri(ws_url)
        .header("Host", "localhost")
        .header("Origin", "http://localhost")
        .header("Authorization", format!("Bearer {}", user.external_uid))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", tokio_tungstenite::tungstenite::handshake::client::generate_key())
        .body(())
        .unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(request).await.expect("websocket handshake");
    let message = tokio::time::timeout(std::time::Duration::from_secs(2), socket.next())
        .await
        .expect("timed out waiting for first message")
        .expect("stream closed before any message")
        .expect("websocket message");
    let event: serde_json::Value = serde_json::from_str(&message.into_text().unwrap()).unwrap();
    assert_eq!(event["type"].as_str(), Some("connection"));
}
