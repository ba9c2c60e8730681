//! Full HTTP surface integration tests: submit a document through the real
//! router, list/show/retry/cancel it, and walk it through the worker pool.

use std::sync::Arc;

use rv_bridge::api_state::ApiState;
use rv_core::config::Config;
use rv_core::store::Store;
use rv_core::types::{AIModel, User, UserRole};
use rv_harness::governor::ResourceGovernor;
use rv_harness::shutdown::ShutdownSignal;
use rv_pipeline::ai_clients::LocalStubClient;
use rv_pipeline::reporters::CsvReporter;
use rv_telemetry::Metrics;
use futures_util::StreamExt;
use serde_json::Value;
use uuid::Uuid;

/// Build a WebSocket upgrade request carrying bearer auth and an allowed Origin.
fn ws_request(url: &str, token: &str) -> tokio_tungstenite::tungstenite::http::Request<()> {
    tokio_tungstenite::tungstenite::http::Request::builder()
        .uri(url)
        .header("Host", "localhost")
        .header("Origin", "http://localhost")
        .header("Authorization", format!("Bearer {token}"))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", tokio_tungstenite::tungstenite::handshake::client::generate_key())
        .body(())
        .unwrap()
}

async fn start_test_server() -> (String, Arc<Store>, User) {
    let store = Arc::new(Store::new_in_memory().await.expect("in-memory store"));

    let model = AIModel { id: Uuid::new_v4(), key: "stub".into(), provider: "local".into(), config: serde_json::json!({}), is_default: true };
    store.upsert_ai_model(&model).await.expect("seed ai model");

    let user = User::new("test-external-uid", "Test User", "test@example.com", UserRole::User);
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

fn authed(client: &reqwest::Client, url: &str, user: &User) -> reqwest::RequestBuilder {
    client.get(url).bearer_auth(&user.external_uid)
}

#[tokio::test]
async fn submit_then_list_then_show() {
    let (base, _store, user) = start_test_server().await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new()
        .part("file", reqwest::multipart::Part::bytes(b"hello  world, double space here.".to_vec()).file_name("doc.txt"))
        .text("title", "My Document");

    let resp = client
        .post(format!("{base}/api/tasks"))
        .bearer_auth(&user.external_uid)
        .multipart(form)
        .send()
        .await
        .expect("submit request");
    assert_eq!(resp.status(), 201);
    let task: Value = resp.json().await.expect("task json");
    let task_id = task["id"].as_str().expect("task id").to_string();
    assert_eq!(task["title"].as_str(), Some("My Document"));

    let resp = authed(&client, &format!("{base}/api/tasks"), &user).send().await.expect("list request");
    assert_eq!(resp.status(), 200);
    let page: Value = resp.json().await.expect("page json");
    assert!(page["items"].as_array().unwrap().iter().any(|t| t["id"] == task_id));

    let resp = authed(&client, &format!("{base}/api/tasks/{task_id}"), &user).send().await.expect("show request");
    assert_eq!(resp.status(), 200);
    let detail: Value = resp.json().await.expect("detail json");
    assert_eq!(detail["task"]["id"].as_str(), Some(task_id.as_str()));
}

#[tokio::test]
async fn submit_without_bearer_token_is_rejected() {
    let (base, _store, _user) = start_test_server().await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part("file", reqwest::multipart::Part::bytes(b"no auth".to_vec()).file_name("doc.txt"));
    let resp = client.post(format!("{base}/api/tasks")).multipart(form).send().await.expect("submit request");
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn cancel_unknown_task_returns_not_found() {
    let (base, _store, user) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(format!("{base}/api/tasks/{}", Uuid::new_v4()))
        .bearer_auth(&user.external_uid)
        .send()
        .await
        .expect("cancel request");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn statistics_reflect_submitted_tasks() {
    let (base, _store, user) = start_test_server().await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part("file", reqwest::multipart::Part::bytes(b"content".to_vec()).file_name("a.txt"));
    let resp = client.post(format!("{base}/api/tasks")).bearer_auth(&user.external_uid).multipart(form).send().await.expect("submit request");
    assert_eq!(resp.status(), 201);

    let resp = authed(&client, &format!("{base}/api/tasks/statistics"), &user).send().await.expect("stats request");
    assert_eq!(resp.status(), 200);
    let stats: Value = resp.json().await.expect("stats json");
    assert!(stats["pending"].as_u64().unwrap() + stats["queued"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn worker_pool_processes_a_submitted_task_to_completion() {
    use rv_daemon::queue::Queue;
    use rv_daemon::worker_pool::WorkerPool;

    let (base, store, user) = start_test_server().await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part("file", reqwest::multipart::Part::bytes(b"plain text with no  double space issue".to_vec()).file_name("clean.txt"));
    let resp = client.post(format!("{base}/api/tasks")).bearer_auth(&user.external_uid).multipart(form).send().await.expect("submit request");
    assert_eq!(resp.status(), 201);
    let task: Value = resp.json().await.expect("task json");
    let task_id = task["id"].as_str().unwrap().to_string();

    let config = Config::default();
    let governor = Arc::new(ResourceGovernor::new(config.governor.system_max_concurrent, config.governor.default_user_max_concurrent, config.governor.user_db_connection_limit as usize));
    let log_bus = Arc::new(rv_bridge::log_bus::LogBus::new(store.clone(), config.logbus.per_task_history_max, config.logbus.per_sub_buffer_max));
    let queue = Arc::new(Queue::new(store.clone(), config.queue.clone()));
    let shutdown = ShutdownSignal::new();

    let pool = Arc::new(WorkerPool::new(
        store.clone(),
        queue,
        governor,
        log_bus,
        Arc::new(Metrics::new()),
        Arc::new(LocalStubClient),
        &config,
        shutdown.clone(),
    ));
    let handles = pool.spawn();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    let mut status = String::new();
    while tokio::time::Instant::now() < deadline {
        let resp = authed(&client, &format!("{base}/api/tasks/{task_id}"), &user).send().await.unwrap();
        let detail: Value = resp.json().await.unwrap();
        status = detail["task"]["status"].as_str().unwrap_or("").to_string();
        if status == "completed" || status == "failed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    shutdown.trigger();
    for h in handles {
        let _ = h.await;
    }

    assert_eq!(status, "completed");
}

#[tokio::test]
async fn websocket_log_stream_sends_a_connection_event() {
    let (base, _store, user) = start_test_server().await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part("file", reqwest::multipart::Part::bytes(b"content".to_vec()).file_name("a.txt"));
    let resp = client.post(format!("{base}/api/tasks")).bearer_auth(&user.external_uid).multipart(form).send().await.expect("submit request");
    let task: Value = resp.json().await.expect("task json");
    let task_id = task["id"].as_str().unwrap().to_string();

    let ws_url = base.replacen("http://", "ws://", 1) + &format!("/ws/tasks/{task_id}/logs");
    let request = ws_request(&ws_url, &user.external_uid);
    let (mut socket, _) = tokio_tungstenite::connect_async(request).await.expect("websocket handshake");

    let message = tokio::time::timeout(std::time::Duration::from_secs(2), socket.next())
        .await
        .expect("timed out waiting for first message")
        .expect("stream closed before any message")
        .expect("websocket message");
    let text = message.into_text().expect("text frame");
    let event: Value = serde_json::from_str(&text).expect("event json");
    assert_eq!(event["type"].as_str(), Some("connection"));
}
