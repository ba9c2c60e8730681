//! The HTTP/WebSocket surface: task submission and management, issue
//! feedback, live log streaming, and the health/metrics endpoints.

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path as AxPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use rv_telemetry::middleware::metrics_middleware;
use rv_telemetry::tracing_setup::request_id_middleware;

use rv_api_types::{
    BatchCreateResponse, BatchTaskResult, ConcurrencyStatus, IssueCommentRequest,
    IssueFeedbackRequest, IssueSatisfactionRequest, ListTasksQuery, LogHistoryQuery,
    LogHistoryResponse, PaginatedTasks, TaskDetail, TaskStatisticsResponse,
};
use rv_core::store::{SortOrder, TaskSortColumn};
use rv_core::types::{AIModel, FileInfo, QueueEntry, Task, TaskStatus, User, UserRole};

use crate::api_error::ApiError;
use crate::api_state::ApiState;
use crate::auth::AuthUser;
use crate::log_bus::StreamEvent;
use crate::origin_validation::{self, DEFAULT_ALLOWED_ORIGINS};
use crate::share_guard::{self, resolve_permission};

pub fn build_router(state: ApiState) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route("/api/tasks/batch", post(create_tasks_batch))
        .route("/api/tasks/statistics", get(get_statistics))
        .route("/api/tasks/concurrency-status", get(get_concurrency_status))
        .route("/api/tasks/{id}", get(get_task).delete(delete_task))
        .route("/api/tasks/{id}/retry", post(retry_task))
        .route("/api/tasks/{id}/report", get(get_report))
        .route("/api/tasks/{id}/file", get(get_file))
        .route("/api/tasks/{id}/logs/history", get(log_history))
        .route("/ws/tasks/{id}/logs", get(ws_logs))
        .route("/api/issues/{id}/feedback", put(update_issue_feedback))
        .route("/api/issues/{id}/satisfaction", put(update_issue_satisfaction))
        .route("/api/issues/{id}/comment", put(update_issue_comment))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(metrics, metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Task submission
// ---------------------------------------------------------------------------

struct UploadedFile {
    bytes: Vec<u8>,
    original_name: String,
    mime_type: String,
}

async fn take_file_field(field: axum::extract::multipart::Field<'_>) -> Result<UploadedFile, ApiError> {
    let original_name = field.file_name().unwrap_or("upload").to_string();
    let mime_type = field.content_type().unwrap_or("application/octet-stream").to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::Validation(format!("reading upload: {e}")))?
        .to_vec();
    Ok(UploadedFile { bytes, original_name, mime_type })
}

async fn resolve_model(state: &ApiState, model_key: Option<&str>) -> Result<AIModel, ApiError> {
    let model = match model_key {
        Some(key) if !key.is_empty() => state.store.get_ai_model_by_key(key).await?,
        _ => state.store.get_default_ai_model().await?,
    };
    model.ok_or_else(|| ApiError::Validation("no such AI model and no default is configured".into()))
}

fn data_dir(state: &ApiState) -> PathBuf {
    let raw = &state.config.general.data_dir;
    if let Some(rest) = raw.strip_prefix("~/") {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(rest)
    } else {
        PathBuf::from(raw)
    }
}

async fn store_upload(state: &ApiState, upload: &UploadedFile) -> Result<FileInfo, ApiError> {
    let sha256 = format!("{:x}", Sha256::digest(&upload.bytes));
    if let Some(existing) = state.store.get_file_info_by_sha256(&sha256).await? {
        return Ok(existing);
    }

    let dir = data_dir(state).join("uploads");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::InternalError(format!("creating upload dir: {e}")))?;
    let stored_path = dir.join(&sha256);
    tokio::fs::write(&stored_path, &upload.bytes)
        .await
        .map_err(|e| ApiError::InternalError(format!("writing upload: {e}")))?;

    let file_info = FileInfo {
        id: Uuid::new_v4(),
        sha256,
        stored_path: stored_path.to_string_lossy().into_owned(),
        original_name: upload.original_name.clone(),
        size_bytes: upload.bytes.len() as i64,
        mime_type: upload.mime_type.clone(),
        created_at: chrono::Utc::now(),
    };
    state.store.upsert_file_info(&file_info).await?;
    Ok(file_info)
}

async fn submit_task(
    state: &ApiState,
    user: &User,
    upload: UploadedFile,
    title: Option<String>,
    model_key: Option<String>,
) -> Result<Task, ApiError> {
    if upload.bytes.len() as u64 > state.config.pipeline.max_file_size_bytes {
        return Err(ApiError::Validation(format!(
            "file exceeds max size of {} bytes",
            state.config.pipeline.max_file_size_bytes
        )));
    }

    // Fast-fail admission check. The slot this acquires is released as soon
    // as this request returns — the WorkerPool acquires its own, held for
    // the task's actual processing lifetime.
    let _admission = state.governor.try_acquire(user.id)?;

    let model = resolve_model(state, model_key.as_deref()).await?;
    let file_info = store_upload(state, &upload).await?;
    let title = title.unwrap_or_else(|| upload.original_name.clone());
    let task = Task::new(user.id, file_info.id, model.id, title);
    state.store.insert_task(&task).await?;

    let entry = QueueEntry::new(
        task.id,
        user.id,
        state.config.queue.default_priority,
        state.config.queue.max_attempts,
    );
    state.store.enqueue(&entry).await?;
    state.store.update_task_status(task.id, TaskStatus::Queued, None).await?;
    state.log_bus.publish_status(task.id, "queued".to_string());
    if let Ok(depth) = state.store.queue_length().await {
        state.metrics.set_queue_depth(depth);
    }

    let mut queued = task;
    queued.status = TaskStatus::Queued;
    Ok(queued)
}

async fn create_task(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let mut upload: Option<UploadedFile> = None;
    let mut title: Option<String> = None;
    let mut model_key: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => upload = Some(take_file_field(field).await?),
            "title" => title = Some(field.text().await.unwrap_or_default()),
            "model_key" => model_key = Some(field.text().await.unwrap_or_default()),
            _ => {}
        }
    }
    let upload = upload.ok_or_else(|| ApiError::Validation("missing `file` part".into()))?;
    let task = submit_task(&state, &user, upload, title, model_key).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn create_tasks_batch(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<BatchCreateResponse>, ApiError> {
    let mut model_key: Option<String> = None;
    let mut results = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "model_key" => model_key = Some(field.text().await.unwrap_or_default()),
            "file" => {
                let upload = take_file_field(field).await?;
                let original_name = upload.original_name.clone();
                match submit_task(&state, &user, upload, None, model_key.clone()).await {
                    Ok(task) => results.push(BatchTaskResult { original_name, task: Some(task), error: None }),
                    Err(err) => results.push(BatchTaskResult { original_name, task: None, error: Some(err.to_string()) }),
                }
            }
            _ => {}
        }
    }
    Ok(Json(BatchCreateResponse { results }))
}

// ---------------------------------------------------------------------------
// Task listing / detail / lifecycle
// ---------------------------------------------------------------------------

async fn list_tasks(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    Query(q): Query<ListTasksQuery>,
) -> Result<Json<PaginatedTasks>, ApiError> {
    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(20).clamp(1, 200);
    let owner_filter = if user.role == UserRole::User { Some(user.id) } else { None };
    let sort_by: TaskSortColumn = q.sort_by.map(Into::into).unwrap_or(TaskSortColumn::CreatedAt);
    let sort_order: SortOrder = q.sort_order.map(Into::into).unwrap_or(SortOrder::Desc);

    let (items, total) = state
        .store
        .list_tasks(owner_filter, q.status, q.search, sort_by, sort_order, page, page_size)
        .await?;
    let has_next = (page as u64) * (page_size as u64) < total;
    Ok(Json(PaginatedTasks { items, total, page, page_size, has_next }))
}

async fn load_task_and_permission(
    state: &ApiState,
    user: &User,
    task_id: Uuid,
) -> Result<(Task, share_guard::Permission), ApiError> {
    let task = state
        .store
        .get_task(task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))?;
    let shares = state.store.list_active_shares_for_task(task_id).await?;
    let permission = resolve_permission(user, &task, &shares);
    Ok((task, permission))
}

async fn get_task(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(task_id): AxPath<Uuid>,
) -> Result<Json<TaskDetail>, ApiError> {
    let (task, permission) = load_task_and_permission(&state, &user, task_id).await?;
    if !permission.can_view() {
        return Err(ApiError::AuthorizationDenied("no access to this task".into()));
    }
    let issues = state.store.list_issues_for_task(task_id).await?;
    let shares = state.store.list_active_shares_for_task(task_id).await?;
    Ok(Json(TaskDetail { task, issues, shares }))
}

async fn delete_task(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(task_id): AxPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    let (task, _) = load_task_and_permission(&state, &user, task_id).await?;
    if !share_guard::is_owner_or_admin(&user, &task) {
        return Err(ApiError::AuthorizationDenied("only the owner or an admin can delete a task".into()));
    }

    if !task.status.is_terminal() {
        state.store.update_task_status(task_id, TaskStatus::Cancelled, None).await?;
        state.log_bus.publish_status(task_id, "cancelled".to_string());
    }
    let deleted = state.store.delete_task(task_id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("task {task_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn retry_task(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(task_id): AxPath<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let (task, _) = load_task_and_permission(&state, &user, task_id).await?;
    if !share_guard::is_owner_or_admin(&user, &task) {
        return Err(ApiError::AuthorizationDenied("only the owner or an admin can retry a task".into()));
    }
    if task.status != TaskStatus::Failed {
        return Err(ApiError::Validation("only failed tasks can be retried".into()));
    }

    state.store.update_task_status(task_id, TaskStatus::Queued, None).await?;
    state.store.increment_retry_count(task_id).await?;
    let entry = QueueEntry::new(
        task_id,
        task.owner_id,
        state.config.queue.default_priority,
        state.config.queue.max_attempts,
    );
    state.store.enqueue(&entry).await?;
    state.log_bus.publish_status(task_id, "queued".to_string());

    let task = state
        .store
        .get_task(task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))?;
    Ok(Json(task))
}

async fn get_report(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(task_id): AxPath<Uuid>,
) -> Result<Response, ApiError> {
    let (task, permission) = load_task_and_permission(&state, &user, task_id).await?;
    if !permission.can_download() {
        return Err(ApiError::AuthorizationDenied("full access is required to download a report".into()));
    }
    let issues = state.store.list_issues_for_task(task_id).await?;
    let body = state
        .reporter
        .render(&task, &issues)
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let filename = format!("{}-report", sanitize_filename(&task.title));
    let disposition = format!("attachment; filename*=UTF-8''{}", urlencode(&filename));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, state.reporter.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn get_file(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(task_id): AxPath<Uuid>,
) -> Result<Response, ApiError> {
    let (task, permission) = load_task_and_permission(&state, &user, task_id).await?;
    if !permission.can_download() {
        return Err(ApiError::AuthorizationDenied("full access is required to download the source file".into()));
    }
    let file_info = state
        .store
        .get_file_info(task.file_info_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("source file not found".into()))?;
    let bytes = tokio::fs::read(&file_info.stored_path)
        .await
        .map_err(|e| ApiError::InternalError(format!("reading stored file: {e}")))?;

    let disposition = format!("attachment; filename*=UTF-8''{}", urlencode(&file_info.original_name));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, file_info.mime_type.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn get_statistics(State(state): State<ApiState>) -> Result<Json<TaskStatisticsResponse>, ApiError> {
    let stats = state.store.task_statistics().await?;
    Ok(Json(stats.into()))
}

async fn get_concurrency_status(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
) -> Json<ConcurrencyStatus> {
    Json(ConcurrencyStatus {
        system_in_use: state.governor.system_in_use(),
        system_limit: state.governor.system_limit(),
        user_in_use: state.governor.user_in_use(user.id),
        user_limit: user.max_concurrent_tasks as usize,
    })
}

// ---------------------------------------------------------------------------
// Issue feedback
// ---------------------------------------------------------------------------

async fn load_issue_permission(
    state: &ApiState,
    user: &User,
    issue_id: Uuid,
) -> Result<(rv_core::types::Issue, share_guard::Permission), ApiError> {
    let issue = state
        .store
        .get_issue(issue_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("issue {issue_id} not found")))?;
    let (_, permission) = load_task_and_permission(state, user, issue.task_id).await?;
    Ok((issue, permission))
}

async fn update_issue_feedback(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(issue_id): AxPath<Uuid>,
    Json(body): Json<IssueFeedbackRequest>,
) -> Result<StatusCode, ApiError> {
    let (_, permission) = load_issue_permission(&state, &user, issue_id).await?;
    if !permission.can_submit_feedback() {
        return Err(ApiError::AuthorizationDenied("feedback access is required".into()));
    }
    let feedback = match body.feedback_type.as_str() {
        "" => rv_core::types::IssueFeedback::Unset,
        "accept" => rv_core::types::IssueFeedback::Accept,
        "reject" => rv_core::types::IssueFeedback::Reject,
        other => return Err(ApiError::Validation(format!("feedback_type must be \"\", \"accept\", or \"reject\", got {other:?}"))),
    };
    state.store.update_issue_feedback(issue_id, feedback, body.comment).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_issue_satisfaction(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(issue_id): AxPath<Uuid>,
    Json(body): Json<IssueSatisfactionRequest>,
) -> Result<StatusCode, ApiError> {
    let (_, permission) = load_issue_permission(&state, &user, issue_id).await?;
    if !permission.can_submit_feedback() {
        return Err(ApiError::AuthorizationDenied("feedback access is required".into()));
    }
    if !(1..=5).contains(&body.rating) {
        return Err(ApiError::Validation("rating must be between 1 and 5".into()));
    }
    state.store.update_issue_satisfaction(issue_id, body.rating).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_issue_comment(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(issue_id): AxPath<Uuid>,
    Json(body): Json<IssueCommentRequest>,
) -> Result<StatusCode, ApiError> {
    let (_, permission) = load_issue_permission(&state, &user, issue_id).await?;
    if !permission.can_submit_feedback() {
        return Err(ApiError::AuthorizationDenied("feedback access is required".into()));
    }
    state.store.update_issue_comment(issue_id, &body.comment).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Log history + live streaming
// ---------------------------------------------------------------------------

async fn log_history(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(task_id): AxPath<Uuid>,
    Query(q): Query<LogHistoryQuery>,
) -> Result<Json<LogHistoryResponse>, ApiError> {
    let (_, permission) = load_task_and_permission(&state, &user, task_id).await?;
    if !permission.can_view() {
        return Err(ApiError::AuthorizationDenied("no access to this task".into()));
    }
    let limit = q.limit.unwrap_or(1000).min(5000);
    let entries = state.store.load_task_log_history(task_id, limit).await?;
    Ok(Json(LogHistoryResponse { task_id, entries }))
}

async fn ws_logs(
    State(state): State<ApiState>,
    AuthUser(user): AuthUser,
    AxPath(task_id): AxPath<Uuid>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    origin_validation::validate_websocket_origin(&headers, DEFAULT_ALLOWED_ORIGINS)
        .map_err(|_| ApiError::AuthorizationDenied("origin not allowed".into()))?;
    let (_, permission) = load_task_and_permission(&state, &user, task_id).await?;
    if !permission.can_view() {
        return Err(ApiError::AuthorizationDenied("no access to this task".into()));
    }

    let heartbeat_interval = Duration::from_secs(state.config.logbus.heartbeat_interval_sec);
    let heartbeat_timeout = Duration::from_secs(state.config.logbus.heartbeat_timeout_sec);
    Ok(ws.on_upgrade(move |socket| handle_log_socket(socket, state, task_id, heartbeat_interval, heartbeat_timeout)))
}

/// Drives one subscriber's socket: tails the task's log stream, answers
/// client `ping`s, and runs a ping/pong heartbeat that closes the
/// connection with code 4000 if a ping goes unanswered past its timeout.
async fn handle_log_socket(
    socket: WebSocket,
    state: ApiState,
    task_id: Uuid,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let subscription = state.log_bus.subscribe(task_id).await;

    if let Ok(text) = serde_json::to_string(&StreamEvent::Connection { task_id }) {
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let mut ping_deadline: Option<tokio::time::Instant> = None;
    let mut close_reason = "normal";

    loop {
        let next_wakeup = ping_deadline.unwrap_or_else(|| tokio::time::Instant::now() + heartbeat_interval);

        tokio::select! {
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        close_reason = "slow_consumer";
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => ping_deadline = None,
                    Some(Ok(Message::Text(text))) if text == "ping" => {
                        ping_deadline = None;
                        if ws_tx.send(Message::Text("pong".into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            _ = tokio::time::sleep_until(next_wakeup) => {
                if ping_deadline.is_some() {
                    close_reason = "heartbeat_timeout";
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                ping_deadline = Some(tokio::time::Instant::now() + heartbeat_timeout);
            }
        }
    }

    let (code, reason) = match close_reason {
        "heartbeat_timeout" => (4000, "heartbeat_timeout"),
        "slow_consumer" => (4001, "slow_consumer"),
        _ => (1000, "normal"),
    };
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
        .await;
}

// ---------------------------------------------------------------------------
// Health / metrics
// ---------------------------------------------------------------------------

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.as_bytes() {
        match *byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(*byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
