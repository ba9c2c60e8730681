//! Shared request/response types for the HTTP API, kept separate from
//! `rv-core::types` so the wire shape can evolve independently of the
//! storage schema.

use chrono::{DateTime, Utc};
use rv_core::store::{SortOrder, TaskSortColumn};
use rv_core::types::{Issue, Task, TaskShare, TaskStatistics, TaskStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query params for `GET /api/tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub sort_by: Option<ApiSortColumn>,
    #[serde(default)]
    pub sort_order: Option<ApiSortOrder>,
}

/// Wire form of `rv_core::store::TaskSortColumn` — kept distinct so the
/// allowlist lives in `rv-core` and the HTTP layer can't smuggle in a column
/// that isn't in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiSortColumn {
    CreatedAt,
    Title,
    Status,
    Progress,
}

impl From<ApiSortColumn> for TaskSortColumn {
    fn from(col: ApiSortColumn) -> Self {
        match col {
            ApiSortColumn::CreatedAt => TaskSortColumn::CreatedAt,
            ApiSortColumn::Title => TaskSortColumn::Title,
            ApiSortColumn::Status => TaskSortColumn::Status,
            ApiSortColumn::Progress => TaskSortColumn::Progress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiSortOrder {
    Asc,
    Desc,
}

impl From<ApiSortOrder> for SortOrder {
    fn from(order: ApiSortOrder) -> Self {
        match order {
            ApiSortOrder::Asc => SortOrder::Asc,
            ApiSortOrder::Desc => SortOrder::Desc,
        }
    }
}

/// A page of tasks, as returned by `GET /api/tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedTasks {
    pub items: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_next: bool,
}

/// Full detail for a single task: the row plus its issues and active shares,
/// returned by `GET /api/tasks/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub issues: Vec<Issue>,
    pub shares: Vec<TaskShare>,
}

/// Body of `POST /api/tasks`'s non-file fields (the file itself arrives as a
/// multipart part).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskFields {
    pub title: Option<String>,
    pub model_key: Option<String>,
}

/// One result within a `POST /api/tasks/batch` response — files are
/// independent, so one bad upload doesn't fail the whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchTaskResult {
    pub original_name: String,
    pub task: Option<Task>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCreateResponse {
    pub results: Vec<BatchTaskResult>,
}

/// `GET /api/tasks/concurrency-status` — the Governor's current admission
/// state for the calling user, so a client can show "N of M slots in use"
/// before submitting.
#[derive(Debug, Clone, Serialize)]
pub struct ConcurrencyStatus {
    pub system_in_use: usize,
    pub system_limit: usize,
    pub user_in_use: usize,
    pub user_limit: usize,
}

/// `GET /api/tasks/statistics` response — a thin re-export of the store's
/// own aggregate, kept as a distinct type so the wire shape isn't tied to
/// `rv_core::types::TaskStatistics` changing shape later.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatisticsResponse {
    pub pending: u64,
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timestamp: DateTime<Utc>,
}

impl From<TaskStatistics> for TaskStatisticsResponse {
    fn from(s: TaskStatistics) -> Self {
        Self {
            pending: s.pending,
            queued: s.queued,
            processing: s.processing,
            completed: s.completed,
            failed: s.failed,
            cancelled: s.cancelled,
            timestamp: s.timestamp,
        }
    }
}

/// `PUT /api/issues/{id}/feedback` body. `feedback_type` is the raw wire
/// value ("" | "accept" | "reject") -- "" clears a prior accept/reject back
/// to `IssueFeedback::Unset`, so it can't be represented by the enum's own
/// snake_case `Deserialize` impl and is validated at the call site instead.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueFeedbackRequest {
    pub feedback_type: String,
    pub comment: Option<String>,
}

/// `PUT /api/issues/{id}/satisfaction` body.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueSatisfactionRequest {
    pub rating: u8,
}

/// `PUT /api/issues/{id}/comment` body — comment-only, never touches
/// `user_feedback`.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentRequest {
    pub comment: String,
}

/// `GET /api/tasks/{id}/logs/history` query.
#[derive(Debug, Clone, Deserialize)]
pub struct LogHistoryQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogHistoryResponse {
    pub task_id: Uuid,
    pub entries: Vec<rv_core::types::TaskLog>,
}
