use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UserRole / User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
    SystemAdmin,
}

impl UserRole {
    /// Default per-user concurrency cap for this role, used when a `User`
    /// row does not carry an explicit override.
    pub fn default_max_concurrent_tasks(&self) -> i64 {
        match self {
            UserRole::User => 10,
            UserRole::Admin => 50,
            UserRole::SystemAdmin => 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_uid: String,
    pub display_name: String,
    pub email: String,
    pub role: UserRole,
    pub max_concurrent_tasks: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(external_uid: impl Into<String>, display_name: impl Into<String>, email: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_uid: external_uid.into(),
            display_name: display_name.into(),
            email: email.into(),
            max_concurrent_tasks: role.default_max_concurrent_tasks(),
            role,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// AIModel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIModel {
    pub id: Uuid,
    pub key: String,
    pub provider: String,
    pub config: serde_json::Value,
    pub is_default: bool,
}

// ---------------------------------------------------------------------------
// FileInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: Uuid,
    pub sha256: String,
    pub stored_path: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Queued)
                | (TaskStatus::Queued, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Queued) // retry requeue
                | (TaskStatus::Failed, TaskStatus::Queued) // explicit retry
                // any non-terminal state can be cancelled
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Queued, TaskStatus::Cancelled)
                | (TaskStatus::Processing, TaskStatus::Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub file_info_id: Uuid,
    pub ai_model_id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

impl Task {
    pub fn new(owner_id: Uuid, file_info_id: Uuid, ai_model_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            file_info_id,
            ai_model_id,
            title: title.into(),
            status: TaskStatus::Pending,
            progress: 0,
            current_stage: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
        }
    }

    /// Move global progress forward, clamping to the valid 0..=100 range.
    pub fn set_progress(&mut self, stage: impl Into<String>, progress: u8) {
        self.current_stage = Some(stage.into());
        self.progress = progress.min(100);
    }
}

// ---------------------------------------------------------------------------
// QueueEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub priority: i32,
    pub status: QueueStatus,
    pub worker_id: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_boosted_at: Option<DateTime<Utc>>,
    pub estimated_duration_sec: Option<i64>,
}

impl QueueEntry {
    pub fn new(task_id: Uuid, user_id: Uuid, priority: i32, max_attempts: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            user_id,
            priority: priority.clamp(1, 10),
            status: QueueStatus::Queued,
            worker_id: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: 0,
            max_attempts,
            last_boosted_at: None,
            estimated_duration_sec: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Grammar,
    Logic,
    Completeness,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueFeedback {
    Unset,
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub task_id: Uuid,
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    pub original_text: Option<String>,
    pub user_impact: Option<String>,
    pub reasoning: Option<String>,
    pub location_hint: Option<String>,
    pub user_feedback: IssueFeedback,
    pub feedback_comment: Option<String>,
    pub satisfaction_rating: Option<u8>,
}

// ---------------------------------------------------------------------------
// AIOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIOutput {
    pub id: Uuid,
    pub task_id: Uuid,
    pub stage: String,
    pub chunk_index: i32,
    pub prompt_fingerprint: String,
    pub input_text: String,
    pub raw_output: String,
    /// JSON-encoded structured issue drafts produced for this chunk, opaque
    /// to `rv-core` -- `rv-pipeline` owns the draft shape and is responsible
    /// for (de)serializing it. Lets a cache hit on retry reconstruct the
    /// issues a chunk produced instead of contributing none.
    pub issue_drafts_json: String,
    pub token_usage: Option<i64>,
    pub latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TaskLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Progress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: Uuid,
    pub task_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub module: String,
    pub stage: Option<String>,
    pub progress: Option<u8>,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// TaskShare
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
    ReadOnly,
    FeedbackOnly,
    FullAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskShare {
    pub id: Uuid,
    pub task_id: Uuid,
    pub shared_by: Uuid,
    pub shared_with: Uuid,
    pub permission: SharePermission,
    pub active: bool,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// TaskStatistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub pending: u64,
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timestamp: DateTime<Utc>,
}
