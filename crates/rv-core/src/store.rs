use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::types::{
    AIModel, AIOutput, FileInfo, Issue, IssueFeedback, IssueSeverity, IssueType, LogLevel,
    QueueEntry, QueueStatus, SharePermission, Task, TaskLog, TaskShare, TaskStatistics,
    TaskStatus, User, UserRole,
};

/// Async SQLite-backed persistence for the task-processing core.
///
/// A single `Store` wraps one `tokio_rusqlite::Connection`, which itself owns
/// a dedicated background thread and serializes every call. There is no
/// connection pool: per-user "session" accounting is a Governor concern
/// (see `rv-harness::governor`), independent of physical connection count.
pub struct Store {
    conn: Connection,
}

/// Columns `Store::list_tasks` is allowed to sort by — a fixed allowlist so
/// the sort column never reaches the query as unchecked caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSortColumn {
    CreatedAt,
    Title,
    Status,
    Progress,
}

impl TaskSortColumn {
    fn column_name(self) -> &'static str {
        match self {
            TaskSortColumn::CreatedAt => "created_at",
            TaskSortColumn::Title => "title",
            TaskSortColumn::Status => "status",
            TaskSortColumn::Progress => "progress",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn sql_keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

// ---------------------------------------------------------------------------
// helpers — enum <-> SQLite string
// ---------------------------------------------------------------------------

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid date")
        .with_timezone(&Utc)
}

fn parse_rfc3339_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(|s| parse_rfc3339(&s))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("row not found")]
    NotFound,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl Store {
    /// Open (or create) a database at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> StoreResult<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA cache_size=-64000;
                    PRAGMA mmap_size=268435456;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA busy_timeout=5000;
                    PRAGMA foreign_keys=ON;

                    CREATE TABLE IF NOT EXISTS users (
                        id              TEXT PRIMARY KEY,
                        external_uid    TEXT NOT NULL UNIQUE,
                        display_name    TEXT NOT NULL,
                        email           TEXT NOT NULL,
                        role            TEXT NOT NULL,
                        max_concurrent_tasks INTEGER NOT NULL,
                        created_at      TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS ai_models (
                        id          TEXT PRIMARY KEY,
                        key         TEXT NOT NULL UNIQUE,
                        provider    TEXT NOT NULL,
                        config      TEXT NOT NULL,
                        is_default  INTEGER NOT NULL DEFAULT 0
                    );

                    CREATE TABLE IF NOT EXISTS file_infos (
                        id            TEXT PRIMARY KEY,
                        sha256        TEXT NOT NULL UNIQUE,
                        stored_path   TEXT NOT NULL,
                        original_name TEXT NOT NULL,
                        size_bytes    INTEGER NOT NULL,
                        mime_type     TEXT NOT NULL,
                        created_at    TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS tasks (
                        id              TEXT PRIMARY KEY,
                        owner_id        TEXT NOT NULL REFERENCES users(id),
                        file_info_id    TEXT NOT NULL REFERENCES file_infos(id),
                        ai_model_id     TEXT NOT NULL REFERENCES ai_models(id),
                        title           TEXT NOT NULL,
                        status          TEXT NOT NULL,
                        progress        INTEGER NOT NULL DEFAULT 0,
                        current_stage   TEXT,
                        created_at      TEXT NOT NULL,
                        started_at      TEXT,
                        completed_at    TEXT,
                        error_message   TEXT,
                        retry_count     INTEGER NOT NULL DEFAULT 0
                    );

                    CREATE INDEX IF NOT EXISTS idx_tasks_owner  ON tasks(owner_id);
                    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

                    CREATE TABLE IF NOT EXISTS task_queue (
                        id              TEXT PRIMARY KEY,
                        task_id         TEXT NOT NULL UNIQUE REFERENCES tasks(id) ON DELETE CASCADE,
                        user_id         TEXT NOT NULL,
                        priority        INTEGER NOT NULL DEFAULT 5,
                        status          TEXT NOT NULL,
                        worker_id       TEXT,
                        queued_at       TEXT NOT NULL,
                        started_at      TEXT,
                        completed_at    TEXT,
                        attempts        INTEGER NOT NULL DEFAULT 0,
                        max_attempts    INTEGER NOT NULL DEFAULT 3,
                        last_boosted_at TEXT,
                        estimated_duration_sec INTEGER
                    );

                    CREATE INDEX IF NOT EXISTS idx_queue_status_priority
                        ON task_queue(status, priority DESC, queued_at ASC);
                    CREATE INDEX IF NOT EXISTS idx_queue_user ON task_queue(user_id);

                    CREATE TABLE IF NOT EXISTS issues (
                        id                  TEXT PRIMARY KEY,
                        task_id             TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                        issue_type          TEXT NOT NULL,
                        severity            TEXT NOT NULL,
                        title               TEXT NOT NULL,
                        description         TEXT NOT NULL,
                        original_text       TEXT,
                        user_impact         TEXT,
                        reasoning           TEXT,
                        location_hint       TEXT,
                        user_feedback       TEXT NOT NULL DEFAULT 'unset',
                        feedback_comment    TEXT,
                        satisfaction_rating INTEGER
                    );

                    CREATE INDEX IF NOT EXISTS idx_issues_task ON issues(task_id);

                    CREATE TABLE IF NOT EXISTS ai_outputs (
                        id                  TEXT PRIMARY KEY,
                        task_id             TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                        stage               TEXT NOT NULL,
                        chunk_index         INTEGER NOT NULL,
                        prompt_fingerprint  TEXT NOT NULL,
                        input_text          TEXT NOT NULL,
                        raw_output          TEXT NOT NULL,
                        issue_drafts_json   TEXT NOT NULL DEFAULT '[]',
                        token_usage         INTEGER,
                        latency_ms          INTEGER,
                        created_at          TEXT NOT NULL,
                        UNIQUE(task_id, stage, chunk_index, prompt_fingerprint)
                    );

                    CREATE INDEX IF NOT EXISTS idx_ai_outputs_task_fp
                        ON ai_outputs(task_id, prompt_fingerprint);

                    CREATE TABLE IF NOT EXISTS task_logs (
                        id          TEXT PRIMARY KEY,
                        task_id     TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                        timestamp   TEXT NOT NULL,
                        level       TEXT NOT NULL,
                        module      TEXT NOT NULL,
                        stage       TEXT,
                        progress    INTEGER,
                        message     TEXT NOT NULL,
                        metadata    TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_task_logs_task_ts ON task_logs(task_id, timestamp);

                    CREATE TABLE IF NOT EXISTS task_shares (
                        id              TEXT PRIMARY KEY,
                        task_id         TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                        shared_by       TEXT NOT NULL,
                        shared_with     TEXT NOT NULL,
                        permission      TEXT NOT NULL,
                        active          INTEGER NOT NULL DEFAULT 1,
                        comment         TEXT,
                        created_at      TEXT NOT NULL,
                        revoked_at      TEXT
                    );

                    CREATE UNIQUE INDEX IF NOT EXISTS idx_shares_task_user_active
                        ON task_shares(task_id, shared_with) WHERE active = 1;
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        let id = user.id.to_string();
        let external_uid = user.external_uid.clone();
        let display_name = user.display_name.clone();
        let email = user.email.clone();
        let role = enum_to_sql(&user.role);
        let max_concurrent = user.max_concurrent_tasks;
        let created_at = user.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, external_uid, display_name, email, role, max_concurrent_tasks, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)
                     ON CONFLICT(id) DO UPDATE SET
                        display_name=excluded.display_name, email=excluded.email,
                        role=excluded.role, max_concurrent_tasks=excluded.max_concurrent_tasks",
                    rusqlite::params![id, external_uid, display_name, email, role, max_concurrent, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let id_str = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, external_uid, display_name, email, role, max_concurrent_tasks, created_at
                     FROM users WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_user(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    pub async fn get_user_by_external_uid(&self, external_uid: &str) -> StoreResult<Option<User>> {
        let external_uid = external_uid.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, external_uid, display_name, email, role, max_concurrent_tasks, created_at
                     FROM users WHERE external_uid = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![external_uid])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_user(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // AIModels
    // -----------------------------------------------------------------------

    pub async fn upsert_ai_model(&self, model: &AIModel) -> StoreResult<()> {
        let id = model.id.to_string();
        let key = model.key.clone();
        let provider = model.provider.clone();
        let config = model.config.to_string();
        let is_default = model.is_default as i64;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO ai_models (id, key, provider, config, is_default)
                     VALUES (?1,?2,?3,?4,?5)
                     ON CONFLICT(id) DO UPDATE SET
                        key=excluded.key, provider=excluded.provider,
                        config=excluded.config, is_default=excluded.is_default",
                    rusqlite::params![id, key, provider, config, is_default],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_ai_model(&self, id: Uuid) -> StoreResult<Option<AIModel>> {
        let id_str = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, key, provider, config, is_default FROM ai_models WHERE id = ?1")?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_ai_model(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    pub async fn get_ai_model_by_key(&self, key: &str) -> StoreResult<Option<AIModel>> {
        let key = key.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, key, provider, config, is_default FROM ai_models WHERE key = ?1")?;
                let mut rows = stmt.query(rusqlite::params![key])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_ai_model(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    pub async fn get_default_ai_model(&self) -> StoreResult<Option<AIModel>> {
        let row = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, key, provider, config, is_default FROM ai_models WHERE is_default = 1 LIMIT 1",
                )?;
                let mut rows = stmt.query([])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_ai_model(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // FileInfo
    // -----------------------------------------------------------------------

    pub async fn upsert_file_info(&self, file: &FileInfo) -> StoreResult<()> {
        let id = file.id.to_string();
        let sha256 = file.sha256.clone();
        let stored_path = file.stored_path.clone();
        let original_name = file.original_name.clone();
        let size_bytes = file.size_bytes;
        let mime_type = file.mime_type.clone();
        let created_at = file.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO file_infos (id, sha256, stored_path, original_name, size_bytes, mime_type, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)
                     ON CONFLICT(sha256) DO NOTHING",
                    rusqlite::params![id, sha256, stored_path, original_name, size_bytes, mime_type, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_file_info_by_sha256(&self, sha256: &str) -> StoreResult<Option<FileInfo>> {
        let sha256 = sha256.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, sha256, stored_path, original_name, size_bytes, mime_type, created_at
                     FROM file_infos WHERE sha256 = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![sha256])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_file_info(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    pub async fn get_file_info(&self, id: Uuid) -> StoreResult<Option<FileInfo>> {
        let id_str = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, sha256, stored_path, original_name, size_bytes, mime_type, created_at
                     FROM file_infos WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_file_info(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        let id = task.id.to_string();
        let owner_id = task.owner_id.to_string();
        let file_info_id = task.file_info_id.to_string();
        let ai_model_id = task.ai_model_id.to_string();
        let title = task.title.clone();
        let status = enum_to_sql(&task.status);
        let progress = task.progress as i64;
        let current_stage = task.current_stage.clone();
        let created_at = task.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, owner_id, file_info_id, ai_model_id, title, status,
                        progress, current_stage, created_at, started_at, completed_at, error_message, retry_count)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,NULL,NULL,NULL,0)",
                    rusqlite::params![id, owner_id, file_info_id, ai_model_id, title, status, progress, current_stage, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let id_str = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(TASK_COLUMNS_SELECT)?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_task(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    /// List tasks with pagination, optional status/owner/title-search filters,
    /// and a sort column restricted to a fixed allowlist (never interpolated
    /// from unchecked caller input).
    #[allow(clippy::too_many_arguments)]
    pub async fn list_tasks(
        &self,
        owner_id: Option<Uuid>,
        status: Option<TaskStatus>,
        search: Option<String>,
        sort_by: TaskSortColumn,
        sort_order: SortOrder,
        page: u32,
        page_size: u32,
    ) -> StoreResult<(Vec<Task>, u64)> {
        let owner_str = owner_id.map(|u| u.to_string());
        let status_str = status.map(|s| enum_to_sql(&s));
        let search_pattern = search.map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));
        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let limit = page_size as i64;
        let order_sql = format!("{} {}", sort_by.column_name(), sort_order.sql_keyword());

        let result = self
            .conn
            .call(move |conn| {
                let mut where_clauses = Vec::new();
                let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(o) = &owner_str {
                    where_clauses.push("owner_id = ?".to_string());
                    params.push(Box::new(o.clone()));
                }
                if let Some(s) = &status_str {
                    where_clauses.push("status = ?".to_string());
                    params.push(Box::new(s.clone()));
                }
                if let Some(p) = &search_pattern {
                    where_clauses.push("title LIKE ? ESCAPE '\\'".to_string());
                    params.push(Box::new(p.clone()));
                }
                let where_sql = if where_clauses.is_empty() {
                    String::new()
                } else {
                    format!("WHERE {}", where_clauses.join(" AND "))
                };

                let count_sql = format!("SELECT COUNT(*) FROM tasks {}", where_sql);
                let total: u64 = conn.query_row(
                    &count_sql,
                    rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                    |r| r.get(0),
                )?;

                let list_sql = format!(
                    "SELECT id, owner_id, file_info_id, ai_model_id, title, status, progress,
                            current_stage, created_at, started_at, completed_at, error_message, retry_count
                     FROM tasks {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
                    where_sql,
                    order_sql,
                    params.len() + 1,
                    params.len() + 2
                );
                let mut list_params = params;
                list_params.push(Box::new(limit));
                list_params.push(Box::new(offset));

                let mut stmt = conn.prepare(&list_sql)?;
                let mut rows = stmt.query(rusqlite::params_from_iter(list_params.iter().map(|p| p.as_ref())))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task(row)?);
                }
                Ok((out, total))
            })
            .await?;
        Ok(result)
    }

    pub async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let id_str = id.to_string();
        let status_str = enum_to_sql(&status);
        let now = Utc::now().to_rfc3339();
        let started_touch = matches!(status, TaskStatus::Processing);
        let completed_touch = status.is_terminal();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE tasks SET status = ?1, error_message = ?2,
                        started_at = CASE WHEN ?3 = 1 AND started_at IS NULL THEN ?4 ELSE started_at END,
                        completed_at = CASE WHEN ?5 = 1 THEN ?4 ELSE completed_at END
                     WHERE id = ?6",
                    rusqlite::params![status_str, error_message, started_touch as i64, now, completed_touch as i64, id_str],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn update_task_progress(&self, id: Uuid, stage: &str, progress: u8) -> StoreResult<()> {
        let id_str = id.to_string();
        let stage = stage.to_string();
        let progress = progress as i64;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE tasks SET current_stage = ?1, progress = ?2 WHERE id = ?3",
                    rusqlite::params![stage, progress, id_str],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn increment_retry_count(&self, id: Uuid) -> StoreResult<()> {
        let id_str = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("UPDATE tasks SET retry_count = retry_count + 1 WHERE id = ?1", rusqlite::params![id_str])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delete_task(&self, id: Uuid) -> StoreResult<bool> {
        let id_str = id.to_string();
        let changed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id_str])?))
            .await?;
        Ok(changed > 0)
    }

    pub async fn task_statistics(&self) -> StoreResult<TaskStatistics> {
        let stats = self
            .conn
            .call(|conn| {
                let count = |status: &str| -> rusqlite::Result<u64> {
                    conn.query_row("SELECT COUNT(*) FROM tasks WHERE status = ?1", rusqlite::params![status], |r| r.get(0))
                };
                Ok(TaskStatistics {
                    pending: count("pending")?,
                    queued: count("queued")?,
                    processing: count("processing")?,
                    completed: count("completed")?,
                    failed: count("failed")?,
                    cancelled: count("cancelled")?,
                    timestamp: Utc::now(),
                })
            })
            .await?;
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Insert a new queue row. Idempotent: a conflict on `task_id` is a no-op,
    /// matching the Queue's enqueue contract.
    pub async fn enqueue(&self, entry: &QueueEntry) -> StoreResult<()> {
        let id = entry.id.to_string();
        let task_id = entry.task_id.to_string();
        let user_id = entry.user_id.to_string();
        let priority = entry.priority;
        let status = enum_to_sql(&entry.status);
        let queued_at = entry.queued_at.to_rfc3339();
        let max_attempts = entry.max_attempts;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO task_queue (id, task_id, user_id, priority, status, queued_at, attempts, max_attempts)
                     VALUES (?1,?2,?3,?4,?5,?6,0,?7)
                     ON CONFLICT(task_id) DO NOTHING",
                    rusqlite::params![id, task_id, user_id, priority, status, queued_at, max_attempts],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn queue_length(&self) -> StoreResult<u64> {
        let n = self
            .conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM task_queue WHERE status = 'queued'", [], |r| r.get(0))
                    .map_err(Into::into)
            })
            .await?;
        Ok(n)
    }

    /// Returns candidate queued rows ordered for selection: priority desc,
    /// queued_at asc. Callers are responsible for per-user admission
    /// filtering and for claiming via `try_claim`.
    pub async fn list_queue_candidates(&self, limit: u32) -> StoreResult<Vec<QueueEntry>> {
        let limit = limit as i64;
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, user_id, priority, status, worker_id, queued_at, started_at,
                            completed_at, attempts, max_attempts, last_boosted_at, estimated_duration_sec
                     FROM task_queue WHERE status = 'queued'
                     ORDER BY priority DESC, queued_at ASC LIMIT ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_queue_entry(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    /// Atomically claim a queued entry for `worker_id`. Returns `false` if
    /// another worker already claimed it (re-check lost the race) — the
    /// SQLite analogue of `SELECT ... FOR UPDATE SKIP LOCKED`.
    pub async fn try_claim(&self, entry_id: Uuid, worker_id: &str) -> StoreResult<bool> {
        let id_str = entry_id.to_string();
        let worker_id = worker_id.to_string();
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE task_queue SET status = 'processing', worker_id = ?1, started_at = ?2
                     WHERE id = ?3 AND status = 'queued'",
                    rusqlite::params![worker_id, now, id_str],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn complete_queue_entry(&self, task_id: Uuid) -> StoreResult<()> {
        let task_id_str = task_id.to_string();
        self.conn
            .call(move |conn| Ok(conn.execute("DELETE FROM task_queue WHERE task_id = ?1", rusqlite::params![task_id_str])?))
            .await?;
        Ok(())
    }

    pub async fn fail_queue_entry(&self, task_id: Uuid) -> StoreResult<()> {
        let task_id_str = task_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE task_queue SET status = 'failed', completed_at = ?1 WHERE task_id = ?2",
                    rusqlite::params![now, task_id_str],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Requeue a transiently-failed entry with an attempt counter bump and a
    /// delayed `queued_at` implementing the backoff schedule.
    pub async fn requeue_with_backoff(&self, task_id: Uuid, delay: std::time::Duration) -> StoreResult<()> {
        let task_id_str = task_id.to_string();
        let next_queued_at = (Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()).to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE task_queue SET status = 'queued', attempts = attempts + 1,
                        worker_id = NULL, started_at = NULL, queued_at = ?1
                     WHERE task_id = ?2",
                    rusqlite::params![next_queued_at, task_id_str],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_queue_entry_by_task(&self, task_id: Uuid) -> StoreResult<Option<QueueEntry>> {
        let task_id_str = task_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, user_id, priority, status, worker_id, queued_at, started_at,
                            completed_at, attempts, max_attempts, last_boosted_at, estimated_duration_sec
                     FROM task_queue WHERE task_id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![task_id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_queue_entry(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    /// Boost the priority (capped at 10) of any queued row older than
    /// `threshold` that has not already been boosted within the last
    /// `threshold` window. Returns the number of rows boosted.
    pub async fn boost_stale_priorities(&self, threshold: std::time::Duration) -> StoreResult<u64> {
        let cutoff = (Utc::now() - chrono::Duration::from_std(threshold).unwrap_or_default()).to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE task_queue SET priority = MIN(priority + 1, 10), last_boosted_at = ?1
                     WHERE status = 'queued' AND queued_at < ?2
                       AND (last_boosted_at IS NULL OR last_boosted_at < ?2)",
                    rusqlite::params![now, cutoff],
                )?)
            })
            .await?;
        Ok(n as u64)
    }

    /// Every `processing` queue row at startup is stranded: there can be no
    /// live worker holding it across a restart in this single-process model.
    pub async fn requeue_all_processing(&self, max_attempts_exceeded_msg: &str) -> StoreResult<(u64, u64)> {
        let msg = max_attempts_exceeded_msg.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let requeued = conn.execute(
                    "UPDATE task_queue SET status = 'queued', worker_id = NULL, started_at = NULL,
                        attempts = attempts + 1
                     WHERE status = 'processing' AND attempts + 1 <= max_attempts",
                    [],
                )?;
                let failed = conn.execute(
                    "UPDATE task_queue SET status = 'failed', worker_id = NULL
                     WHERE status = 'processing' AND attempts + 1 > max_attempts",
                    [],
                )?;
                if failed > 0 {
                    conn.execute(
                        "UPDATE tasks SET status = 'failed', error_message = ?1
                         WHERE id IN (SELECT task_id FROM task_queue WHERE status = 'failed')",
                        rusqlite::params![msg],
                    )?;
                }
                Ok((requeued as u64, failed as u64))
            })
            .await?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Issues
    // -----------------------------------------------------------------------

    pub async fn list_issues_for_task(&self, task_id: Uuid) -> StoreResult<Vec<Issue>> {
        let task_id_str = task_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(ISSUE_COLUMNS_SELECT)?;
                let mut rows = stmt.query(rusqlite::params![task_id_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    pub async fn get_issue(&self, id: Uuid) -> StoreResult<Option<Issue>> {
        let id_str = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, issue_type, severity, title, description, original_text,
                            user_impact, reasoning, location_hint, user_feedback, feedback_comment,
                            satisfaction_rating
                     FROM issues WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_issue(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    pub async fn update_issue_feedback(&self, id: Uuid, feedback: IssueFeedback, comment: Option<String>) -> StoreResult<()> {
        let id_str = id.to_string();
        let feedback_str = enum_to_sql(&feedback);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE issues SET user_feedback = ?1, feedback_comment = COALESCE(?2, feedback_comment) WHERE id = ?3",
                    rusqlite::params![feedback_str, comment, id_str],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn update_issue_satisfaction(&self, id: Uuid, rating: u8) -> StoreResult<()> {
        let id_str = id.to_string();
        let rating = rating as i64;
        self.conn
            .call(move |conn| {
                conn.execute("UPDATE issues SET satisfaction_rating = ?1 WHERE id = ?2", rusqlite::params![rating, id_str])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Comment-only edit: never alters `user_feedback`.
    pub async fn update_issue_comment(&self, id: Uuid, comment: &str) -> StoreResult<()> {
        let id_str = id.to_string();
        let comment = comment.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("UPDATE issues SET feedback_comment = ?1 WHERE id = ?2", rusqlite::params![comment, id_str])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // AIOutputs
    // -----------------------------------------------------------------------

    /// Persist one chunk's AI output as soon as it succeeds — the mechanism
    /// that makes the Detect stage resumable across retries and restarts.
    pub async fn insert_ai_output(&self, output: &AIOutput) -> StoreResult<()> {
        let id = output.id.to_string();
        let task_id = output.task_id.to_string();
        let stage = output.stage.clone();
        let chunk_index = output.chunk_index;
        let fingerprint = output.prompt_fingerprint.clone();
        let input_text = output.input_text.clone();
        let raw_output = output.raw_output.clone();
        let issue_drafts_json = output.issue_drafts_json.clone();
        let token_usage = output.token_usage;
        let latency_ms = output.latency_ms;
        let created_at = output.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO ai_outputs (id, task_id, stage, chunk_index, prompt_fingerprint,
                        input_text, raw_output, issue_drafts_json, token_usage, latency_ms, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
                     ON CONFLICT(task_id, stage, chunk_index, prompt_fingerprint) DO NOTHING",
                    rusqlite::params![id, task_id, stage, chunk_index, fingerprint, input_text, raw_output, issue_drafts_json, token_usage, latency_ms, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn find_ai_output_by_fingerprint(
        &self,
        task_id: Uuid,
        stage: &str,
        fingerprint: &str,
    ) -> StoreResult<Option<AIOutput>> {
        let task_id_str = task_id.to_string();
        let stage = stage.to_string();
        let fingerprint = fingerprint.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, stage, chunk_index, prompt_fingerprint, input_text, raw_output,
                            issue_drafts_json, token_usage, latency_ms, created_at
                     FROM ai_outputs WHERE task_id = ?1 AND stage = ?2 AND prompt_fingerprint = ?3",
                )?;
                let mut rows = stmt.query(rusqlite::params![task_id_str, stage, fingerprint])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_ai_output(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }

    pub async fn list_ai_outputs_for_task(&self, task_id: Uuid, stage: &str) -> StoreResult<Vec<AIOutput>> {
        let task_id_str = task_id.to_string();
        let stage = stage.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, stage, chunk_index, prompt_fingerprint, input_text, raw_output,
                            issue_drafts_json, token_usage, latency_ms, created_at
                     FROM ai_outputs WHERE task_id = ?1 AND stage = ?2 ORDER BY chunk_index ASC",
                )?;
                let mut rows = stmt.query(rusqlite::params![task_id_str, stage])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_ai_output(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // TaskLogs
    // -----------------------------------------------------------------------

    pub async fn append_task_log(&self, log: &TaskLog) -> StoreResult<()> {
        let id = log.id.to_string();
        let task_id = log.task_id.to_string();
        let timestamp = log.timestamp.to_rfc3339();
        let level = enum_to_sql(&log.level);
        let module = log.module.clone();
        let stage = log.stage.clone();
        let progress = log.progress.map(|p| p as i64);
        let message = log.message.clone();
        let metadata = log.metadata.as_ref().map(|v| v.to_string());

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO task_logs (id, task_id, timestamp, level, module, stage, progress, message, metadata)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    rusqlite::params![id, task_id, timestamp, level, module, stage, progress, message, metadata],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn load_task_log_history(&self, task_id: Uuid, limit: u32) -> StoreResult<Vec<TaskLog>> {
        let task_id_str = task_id.to_string();
        let limit = limit as i64;
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, timestamp, level, module, stage, progress, message, metadata
                     FROM task_logs WHERE task_id = ?1 ORDER BY timestamp ASC LIMIT ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![task_id_str, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task_log(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // TaskShares
    // -----------------------------------------------------------------------

    pub async fn insert_share(&self, share: &TaskShare) -> StoreResult<()> {
        let id = share.id.to_string();
        let task_id = share.task_id.to_string();
        let shared_by = share.shared_by.to_string();
        let shared_with = share.shared_with.to_string();
        let permission = enum_to_sql(&share.permission);
        let comment = share.comment.clone();
        let created_at = share.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO task_shares (id, task_id, shared_by, shared_with, permission, active, comment, created_at)
                     VALUES (?1,?2,?3,?4,?5,1,?6,?7)",
                    rusqlite::params![id, task_id, shared_by, shared_with, permission, comment, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_active_shares_for_task(&self, task_id: Uuid) -> StoreResult<Vec<TaskShare>> {
        let task_id_str = task_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, shared_by, shared_with, permission, active, comment, created_at, revoked_at
                     FROM task_shares WHERE task_id = ?1 AND active = 1",
                )?;
                let mut rows = stmt.query(rusqlite::params![task_id_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task_share(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    pub async fn revoke_share(&self, id: Uuid) -> StoreResult<()> {
        let id_str = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute("UPDATE task_shares SET active = 0, revoked_at = ?1 WHERE id = ?2", rusqlite::params![now, id_str])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Atomic commit — Pipeline terminal write
    // -----------------------------------------------------------------------

    /// Insert all accumulated issues and transition the task to `completed`
    /// in a single transaction. Any failure rolls back the whole batch; the
    /// task remains in whatever state it was in before the call.
    pub async fn commit_batch(&self, task_id: Uuid, issues: Vec<Issue>) -> StoreResult<()> {
        let task_id_str = task_id.to_string();
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for issue in &issues {
                    tx.execute(
                        "INSERT INTO issues (id, task_id, issue_type, severity, title, description,
                            original_text, user_impact, reasoning, location_hint, user_feedback, feedback_comment, satisfaction_rating)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,'unset',NULL,NULL)",
                        rusqlite::params![
                            issue.id.to_string(),
                            issue.task_id.to_string(),
                            enum_to_sql(&issue.issue_type),
                            enum_to_sql(&issue.severity),
                            issue.title,
                            issue.description,
                            issue.original_text,
                            issue.user_impact,
                            issue.reasoning,
                            issue.location_hint,
                        ],
                    )?;
                }
                tx.execute(
                    "UPDATE tasks SET status = 'completed', progress = 100, completed_at = ?1 WHERE id = ?2",
                    rusqlite::params![now, task_id_str],
                )?;
                tx.execute("DELETE FROM task_queue WHERE task_id = ?1", rusqlite::params![task_id_str])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // RecoveryManager support
    // -----------------------------------------------------------------------

    /// Tasks marked `processing` with no matching queue row — re-enqueue at
    /// the default priority.
    pub async fn reconcile_orphan_tasks(&self, default_priority: i32, max_attempts: i32) -> StoreResult<u64> {
        let n = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT t.id, t.owner_id FROM tasks t
                     LEFT JOIN task_queue q ON q.task_id = t.id
                     WHERE t.status = 'processing' AND q.id IS NULL",
                )?;
                let mut rows = stmt.query([])?;
                let mut orphans = Vec::new();
                while let Some(row) = rows.next()? {
                    let task_id: String = row.get(0)?;
                    let owner_id: String = row.get(1)?;
                    orphans.push((task_id, owner_id));
                }
                let now = Utc::now().to_rfc3339();
                for (task_id, owner_id) in &orphans {
                    conn.execute(
                        "INSERT INTO task_queue (id, task_id, user_id, priority, status, queued_at, attempts, max_attempts)
                         VALUES (?1,?2,?3,?4,'queued',?5,0,?6)",
                        rusqlite::params![Uuid::new_v4().to_string(), task_id, owner_id, default_priority, now, max_attempts],
                    )?;
                    conn.execute("UPDATE tasks SET status = 'queued' WHERE id = ?1", rusqlite::params![task_id])?;
                }
                Ok(orphans.len() as u64)
            })
            .await?;
        Ok(n)
    }

    /// Delete child rows whose parent task no longer exists. Idempotent and
    /// safe to run on every boot even though the live schema already
    /// declares `ON DELETE CASCADE` — this cleans up any rows written before
    /// that constraint existed.
    pub async fn sweep_orphan_children(&self) -> StoreResult<u64> {
        let n = self
            .conn
            .call(|conn| {
                let mut total = 0u64;
                total += conn.execute("DELETE FROM issues WHERE task_id NOT IN (SELECT id FROM tasks)", [])? as u64;
                total += conn.execute("DELETE FROM ai_outputs WHERE task_id NOT IN (SELECT id FROM tasks)", [])? as u64;
                total += conn.execute("DELETE FROM task_logs WHERE task_id NOT IN (SELECT id FROM tasks)", [])? as u64;
                total += conn.execute("DELETE FROM task_shares WHERE task_id NOT IN (SELECT id FROM tasks)", [])? as u64;
                Ok(total)
            })
            .await?;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

const TASK_COLUMNS_SELECT: &str = "SELECT id, owner_id, file_info_id, ai_model_id, title, status, progress,
    current_stage, created_at, started_at, completed_at, error_message, retry_count
    FROM tasks WHERE id = ?1";

const ISSUE_COLUMNS_SELECT: &str = "SELECT id, task_id, issue_type, severity, title, description, original_text,
    user_impact, reasoning, location_hint, user_feedback, feedback_comment, satisfaction_rating
    FROM issues WHERE task_id = ?1";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let role_str: String = row.get(4)?;
    let created_at_str: String = row.get(6)?;
    Ok(User {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        external_uid: row.get(1)?,
        display_name: row.get(2)?,
        email: row.get(3)?,
        role: enum_from_sql(&role_str),
        max_concurrent_tasks: row.get(5)?,
        created_at: parse_rfc3339(&created_at_str),
    })
}

fn row_to_ai_model(row: &rusqlite::Row<'_>) -> rusqlite::Result<AIModel> {
    let id_str: String = row.get(0)?;
    let config_str: String = row.get(3)?;
    let is_default: i64 = row.get(4)?;
    Ok(AIModel {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        key: row.get(1)?,
        provider: row.get(2)?,
        config: serde_json::from_str(&config_str).expect("valid json"),
        is_default: is_default != 0,
    })
}

fn row_to_file_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileInfo> {
    let id_str: String = row.get(0)?;
    let created_at_str: String = row.get(6)?;
    Ok(FileInfo {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        sha256: row.get(1)?,
        stored_path: row.get(2)?,
        original_name: row.get(3)?,
        size_bytes: row.get(4)?,
        mime_type: row.get(5)?,
        created_at: parse_rfc3339(&created_at_str),
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let id_str: String = row.get(0)?;
    let owner_id_str: String = row.get(1)?;
    let file_info_id_str: String = row.get(2)?;
    let ai_model_id_str: String = row.get(3)?;
    let status_str: String = row.get(5)?;
    let progress: i64 = row.get(6)?;
    let created_at_str: String = row.get(8)?;
    let started_at_str: Option<String> = row.get(9)?;
    let completed_at_str: Option<String> = row.get(10)?;
    let retry_count: i64 = row.get(12)?;

    Ok(Task {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        owner_id: Uuid::parse_str(&owner_id_str).expect("valid uuid"),
        file_info_id: Uuid::parse_str(&file_info_id_str).expect("valid uuid"),
        ai_model_id: Uuid::parse_str(&ai_model_id_str).expect("valid uuid"),
        title: row.get(4)?,
        status: enum_from_sql(&status_str),
        progress: progress as u8,
        current_stage: row.get(7)?,
        created_at: parse_rfc3339(&created_at_str),
        started_at: parse_rfc3339_opt(started_at_str),
        completed_at: parse_rfc3339_opt(completed_at_str),
        error_message: row.get(11)?,
        retry_count: retry_count as i32,
    })
}

fn row_to_queue_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
    let id_str: String = row.get(0)?;
    let task_id_str: String = row.get(1)?;
    let user_id_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    let queued_at_str: String = row.get(6)?;
    let started_at_str: Option<String> = row.get(7)?;
    let completed_at_str: Option<String> = row.get(8)?;
    let last_boosted_at_str: Option<String> = row.get(11)?;

    Ok(QueueEntry {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        task_id: Uuid::parse_str(&task_id_str).expect("valid uuid"),
        user_id: Uuid::parse_str(&user_id_str).expect("valid uuid"),
        priority: row.get(3)?,
        status: enum_from_sql::<QueueStatus>(&status_str),
        worker_id: row.get(5)?,
        queued_at: parse_rfc3339(&queued_at_str),
        started_at: parse_rfc3339_opt(started_at_str),
        completed_at: parse_rfc3339_opt(completed_at_str),
        attempts: row.get(9)?,
        max_attempts: row.get(10)?,
        last_boosted_at: parse_rfc3339_opt(last_boosted_at_str),
        estimated_duration_sec: row.get(12)?,
    })
}

fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    let id_str: String = row.get(0)?;
    let task_id_str: String = row.get(1)?;
    let issue_type_str: String = row.get(2)?;
    let severity_str: String = row.get(3)?;
    let user_feedback_str: String = row.get(10)?;
    let satisfaction: Option<i64> = row.get(12)?;

    Ok(Issue {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        task_id: Uuid::parse_str(&task_id_str).expect("valid uuid"),
        issue_type: enum_from_sql::<IssueType>(&issue_type_str),
        severity: enum_from_sql::<IssueSeverity>(&severity_str),
        title: row.get(4)?,
        description: row.get(5)?,
        original_text: row.get(6)?,
        user_impact: row.get(7)?,
        reasoning: row.get(8)?,
        location_hint: row.get(9)?,
        user_feedback: enum_from_sql::<IssueFeedback>(&user_feedback_str),
        feedback_comment: row.get(11)?,
        satisfaction_rating: satisfaction.map(|v| v as u8),
    })
}

fn row_to_ai_output(row: &rusqlite::Row<'_>) -> rusqlite::Result<AIOutput> {
    let id_str: String = row.get(0)?;
    let task_id_str: String = row.get(1)?;
    let created_at_str: String = row.get(10)?;
    Ok(AIOutput {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        task_id: Uuid::parse_str(&task_id_str).expect("valid uuid"),
        stage: row.get(2)?,
        chunk_index: row.get(3)?,
        prompt_fingerprint: row.get(4)?,
        input_text: row.get(5)?,
        raw_output: row.get(6)?,
        issue_drafts_json: row.get(7)?,
        token_usage: row.get(8)?,
        latency_ms: row.get(9)?,
        created_at: parse_rfc3339(&created_at_str),
    })
}

fn row_to_task_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskLog> {
    let id_str: String = row.get(0)?;
    let task_id_str: String = row.get(1)?;
    let timestamp_str: String = row.get(2)?;
    let level_str: String = row.get(3)?;
    let progress: Option<i64> = row.get(6)?;
    let metadata_str: Option<String> = row.get(8)?;
    Ok(TaskLog {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        task_id: Uuid::parse_str(&task_id_str).expect("valid uuid"),
        timestamp: parse_rfc3339(&timestamp_str),
        level: enum_from_sql::<LogLevel>(&level_str),
        module: row.get(4)?,
        stage: row.get(5)?,
        progress: progress.map(|p| p as u8),
        message: row.get(7)?,
        metadata: metadata_str.map(|s| serde_json::from_str(&s).expect("valid json")),
    })
}

fn row_to_task_share(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskShare> {
    let id_str: String = row.get(0)?;
    let task_id_str: String = row.get(1)?;
    let shared_by_str: String = row.get(2)?;
    let shared_with_str: String = row.get(3)?;
    let permission_str: String = row.get(4)?;
    let active: i64 = row.get(5)?;
    let created_at_str: String = row.get(7)?;
    let revoked_at_str: Option<String> = row.get(8)?;
    Ok(TaskShare {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        task_id: Uuid::parse_str(&task_id_str).expect("valid uuid"),
        shared_by: Uuid::parse_str(&shared_by_str).expect("valid uuid"),
        shared_with: Uuid::parse_str(&shared_with_str).expect("valid uuid"),
        permission: enum_from_sql::<SharePermission>(&permission_str),
        active: active != 0,
        comment: row.get(6)?,
        created_at: parse_rfc3339(&created_at_str),
        revoked_at: parse_rfc3339_opt(revoked_at_str),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserRole;

    async fn seed_task(store: &Store) -> (Task, Uuid) {
        let user = User::new("ext-1", "Ada", "ada@example.com", UserRole::User);
        store.upsert_user(&user).await.unwrap();
        let model = AIModel {
            id: Uuid::new_v4(),
            key: "stub".into(),
            provider: "local".into(),
            config: serde_json::json!({}),
            is_default: true,
        };
        store.upsert_ai_model(&model).await.unwrap();
        let file = FileInfo {
            id: Uuid::new_v4(),
            sha256: "deadbeef".into(),
            stored_path: "data/uploads/de/deadbeef".into(),
            original_name: "doc.md".into(),
            size_bytes: 42,
            mime_type: "text/markdown".into(),
            created_at: Utc::now(),
        };
        store.upsert_file_info(&file).await.unwrap();
        let task = Task::new(user.id, file.id, model.id, "Review me");
        store.insert_task(&task).await.unwrap();
        (task, user.id)
    }

    #[tokio::test]
    async fn insert_and_get_task_roundtrips() {
        let store = Store::new_in_memory().await.unwrap();
        let (task, _) = seed_task(&store).await;
        let fetched = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_task_id() {
        let store = Store::new_in_memory().await.unwrap();
        let (task, user_id) = seed_task(&store).await;
        let entry = QueueEntry::new(task.id, user_id, 5, 3);
        store.enqueue(&entry).await.unwrap();
        store.enqueue(&entry).await.unwrap();
        assert_eq!(store.queue_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn try_claim_is_exclusive() {
        let store = Store::new_in_memory().await.unwrap();
        let (task, user_id) = seed_task(&store).await;
        let entry = QueueEntry::new(task.id, user_id, 5, 3);
        store.enqueue(&entry).await.unwrap();

        let first = store.try_claim(entry.id, "worker-a").await.unwrap();
        let second = store.try_claim(entry.id, "worker-b").await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn commit_batch_persists_issues_and_completes_task() {
        let store = Store::new_in_memory().await.unwrap();
        let (task, _) = seed_task(&store).await;
        let issue = Issue {
            id: Uuid::new_v4(),
            task_id: task.id,
            issue_type: IssueType::Grammar,
            severity: IssueSeverity::Low,
            title: "typo".into(),
            description: "minor typo".into(),
            original_text: None,
            user_impact: None,
            reasoning: None,
            location_hint: None,
            user_feedback: IssueFeedback::Unset,
            feedback_comment: None,
            satisfaction_rating: None,
        };
        store.commit_batch(task.id, vec![issue]).await.unwrap();

        let fetched = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(store.list_issues_for_task(task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn comment_only_edit_preserves_feedback() {
        let store = Store::new_in_memory().await.unwrap();
        let (task, _) = seed_task(&store).await;
        let issue_id = Uuid::new_v4();
        let issue = Issue {
            id: issue_id,
            task_id: task.id,
            issue_type: IssueType::Logic,
            severity: IssueSeverity::Medium,
            title: "off by one".into(),
            description: "...".into(),
            original_text: None,
            user_impact: None,
            reasoning: None,
            location_hint: None,
            user_feedback: IssueFeedback::Unset,
            feedback_comment: None,
            satisfaction_rating: None,
        };
        store.commit_batch(task.id, vec![issue]).await.unwrap();
        store.update_issue_feedback(issue_id, IssueFeedback::Accept, None).await.unwrap();
        store.update_issue_comment(issue_id, "looks fine now").await.unwrap();

        let fetched = store.get_issue(issue_id).await.unwrap().unwrap();
        assert_eq!(fetched.user_feedback, IssueFeedback::Accept);
        assert_eq!(fetched.feedback_comment.as_deref(), Some("looks fine now"));
    }

    #[tokio::test]
    async fn requeue_all_processing_requeues_stranded_rows() {
        let store = Store::new_in_memory().await.unwrap();
        let (task, user_id) = seed_task(&store).await;
        let entry = QueueEntry::new(task.id, user_id, 5, 3);
        store.enqueue(&entry).await.unwrap();
        store.try_claim(entry.id, "worker-a").await.unwrap();

        let (requeued, failed) = store.requeue_all_processing("exceeded_retries_after_restart").await.unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(failed, 0);
    }
}
