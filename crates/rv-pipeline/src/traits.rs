use async_trait::async_trait;
use rv_core::types::AIModel;
use serde::{Deserialize, Serialize};

use crate::error::{AIClientError, ParseError, ReporterError};
use rv_core::types::{Issue, Task};

/// Converts raw uploaded bytes into plain text. Implementations are pure —
/// no I/O, no network calls — so the Parse stage stays synchronous.
pub trait Parser: Send + Sync {
    fn parse(&self, bytes: &[u8], mime_type: &str) -> Result<String, ParseError>;
}

/// One AI-provider round trip over a single chunk of text.
#[async_trait]
pub trait AIClient: Send + Sync {
    async fn analyze(&self, input: &str, model: &AIModel) -> Result<AIAnalysis, AIClientError>;
}

/// Result of one `AIClient::analyze` call: the raw provider response plus
/// the issues the caller should persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIAnalysis {
    pub raw_output: String,
    pub token_usage: Option<i64>,
    pub issues: Vec<IssueDraft>,
}

/// An issue as proposed by an `AIClient`, before it is assigned an id and
/// attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDraft {
    pub issue_type: rv_core::types::IssueType,
    pub severity: rv_core::types::IssueSeverity,
    pub title: String,
    pub description: String,
    pub original_text: Option<String>,
    pub user_impact: Option<String>,
    pub reasoning: Option<String>,
    pub location_hint: Option<String>,
}

/// Renders a completed task's issues into a downloadable report.
pub trait Reporter: Send + Sync {
    fn render(&self, task: &Task, issues: &[Issue]) -> Result<Vec<u8>, ReporterError>;
    fn content_type(&self) -> &'static str;
}

/// Sink for the Pipeline's progress and log output. Kept as a trait rather
/// than a direct dependency on the log bus so this crate doesn't have to
/// depend on the HTTP/WebSocket layer that owns it.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, entry: rv_core::types::TaskLog);
}

/// A `ProgressSink` that drops everything, for tests and standalone runs.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _entry: rv_core::types::TaskLog) {}
}
