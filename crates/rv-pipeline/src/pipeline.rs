use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rv_core::store::Store;
use rv_core::types::{AIModel, AIOutput, FileInfo, Issue, LogLevel, Task, TaskLog};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ai_clients::LocalStubClient;
use crate::error::PipelineOutcome;
use crate::fingerprint::prompt_fingerprint;
use crate::merge::{merge, Chunk};
use crate::parsers::DispatchParser;
use crate::structure::structure;
use crate::traits::{AIClient, IssueDraft, Parser, ProgressSink};

pub struct PipelineConfig {
    pub max_file_size_bytes: u64,
    pub max_chars_per_chunk: usize,
    pub overlap_chars: usize,
    pub per_task_detect_fanout: usize,
    pub progress_write_interval: Duration,
}

impl From<&rv_core::config::PipelineConfig> for PipelineConfig {
    fn from(cfg: &rv_core::config::PipelineConfig) -> Self {
        Self {
            max_file_size_bytes: cfg.max_file_size_bytes,
            max_chars_per_chunk: cfg.max_chars_per_chunk,
            overlap_chars: cfg.overlap_chars,
            per_task_detect_fanout: cfg.per_task_detect_fanout,
            progress_write_interval: Duration::from_millis(cfg.progress_write_interval_ms),
        }
    }
}

/// Shared dependencies a Pipeline run needs: storage, the AI provider, and
/// somewhere to publish live log/progress output.
pub struct Pipeline {
    store: Arc<Store>,
    ai_client: Arc<dyn AIClient>,
    parser: Arc<dyn Parser>,
    sink: Arc<dyn ProgressSink>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(store: Arc<Store>, ai_client: Arc<dyn AIClient>, sink: Arc<dyn ProgressSink>, config: PipelineConfig) -> Self {
        Self { store, ai_client, parser: Arc::new(DispatchParser { max_file_size_bytes: config.max_file_size_bytes }), sink, config }
    }

    /// A pipeline wired to the deterministic local stub client, for tests
    /// and for deployments with no provider key configured.
    pub fn with_stub(store: Arc<Store>, sink: Arc<dyn ProgressSink>, config: PipelineConfig) -> Self {
        Self::new(store, Arc::new(LocalStubClient), sink, config)
    }

    async fn log(&self, task_id: Uuid, level: LogLevel, stage: &str, progress: Option<u8>, message: impl Into<String>) {
        self.sink
            .emit(TaskLog {
                id: Uuid::new_v4(),
                task_id,
                timestamp: Utc::now(),
                level,
                module: "pipeline".into(),
                stage: Some(stage.to_string()),
                progress,
                message: message.into(),
                metadata: None,
            })
            .await;
    }

    /// Runs Parse -> Structure -> Merge -> Detect for one task, persisting
    /// results as it goes, then commits the final batch. `cancel` is
    /// checked at each stage boundary; in-flight AI calls within Detect are
    /// allowed to finish once started.
    pub async fn run(&self, task: &Task, file: &FileInfo, model: &AIModel, file_bytes: Vec<u8>, cancel: CancellationToken) -> PipelineOutcome {
        if cancel.is_cancelled() {
            return PipelineOutcome::Fatal("cancelled before start".into());
        }

        // --- Parse ---
        self.log(task.id, LogLevel::Info, "parse", Some(0), "parsing document").await;
        let text = match self.parser.parse(&file_bytes, &file.mime_type) {
            Ok(t) => t,
            Err(e) => {
                self.log(task.id, LogLevel::Error, "parse", None, format!("parse failed: {e}")).await;
                return e.into();
            }
        };
        if let Err(e) = self.store.update_task_progress(task.id, "parse", 25).await {
            warn!(task_id = %task.id, error = %e, "failed to persist progress");
        }

        if cancel.is_cancelled() {
            return PipelineOutcome::Fatal("cancelled after parse".into());
        }

        // --- Structure ---
        self.log(task.id, LogLevel::Info, "structure", Some(25), "structuring document").await;
        let doc = structure(&text);
        if let Err(e) = self.store.update_task_progress(task.id, "structure", 50).await {
            warn!(task_id = %task.id, error = %e, "failed to persist progress");
        }

        if cancel.is_cancelled() {
            return PipelineOutcome::Fatal("cancelled after structure".into());
        }

        // --- Merge ---
        self.log(task.id, LogLevel::Info, "merge", Some(50), "chunking document").await;
        let chunks = merge(&doc, self.config.max_chars_per_chunk, self.config.overlap_chars);
        if let Err(e) = self.store.update_task_progress(task.id, "merge", 75).await {
            warn!(task_id = %task.id, error = %e, "failed to persist progress");
        }

        if cancel.is_cancelled() {
            return PipelineOutcome::Fatal("cancelled after merge".into());
        }

        // --- Detect ---
        self.log(task.id, LogLevel::Info, "detect", Some(75), format!("analyzing {} chunks", chunks.len())).await;
        match self.detect(task, model, &chunks, &cancel).await {
            Ok(issues) => {
                if let Err(e) = self.store.commit_batch(task.id, issues).await {
                    warn!(task_id = %task.id, error = %e, "commit_batch failed");
                    return PipelineOutcome::Transient(format!("commit failed: {e}"));
                }
                self.log(task.id, LogLevel::Info, "detect", Some(100), "analysis complete").await;
                PipelineOutcome::Success
            }
            Err(outcome) => outcome,
        }
    }

    /// Runs `AIClient::analyze` over every chunk with bounded concurrency,
    /// skipping chunks that already have a persisted output for this
    /// model (resumability across retries/restarts).
    async fn detect(
        &self,
        task: &Task,
        model: &AIModel,
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> Result<Vec<Issue>, PipelineOutcome> {
        let fanout = self.config.per_task_detect_fanout.max(1);
        let results = stream::iter(chunks.iter().cloned().map(|chunk| {
            let task_id = task.id;
            let model = model.clone();
            let store = self.store.clone();
            let ai_client = self.ai_client.clone();
            async move { analyze_chunk(store, ai_client, task_id, chunk, model).await }
        }))
        .buffer_unordered(fanout)
        .collect::<Vec<_>>()
        .await;

        if cancel.is_cancelled() {
            return Err(PipelineOutcome::Fatal("cancelled during detect".into()));
        }

        let mut issues = Vec::new();
        for result in results {
            match result {
                Ok(mut chunk_issues) => issues.append(&mut chunk_issues),
                Err(outcome) => return Err(outcome),
            }
        }
        Ok(issues)
    }
}

async fn analyze_chunk(
    store: Arc<Store>,
    ai_client: Arc<dyn AIClient>,
    task_id: Uuid,
    chunk: Chunk,
    model: AIModel,
) -> Result<Vec<Issue>, PipelineOutcome> {
    let fingerprint = prompt_fingerprint("detect", &chunk.text, &model.key);

    if let Ok(Some(existing)) = store.find_ai_output_by_fingerprint(task_id, "detect", &fingerprint).await {
        info!(task_id = %task_id, chunk = chunk.index, "reusing cached ai output");
        return Ok(drafts_from_raw_output(task_id, &existing));
    }

    let analysis = ai_client.analyze(&chunk.text, &model).await.map_err(PipelineOutcome::from)?;
    let issue_drafts_json = serde_json::to_string(&analysis.issues).unwrap_or_else(|_| "[]".into());

    let output = AIOutput {
        id: Uuid::new_v4(),
        task_id,
        stage: "detect".into(),
        chunk_index: chunk.index,
        prompt_fingerprint: fingerprint,
        input_text: chunk.text.clone(),
        raw_output: analysis.raw_output.clone(),
        issue_drafts_json,
        token_usage: analysis.token_usage,
        latency_ms: None,
        created_at: Utc::now(),
    };
    store.insert_ai_output(&output).await.map_err(|e| PipelineOutcome::Transient(e.to_string()))?;

    Ok(analysis.issues.into_iter().map(|draft| issue_from_draft(task_id, draft)).collect())
}

fn issue_from_draft(task_id: Uuid, draft: IssueDraft) -> Issue {
    Issue {
        id: Uuid::new_v4(),
        task_id,
        issue_type: draft.issue_type,
        severity: draft.severity,
        title: draft.title,
        description: draft.description,
        original_text: draft.original_text,
        user_impact: draft.user_impact,
        reasoning: draft.reasoning,
        location_hint: draft.location_hint,
        user_feedback: rv_core::types::IssueFeedback::Unset,
        feedback_comment: None,
        satisfaction_rating: None,
    }
}

/// Reconstructs the issues a cache-hit chunk produced the first time it was
/// analyzed, from the structured drafts persisted alongside its `AIOutput`
/// row. Without this, a retry that hits the fingerprint cache would silently
/// drop that chunk's issues -- they were never re-derivable from
/// `raw_output` alone, which is unstructured provider text.
fn drafts_from_raw_output(task_id: Uuid, existing: &AIOutput) -> Vec<Issue> {
    let drafts: Vec<IssueDraft> = serde_json::from_str(&existing.issue_drafts_json).unwrap_or_else(|e| {
        warn!(task_id = %task_id, error = %e, "failed to decode cached issue drafts, treating chunk as issue-free");
        Vec::new()
    });
    drafts.into_iter().map(|draft| issue_from_draft(task_id, draft)).collect()
}

/// Test-only `AIClient` that fails the first call for any input containing
/// `flaky_marker`, then succeeds on every later call for that same input.
/// Used to simulate a Detect-stage pass where some chunks already succeeded
/// before a different chunk hit a transient provider error.
#[cfg(test)]
struct FlakyOnceClient {
    flaky_marker: &'static str,
    attempts: std::sync::Mutex<std::collections::HashMap<String, usize>>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl AIClient for FlakyOnceClient {
    async fn analyze(&self, input: &str, model: &AIModel) -> Result<crate::traits::AIAnalysis, crate::error::AIClientError> {
        if input.contains(self.flaky_marker) {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(input.to_string()).or_insert(0);
            *count += 1;
            if *count == 1 {
                return Err(crate::error::AIClientError::Transient("simulated provider hiccup".into()));
            }
        }
        LocalStubClient.analyze(input, model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NullSink;
    use chrono::Utc as ChronoUtc;
    use rv_core::types::{Task, TaskStatus, User, UserRole};
    use serde_json::json;

    async fn seeded_store_and_task() -> (Arc<Store>, Task, AIModel, FileInfo) {
        let store = Arc::new(Store::new_in_memory().await.unwrap());
        let user = User::new("ext", "name", "e@example.com", UserRole::User);
        store.upsert_user(&user).await.unwrap();
        let model = AIModel { id: Uuid::new_v4(), key: "stub".into(), provider: "local".into(), config: json!({}), is_default: true };
        store.upsert_ai_model(&model).await.unwrap();
        let file = FileInfo {
            id: Uuid::new_v4(),
            sha256: "abc".into(),
            stored_path: "p".into(),
            original_name: "doc.md".into(),
            size_bytes: 10,
            mime_type: "text/markdown".into(),
            created_at: ChronoUtc::now(),
        };
        store.upsert_file_info(&file).await.unwrap();
        let task = Task::new(user.id, file.id, model.id, "t");
        store.insert_task(&task).await.unwrap();
        (store, task, model, file)
    }

    #[tokio::test]
    async fn successful_run_completes_task_and_persists_issues() {
        let (store, task, model, file) = seeded_store_and_task().await;
        let pipeline = Pipeline::with_stub(
            store.clone(),
            Arc::new(NullSink),
            PipelineConfig { max_file_size_bytes: 1_000_000, max_chars_per_chunk: 4000, overlap_chars: 200, per_task_detect_fanout: 4, progress_write_interval: Duration::from_millis(500) },
        );

        let outcome = pipeline.run(&task, &file, &model, b"a document with  a double space".to_vec(), CancellationToken::new()).await;
        assert!(matches!(outcome, PipelineOutcome::Success));

        let fetched = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(store.list_issues_for_task(task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_format_is_fatal() {
        let (store, task, model, mut file) = seeded_store_and_task().await;
        file.mime_type = "application/pdf".into();
        let pipeline = Pipeline::with_stub(
            store.clone(),
            Arc::new(NullSink),
            PipelineConfig { max_file_size_bytes: 1_000_000, max_chars_per_chunk: 4000, overlap_chars: 200, per_task_detect_fanout: 4, progress_write_interval: Duration::from_millis(500) },
        );
        let outcome = pipeline.run(&task, &file, &model, b"%PDF".to_vec(), CancellationToken::new()).await;
        assert!(matches!(outcome, PipelineOutcome::Fatal(_)));
    }

    #[tokio::test]
    async fn rerun_skips_cached_chunk_outputs() {
        let (store, task, model, file) = seeded_store_and_task().await;
        let pipeline = Pipeline::with_stub(
            store.clone(),
            Arc::new(NullSink),
            PipelineConfig { max_file_size_bytes: 1_000_000, max_chars_per_chunk: 4000, overlap_chars: 200, per_task_detect_fanout: 4, progress_write_interval: Duration::from_millis(500) },
        );
        let bytes = b"plain text, no doubles".to_vec();
        pipeline.run(&task, &file, &model, bytes.clone(), CancellationToken::new()).await;
        let outputs_before = store.list_ai_outputs_for_task(task.id, "detect").await.unwrap().len();

        // Re-run against the same task id; the fingerprint already exists so
        // no new ai_outputs row should be inserted.
        pipeline.run(&task, &file, &model, bytes, CancellationToken::new()).await;
        let outputs_after = store.list_ai_outputs_for_task(task.id, "detect").await.unwrap().len();
        assert_eq!(outputs_before, outputs_after);
    }

    #[tokio::test]
    async fn retry_after_partial_failure_recovers_every_chunks_issues() {
        let (store, task, model, file) = seeded_store_and_task().await;
        let ai_client = Arc::new(FlakyOnceClient {
            flaky_marker: "RETRYME",
            attempts: std::sync::Mutex::new(std::collections::HashMap::new()),
        });
        let pipeline = Pipeline::new(
            store.clone(),
            ai_client,
            Arc::new(NullSink),
            PipelineConfig { max_file_size_bytes: 1_000_000, max_chars_per_chunk: 30, overlap_chars: 0, per_task_detect_fanout: 1, progress_write_interval: Duration::from_millis(500) },
        );

        // Two 30-char chunks: the first has a double-space issue and always
        // succeeds; the second also has one but fails transiently on its
        // first analysis attempt.
        let chunk_one = format!("aa  bb{}", "x".repeat(24));
        let chunk_two = format!("RETRYME cc  dd{}", "y".repeat(16));
        let bytes = format!("{chunk_one}{chunk_two}").into_bytes();

        let first = pipeline.run(&task, &file, &model, bytes.clone(), CancellationToken::new()).await;
        assert!(matches!(first, PipelineOutcome::Transient(_)));
        assert_eq!(store.list_issues_for_task(task.id).await.unwrap().len(), 0);

        let second = pipeline.run(&task, &file, &model, bytes, CancellationToken::new()).await;
        assert!(matches!(second, PipelineOutcome::Success));
        assert_eq!(store.list_issues_for_task(task.id).await.unwrap().len(), 2);
    }
}
