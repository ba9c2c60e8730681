//! Fixed-size pool of workers pulling tasks off the Queue and running them
//! through the Pipeline, bounded by the Governor's admission slots.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rv_core::config::{Config, WorkerConfig};
use rv_core::store::Store;
use rv_core::types::{TaskLog, TaskStatus};
use rv_harness::governor::ResourceGovernor;
use rv_harness::shutdown::ShutdownSignal;
use rv_pipeline::traits::{AIClient, ProgressSink};
use rv_pipeline::{Pipeline, PipelineConfig, PipelineOutcome};
use rv_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::queue::Queue;

/// Bridges the Pipeline's `ProgressSink` trait to the bridge crate's log bus
/// without this crate depending on the HTTP layer's request types.
pub struct LogBusSink {
    log_bus: Arc<rv_bridge::log_bus::LogBus>,
}

impl LogBusSink {
    pub fn new(log_bus: Arc<rv_bridge::log_bus::LogBus>) -> Self {
        Self { log_bus }
    }
}

#[async_trait]
impl ProgressSink for LogBusSink {
    async fn emit(&self, entry: TaskLog) {
        self.log_bus.publish_log(entry.task_id, entry.level, entry.module, entry.stage.clone(), entry.message, entry.metadata);
        if let Some(progress) = entry.progress {
            self.log_bus.publish_progress(entry.task_id, progress, entry.stage);
        }
    }
}

pub struct WorkerPool {
    store: Arc<Store>,
    queue: Arc<Queue>,
    governor: Arc<ResourceGovernor>,
    log_bus: Arc<rv_bridge::log_bus::LogBus>,
    metrics: Arc<Metrics>,
    ai_client: Arc<dyn AIClient>,
    pipeline_config: rv_core::config::PipelineConfig,
    worker_config: WorkerConfig,
    shutdown: ShutdownSignal,
}

impl WorkerPool {
    pub fn new(
        store: Arc<Store>,
        queue: Arc<Queue>,
        governor: Arc<ResourceGovernor>,
        log_bus: Arc<rv_bridge::log_bus::LogBus>,
        metrics: Arc<Metrics>,
        ai_client: Arc<dyn AIClient>,
        config: &Config,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            queue,
            governor,
            log_bus,
            metrics,
            ai_client,
            pipeline_config: config.pipeline.clone(),
            worker_config: config.worker.clone(),
            shutdown,
        }
    }

    /// Spawns `worker_pool_size` independent worker loops, each registered
    /// against `shutdown` for cooperative drain.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_config.worker_pool_size)
            .map(|idx| {
                let pool = self.clone();
                let worker_id = format!("worker-{idx}");
                tokio::spawn(async move { pool.worker_loop(worker_id).await })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: String) {
        let mut shutdown_rx = self.shutdown.subscribe();
        info!(worker_id = %worker_id, "worker started");

        loop {
            if self.shutdown.is_shutting_down() {
                break;
            }

            let claimed = match self.queue.claim_next(&worker_id).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    error!(worker_id = %worker_id, error = %err, "failed to poll queue");
                    None
                }
            };

            match claimed {
                Some(entry) => {
                    self.process_entry_isolated(&worker_id, entry).await;
                }
                None => {
                    let backoff = self.idle_backoff();
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        }

        info!(worker_id = %worker_id, "worker draining");
    }

    /// Runs `process_entry` on its own task so a panic there can't take down
    /// the worker's long-lived loop. A caught panic is logged at ERROR and
    /// the claimed entry is marked `failed`; the loop keeps polling.
    async fn process_entry_isolated(self: &Arc<Self>, worker_id: &str, entry: rv_core::types::QueueEntry) {
        let task_id = entry.task_id;
        let attempts = entry.attempts;
        let pool = self.clone();
        let worker_id_owned = worker_id.to_string();

        let handle = tokio::spawn(async move { pool.process_entry(&worker_id_owned, entry).await });

        if let Err(join_err) = handle.await {
            if join_err.is_panic() {
                error!(worker_id, %task_id, error = %join_err, "worker task panicked while processing entry");
                self.fail_task(task_id, attempts, "worker task panicked").await;
            } else {
                warn!(worker_id, %task_id, "worker task for entry was cancelled");
            }
        }
    }

    fn idle_backoff(&self) -> Duration {
        let min = self.worker_config.idle_backoff_min_ms;
        let max = self.worker_config.idle_backoff_max_ms.max(min + 1);
        let millis = rand::thread_rng().gen_range(min..max);
        Duration::from_millis(millis)
    }

    async fn process_entry(&self, worker_id: &str, entry: rv_core::types::QueueEntry) {
        let task_id = entry.task_id;

        let task = match self.store.get_task(task_id).await {
            Ok(Some(t)) => t,
            _ => {
                warn!(%task_id, "claimed queue entry has no matching task, dropping");
                let _ = self.queue.fail(task_id).await;
                return;
            }
        };
        let file = match self.store.get_file_info(task.file_info_id).await {
            Ok(Some(f)) => f,
            _ => {
                self.fail_task(task_id, entry.attempts, "missing file_info for task").await;
                return;
            }
        };
        let model = match self.store.get_ai_model(task.ai_model_id).await {
            Ok(Some(m)) => m,
            _ => {
                self.fail_task(task_id, entry.attempts, "missing ai_model for task").await;
                return;
            }
        };
        let file_bytes = match tokio::fs::read(&file.stored_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.fail_task(task_id, entry.attempts, &format!("failed to read stored file: {err}")).await;
                return;
            }
        };

        let token = self.governor.acquire(task.owner_id).await;
        self.metrics.set_governor_system_in_use(self.governor.system_in_use());

        if let Err(err) = self.store.update_task_status(task_id, TaskStatus::Processing, None).await {
            warn!(%task_id, error = %err, "failed to mark task processing");
        }
        self.log_bus.publish_status(task_id, "processing".into());

        let pipeline = Pipeline::new(self.store.clone(), self.ai_client.clone(), Arc::new(LogBusSink::new(self.log_bus.clone())), PipelineConfig::from(&self.pipeline_config));

        let cancel = CancellationToken::new();
        let run_future = pipeline.run(&task, &file, &model, file_bytes, cancel.clone());
        let timeout = Duration::from_secs(self.worker_config.task_timeout_sec);

        let outcome = tokio::select! {
            outcome = run_future => outcome,
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                PipelineOutcome::Transient(format!("exceeded task_timeout_sec ({}s)", self.worker_config.task_timeout_sec))
            }
        };

        drop(token);
        self.metrics.set_governor_system_in_use(self.governor.system_in_use());

        match outcome {
            PipelineOutcome::Success => {
                if let Err(err) = self.queue.complete(task_id).await {
                    warn!(%task_id, error = %err, "failed to remove completed queue entry");
                }
                self.log_bus.publish_status(task_id, "completed".into());
                info!(worker_id, %task_id, "task completed");
            }
            PipelineOutcome::Transient(msg) => {
                warn!(worker_id, %task_id, reason = %msg, "task failed transiently, scheduling retry");
                if entry.attempts + 1 >= self.queue.max_attempts() {
                    self.fail_task(task_id, entry.attempts, &msg).await;
                } else if let Err(err) = self.queue.requeue_with_backoff(task_id, entry.attempts).await {
                    error!(%task_id, error = %err, "failed to requeue task after transient failure");
                } else {
                    let _ = self.store.update_task_status(task_id, TaskStatus::Queued, Some(msg)).await;
                    self.log_bus.publish_status(task_id, "queued".into());
                }
            }
            PipelineOutcome::Fatal(msg) => {
                self.fail_task(task_id, entry.attempts, &msg).await;
            }
        }
    }

    async fn fail_task(&self, task_id: uuid::Uuid, _attempts: i32, reason: &str) {
        if let Err(err) = self.queue.fail(task_id).await {
            error!(%task_id, error = %err, "failed to mark queue entry failed");
        }
        if let Err(err) = self.store.update_task_status(task_id, TaskStatus::Failed, Some(reason.to_string())).await {
            error!(%task_id, error = %err, "failed to mark task failed");
        }
        self.log_bus.publish_status(task_id, "failed".into());
        warn!(%task_id, reason, "task failed");
    }
}
