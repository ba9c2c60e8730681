//! Startup recovery: this is a single-process daemon, so any `processing`
//! queue row left over from an unclean shutdown has no live owner and must
//! be reclaimed before workers start.

use std::sync::Arc;

use rv_core::config::QueueConfig;
use rv_core::store::Store;
use tracing::info;

pub struct RecoveryManager {
    store: Arc<Store>,
    queue_config: QueueConfig,
}

impl RecoveryManager {
    pub fn new(store: Arc<Store>, queue_config: QueueConfig) -> Self {
        Self { store, queue_config }
    }

    /// Requeues stranded `processing` entries, re-enqueues `processing`
    /// tasks with no matching queue row, and sweeps orphaned child rows.
    /// Called once before the WorkerPool starts claiming work.
    pub async fn run(&self) -> rv_core::store::StoreResult<()> {
        let (requeued, failed) = self
            .store
            .requeue_all_processing("exceeded max_attempts after unclean shutdown")
            .await?;
        if requeued > 0 || failed > 0 {
            info!(requeued, failed, "recovered stranded processing queue entries");
        }

        let reconciled = self
            .store
            .reconcile_orphan_tasks(self.queue_config.default_priority, self.queue_config.max_attempts)
            .await?;
        if reconciled > 0 {
            info!(reconciled, "re-enqueued processing tasks with no queue row");
        }

        let swept = self.store.sweep_orphan_children().await?;
        if swept > 0 {
            info!(swept, "removed orphaned child rows");
        }

        Ok(())
    }
}
