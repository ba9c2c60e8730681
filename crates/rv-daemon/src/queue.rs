//! Thin worker-facing wrapper over the Store's queue table: candidate
//! selection, atomic claiming, and the retry/backoff schedule.

use std::sync::Arc;
use std::time::Duration;

use rv_core::config::QueueConfig;
use rv_core::store::Store;
use rv_core::types::QueueEntry;
use uuid::Uuid;

pub struct Queue {
    store: Arc<Store>,
    config: QueueConfig,
}

impl Queue {
    pub fn new(store: Arc<Store>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    /// Pulls candidate rows ordered by priority/age and attempts to claim the
    /// first one for `worker_id`. Falls through to the next candidate if
    /// another worker won the race, matching `try_claim`'s SKIP LOCKED-style
    /// contract.
    pub async fn claim_next(&self, worker_id: &str) -> rv_core::store::StoreResult<Option<QueueEntry>> {
        let candidates = self.store.list_queue_candidates(16).await?;
        for entry in candidates {
            if self.store.try_claim(entry.id, worker_id).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub async fn complete(&self, task_id: Uuid) -> rv_core::store::StoreResult<()> {
        self.store.complete_queue_entry(task_id).await
    }

    pub async fn fail(&self, task_id: Uuid) -> rv_core::store::StoreResult<()> {
        self.store.fail_queue_entry(task_id).await
    }

    /// Requeues `task_id` with the delay from `backoff_schedule_sec` for the
    /// given attempt count (0-indexed), clamped to the last configured step
    /// once attempts exceed the schedule's length.
    pub async fn requeue_with_backoff(&self, task_id: Uuid, attempt: i32) -> rv_core::store::StoreResult<()> {
        let schedule = &self.config.backoff_schedule_sec;
        let idx = (attempt.max(0) as usize).min(schedule.len().saturating_sub(1));
        let delay_secs = schedule.get(idx).copied().unwrap_or(5);
        self.store.requeue_with_backoff(task_id, Duration::from_secs(delay_secs)).await
    }

    pub async fn boost_stale_priorities(&self) -> rv_core::store::StoreResult<u64> {
        self.store
            .boost_stale_priorities(Duration::from_secs(self.config.priority_boost_threshold_sec))
            .await
    }

    pub fn max_attempts(&self) -> i32 {
        self.config.max_attempts
    }
}
