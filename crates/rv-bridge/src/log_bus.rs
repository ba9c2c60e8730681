//! Per-task log/event fan-out, built on the same `flume`-per-subscriber shape
//! as this codebase's `EventBus`, extended with per-task routing, a replay
//! buffer, and backpressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rv_core::store::Store;
use rv_core::types::{LogLevel, TaskLog};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// One entry delivered to subscribers of a task's log stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connection {
        task_id: Uuid,
    },
    Log {
        task_id: Uuid,
        entry_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
        level: LogLevel,
        module: String,
        stage: Option<String>,
        message: String,
        metadata: Option<serde_json::Value>,
    },
    Progress {
        task_id: Uuid,
        progress: u8,
        stage: Option<String>,
    },
    Status {
        task_id: Uuid,
        status: String,
    },
}

/// Reason a subscription was torn down, surfaced to the transport layer so it
/// can pick an appropriate close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SlowConsumer,
    HeartbeatTimeout,
    Normal,
}

struct TaskChannel {
    history: std::sync::RwLock<VecDeque<StreamEvent>>,
    next_entry_id: AtomicI64,
    subscribers: std::sync::Mutex<Vec<Subscriber>>,
}

struct Subscriber {
    tx: flume::Sender<StreamEvent>,
    pending: Arc<AtomicUsize>,
}

/// A live subscription: history replay followed by a live tail.
pub struct LogSubscription {
    pub task_id: Uuid,
    rx: flume::Receiver<StreamEvent>,
    pending: Arc<AtomicUsize>,
}

impl LogSubscription {
    /// Receive the next event, or `None` once the publisher side has closed
    /// (e.g. after this subscriber was pruned for being too slow).
    pub async fn recv(&self) -> Option<StreamEvent> {
        let event = self.rx.recv_async().await.ok()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(event)
    }
}

/// Per-task append-only event stream with fan-out to subscribers.
pub struct LogBus {
    store: Arc<Store>,
    channels: DashMap<Uuid, Arc<TaskChannel>>,
    per_task_history_max: usize,
    per_sub_buffer_max: usize,
}

impl LogBus {
    pub fn new(store: Arc<Store>, per_task_history_max: usize, per_sub_buffer_max: usize) -> Self {
        Self {
            store,
            channels: DashMap::new(),
            per_task_history_max,
            per_sub_buffer_max,
        }
    }

    fn channel(&self, task_id: Uuid) -> Arc<TaskChannel> {
        self.channels
            .entry(task_id)
            .or_insert_with(|| {
                Arc::new(TaskChannel {
                    history: std::sync::RwLock::new(VecDeque::new()),
                    next_entry_id: AtomicI64::new(1),
                    subscribers: std::sync::Mutex::new(Vec::new()),
                })
            })
            .clone()
    }

    /// Publish a log line. Assigns a monotonic `entry_id`, persists it in the
    /// background (fire-and-forget — this is what keeps the Pipeline from
    /// ever blocking on a slow subscriber or a slow disk), and fans it out.
    pub fn publish_log(
        &self,
        task_id: Uuid,
        level: LogLevel,
        module: impl Into<String>,
        stage: Option<String>,
        message: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> i64 {
        let module = module.into();
        let message = message.into();
        let channel = self.channel(task_id);
        let entry_id = channel.next_entry_id.fetch_add(1, Ordering::AcqRel);
        let timestamp = chrono::Utc::now();

        let event = StreamEvent::Log {
            task_id,
            entry_id,
            timestamp,
            level,
            module: module.clone(),
            stage: stage.clone(),
            message: message.clone(),
            metadata: metadata.clone(),
        };
        self.push_history(&channel, event.clone());
        self.fan_out(&channel, event);

        let store = self.store.clone();
        let log = TaskLog {
            id: Uuid::new_v4(),
            task_id,
            timestamp,
            level,
            module,
            stage,
            progress: None,
            message,
            metadata,
        };
        tokio::spawn(async move {
            if let Err(err) = store.append_task_log(&log).await {
                warn!(%task_id, error = %err, "failed to persist task log entry");
            }
        });

        entry_id
    }

    /// Publish a progress update. Not persisted — progress is a derived,
    /// frequently-overwritten quantity already tracked on `Task.progress`.
    pub fn publish_progress(&self, task_id: Uuid, progress: u8, stage: Option<String>) {
        let channel = self.channel(task_id);
        let event = StreamEvent::Progress {
            task_id,
            progress,
            stage,
        };
        self.fan_out(&channel, event);
    }

    /// Publish a status transition.
    pub fn publish_status(&self, task_id: Uuid, status: String) {
        let channel = self.channel(task_id);
        let event = StreamEvent::Status { task_id, status };
        self.push_history(&channel, event.clone());
        self.fan_out(&channel, event);
    }

    fn push_history(&self, channel: &TaskChannel, event: StreamEvent) {
        let mut history = channel.history.write().expect("log history lock poisoned");
        history.push_back(event);
        while history.len() > self.per_task_history_max {
            history.pop_front();
        }
    }

    fn fan_out(&self, channel: &TaskChannel, event: StreamEvent) {
        let mut subs = channel.subscribers.lock().expect("subscriber list lock poisoned");
        let max = self.per_sub_buffer_max;
        subs.retain(|sub| {
            if sub.pending.load(Ordering::Acquire) >= max {
                return false;
            }
            if sub.tx.send(event.clone()).is_ok() {
                sub.pending.fetch_add(1, Ordering::AcqRel);
                true
            } else {
                false
            }
        });
    }

    /// Subscribe to a task's stream. Replays in-memory history (falling back
    /// to the Store when the ring buffer has nothing for this task, e.g.
    /// after a restart), then returns a handle that yields the live tail.
    pub async fn subscribe(&self, task_id: Uuid) -> LogSubscription {
        let channel = self.channel(task_id);
        let (tx, rx) = flume::unbounded();
        let pending = Arc::new(AtomicUsize::new(0));

        let replay: Vec<StreamEvent> = {
            let history = channel.history.read().expect("log history lock poisoned");
            history.iter().cloned().collect()
        };
        let replay = if replay.is_empty() {
            self.store
                .load_task_log_history(task_id, self.per_task_history_max as u32)
                .await
                .unwrap_or_default()
                .into_iter()
                .map(|log| StreamEvent::Log {
                    task_id: log.task_id,
                    entry_id: 0,
                    timestamp: log.timestamp,
                    level: log.level,
                    module: log.module,
                    stage: log.stage,
                    message: log.message,
                    metadata: log.metadata,
                })
                .collect()
        } else {
            replay
        };

        for event in replay {
            if tx.send(event).is_ok() {
                pending.fetch_add(1, Ordering::AcqRel);
            }
        }

        channel
            .subscribers
            .lock()
            .expect("subscriber list lock poisoned")
            .push(Subscriber {
                tx,
                pending: pending.clone(),
            });

        LogSubscription { task_id, rx, pending }
    }

    pub fn subscriber_count(&self, task_id: Uuid) -> usize {
        self.channels
            .get(&task_id)
            .map(|c| c.subscribers.lock().expect("subscriber list lock poisoned").len())
            .unwrap_or(0)
    }
}
