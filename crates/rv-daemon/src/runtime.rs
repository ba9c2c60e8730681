//! Composition root: wires the Store, Governor, LogBus, WorkerPool, and HTTP
//! router together, runs startup recovery, and owns graceful shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use rv_bridge::api_state::ApiState;
use rv_bridge::log_bus::LogBus;
use rv_core::config::Config;
use rv_core::store::Store;
use rv_harness::governor::ResourceGovernor;
use rv_harness::shutdown::ShutdownSignal;
use rv_pipeline::traits::{AIClient, Reporter};
use rv_telemetry::Metrics;
use tokio::net::TcpListener;
use tracing::info;

use crate::queue::Queue;
use crate::recovery::RecoveryManager;
use crate::worker_pool::WorkerPool;

pub struct Runtime {
    config: Arc<Config>,
    store: Arc<Store>,
    governor: Arc<ResourceGovernor>,
    log_bus: Arc<LogBus>,
    metrics: Arc<Metrics>,
    ai_client: Arc<dyn AIClient>,
    reporter: Arc<dyn Reporter>,
    shutdown: ShutdownSignal,
}

impl Runtime {
    pub fn new(config: Config, store: Arc<Store>, ai_client: Arc<dyn AIClient>, reporter: Arc<dyn Reporter>) -> Self {
        let config = Arc::new(config);
        let governor = Arc::new(ResourceGovernor::new(config.governor.system_max_concurrent, config.governor.default_user_max_concurrent, config.governor.user_db_connection_limit as usize));
        let log_bus = Arc::new(LogBus::new(store.clone(), config.logbus.per_task_history_max, config.logbus.per_sub_buffer_max));
        let metrics = Arc::new(Metrics::new());
        Self {
            config,
            store,
            governor,
            log_bus,
            metrics,
            ai_client,
            reporter,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Runs startup recovery, then binds the HTTP listener and spawns the
    /// worker pool and the periodic maintenance loop. Blocks until the
    /// shutdown signal fires and every background task has drained.
    pub async fn run(self) -> Result<()> {
        RecoveryManager::new(self.store.clone(), self.config.queue.clone())
            .run()
            .await
            .context("startup recovery failed")?;

        let queue = Arc::new(Queue::new(self.store.clone(), self.config.queue.clone()));

        let api_state = ApiState {
            store: self.store.clone(),
            governor: self.governor.clone(),
            log_bus: self.log_bus.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            reporter: self.reporter.clone(),
            metrics: self.metrics.clone(),
        };
        let router = rv_bridge::routes::build_router(api_state);

        let addr = format!("{}:{}", self.config.daemon.host, self.config.daemon.port);
        let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "http listener bound");

        let server_shutdown = self.shutdown.clone();
        let mut server_shutdown_rx = server_shutdown.subscribe();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown_rx.recv().await;
                })
                .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "http server exited with error");
            }
        });

        let worker_pool = Arc::new(WorkerPool::new(
            self.store.clone(),
            queue.clone(),
            self.governor.clone(),
            self.log_bus.clone(),
            self.metrics.clone(),
            self.ai_client.clone(),
            &self.config,
            self.shutdown.clone(),
        ));
        let worker_handles = worker_pool.clone().spawn();

        let maintenance = tokio::spawn(run_maintenance_loop(queue, self.shutdown.clone()));

        let mut ctrlc_shutdown_rx = self.shutdown.subscribe();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                self.shutdown.trigger();
            }
            _ = ctrlc_shutdown_rx.recv() => {}
        }

        let _ = server.await;
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = maintenance.await;

        info!("runtime shut down cleanly");
        Ok(())
    }
}

/// Periodically boosts stale queued priorities so old tasks don't starve
/// behind a stream of newer high-priority submissions.
async fn run_maintenance_loop(queue: Arc<Queue>, shutdown: ShutdownSignal) {
    let mut shutdown_rx = shutdown.subscribe();
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match queue.boost_stale_priorities().await {
                    Ok(n) if n > 0 => info!(boosted = n, "boosted stale queue priorities"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "priority boost sweep failed"),
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}
