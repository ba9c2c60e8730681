//! Shared state for the HTTP router. `ApiState` and `Runtime` (in `rv-daemon`)
//! are two independent owners of the same `Arc`s — the WorkerPool and the
//! HTTP layer are independent consumers of the Store/Governor/LogBus, not one
//! god object.

use std::sync::Arc;

use rv_core::config::Config;
use rv_core::store::Store;
use rv_harness::governor::ResourceGovernor;
use rv_harness::shutdown::ShutdownSignal;
use rv_pipeline::traits::Reporter;
use rv_telemetry::Metrics;

use crate::log_bus::LogBus;

/// Cloneable handle to everything an axum handler needs. `Arc` internally, so
/// cloning is cheap and the type can be used directly as axum's `State`.
/// The WorkerPool (in `rv-daemon`) is the other, independent consumer of the
/// same `Store`/`Governor`/`LogBus` — neither owns the other.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<Store>,
    pub governor: Arc<ResourceGovernor>,
    pub log_bus: Arc<LogBus>,
    pub config: Arc<Config>,
    pub shutdown: ShutdownSignal,
    pub reporter: Arc<dyn Reporter>,
    pub metrics: Arc<Metrics>,
}
