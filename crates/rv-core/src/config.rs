use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.reviewd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logbus: LogBusConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            governor: GovernorConfig::default(),
            worker: WorkerConfig::default(),
            queue: QueueConfig::default(),
            pipeline: PipelineConfig::default(),
            logbus: LogBusConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.reviewd/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".reviewd").join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_project_name() -> String {
    "reviewd".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}
fn default_data_dir() -> String {
    "~/.reviewd/data".into()
}

/// Resource admission: system-wide and per-user concurrency caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_system_max_concurrent")]
    pub system_max_concurrent: usize,
    #[serde(default = "default_user_max_concurrent")]
    pub default_user_max_concurrent: usize,
    /// Cap on concurrent DB sessions per user, checked before any semaphore
    /// permit is taken. Independent of `default_user_max_concurrent`, which
    /// caps in-flight tasks rather than DB sessions.
    #[serde(default = "default_user_db_connection_limit")]
    pub user_db_connection_limit: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            system_max_concurrent: default_system_max_concurrent(),
            default_user_max_concurrent: default_user_max_concurrent(),
            user_db_connection_limit: default_user_db_connection_limit(),
        }
    }
}

fn default_system_max_concurrent() -> usize {
    100
}
fn default_user_max_concurrent() -> usize {
    10
}
fn default_user_db_connection_limit() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_task_timeout_sec")]
    pub task_timeout_sec: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_idle_backoff_min_ms")]
    pub idle_backoff_min_ms: u64,
    #[serde(default = "default_idle_backoff_max_ms")]
    pub idle_backoff_max_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            task_timeout_sec: default_task_timeout_sec(),
            grace_period_secs: default_grace_period_secs(),
            idle_backoff_min_ms: default_idle_backoff_min_ms(),
            idle_backoff_max_ms: default_idle_backoff_max_ms(),
        }
    }
}

fn default_worker_pool_size() -> usize {
    20
}
fn default_task_timeout_sec() -> u64 {
    600
}
fn default_grace_period_secs() -> u64 {
    30
}
fn default_idle_backoff_min_ms() -> u64 {
    1000
}
fn default_idle_backoff_max_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_priority_boost_threshold_sec")]
    pub priority_boost_threshold_sec: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_backoff_schedule_sec")]
    pub backoff_schedule_sec: Vec<u64>,
    #[serde(default = "default_default_priority")]
    pub default_priority: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority_boost_threshold_sec: default_priority_boost_threshold_sec(),
            max_attempts: default_max_attempts(),
            backoff_schedule_sec: default_backoff_schedule_sec(),
            default_priority: default_default_priority(),
        }
    }
}

fn default_priority_boost_threshold_sec() -> u64 {
    300
}
fn default_max_attempts() -> i32 {
    3
}
fn default_backoff_schedule_sec() -> Vec<u64> {
    vec![5, 10, 20]
}
fn default_default_priority() -> i32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_max_chars_per_chunk")]
    pub max_chars_per_chunk: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_per_task_detect_fanout")]
    pub per_task_detect_fanout: usize,
    #[serde(default = "default_progress_write_interval_ms")]
    pub progress_write_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            max_chars_per_chunk: default_max_chars_per_chunk(),
            overlap_chars: default_overlap_chars(),
            per_task_detect_fanout: default_per_task_detect_fanout(),
            progress_write_interval_ms: default_progress_write_interval_ms(),
        }
    }
}

fn default_max_file_size_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_max_chars_per_chunk() -> usize {
    4000
}
fn default_overlap_chars() -> usize {
    200
}
fn default_per_task_detect_fanout() -> usize {
    4
}
fn default_progress_write_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBusConfig {
    #[serde(default = "default_per_task_history_max")]
    pub per_task_history_max: usize,
    #[serde(default = "default_per_sub_buffer_max")]
    pub per_sub_buffer_max: usize,
    #[serde(default = "default_heartbeat_interval_sec")]
    pub heartbeat_interval_sec: u64,
    #[serde(default = "default_heartbeat_timeout_sec")]
    pub heartbeat_timeout_sec: u64,
}

impl Default for LogBusConfig {
    fn default() -> Self {
        Self {
            per_task_history_max: default_per_task_history_max(),
            per_sub_buffer_max: default_per_sub_buffer_max(),
            heartbeat_interval_sec: default_heartbeat_interval_sec(),
            heartbeat_timeout_sec: default_heartbeat_timeout_sec(),
        }
    }
}

fn default_per_task_history_max() -> usize {
    1000
}
fn default_per_sub_buffer_max() -> usize {
    256
}
fn default_heartbeat_interval_sec() -> u64 {
    30
}
fn default_heartbeat_timeout_sec() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_daemon_port(),
            host: default_daemon_host(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

fn default_daemon_port() -> u16 {
    8787
}
fn default_daemon_host() -> String {
    "127.0.0.1".into()
}
fn default_metrics_enabled() -> bool {
    true
}
