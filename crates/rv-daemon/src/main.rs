//! reviewd — starts the task queue, worker pool, and the HTTP/WebSocket API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use rv_core::config::Config;
use rv_core::store::Store;
use rv_daemon::runtime::Runtime;
use rv_pipeline::ai_clients::{HttpAIClient, LocalStubClient};
use rv_pipeline::reporters::CsvReporter;
use rv_pipeline::traits::AIClient;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("failed to load config, using defaults: {e}");
        Config::default()
    });

    if config.general.log_format == "json" {
        rv_telemetry::logging::init_logging_json("reviewd", &config.general.log_level);
    } else {
        rv_telemetry::logging::init_logging("reviewd", &config.general.log_level);
    }

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "reviewd starting");

    let data_dir = expand_home(&config.general.data_dir);
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    tokio::fs::create_dir_all(data_dir.join("uploads")).await.ok();

    let db_path = data_dir.join("reviewd.sqlite3");
    let store = Arc::new(Store::new(&db_path).await.with_context(|| format!("failed to open store at {}", db_path.display()))?);

    seed_default_ai_model(&store).await?;

    let ai_client: Arc<dyn AIClient> = match (std::env::var("REVIEWD_AI_ENDPOINT"), std::env::var("REVIEWD_AI_API_KEY")) {
        (Ok(endpoint), Ok(api_key)) => {
            info!(endpoint, "using configured HTTP AI provider");
            Arc::new(HttpAIClient::new(endpoint, api_key))
        }
        _ => {
            info!("no REVIEWD_AI_ENDPOINT/REVIEWD_AI_API_KEY set, using the local stub AI client");
            Arc::new(LocalStubClient)
        }
    };

    let runtime = Runtime::new(config, store, ai_client, Arc::new(CsvReporter));
    runtime.run().await
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Ensures at least one AI model row exists so a fresh install can accept
/// submissions without a manual setup step.
async fn seed_default_ai_model(store: &Store) -> Result<()> {
    if store.get_default_ai_model().await?.is_some() {
        return Ok(());
    }
    let model = rv_core::types::AIModel {
        id: uuid::Uuid::new_v4(),
        key: "stub".into(),
        provider: "local".into(),
        config: serde_json::json!({}),
        is_default: true,
    };
    store.upsert_ai_model(&model).await?;
    info!(model_key = %model.key, "seeded default ai model");
    Ok(())
}
