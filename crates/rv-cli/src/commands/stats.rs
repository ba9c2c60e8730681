use super::{api_client, bail_on_error, friendly_error};

/// Print system-wide task counts via `GET /api/tasks/statistics`.
pub async fn run(api_url: &str, token: &str) -> anyhow::Result<()> {
    let client = api_client(token)?;

    let resp = client.get(format!("{api_url}/api/tasks/statistics")).send().await.map_err(friendly_error)?;
    let resp = bail_on_error(resp).await?;
    let stats: serde_json::Value = resp.json().await.map_err(friendly_error)?;

    println!("task statistics ({})", stats["timestamp"].as_str().unwrap_or(""));
    println!("  pending:    {}", stats["pending"].as_u64().unwrap_or(0));
    println!("  queued:     {}", stats["queued"].as_u64().unwrap_or(0));
    println!("  processing: {}", stats["processing"].as_u64().unwrap_or(0));
    println!("  completed:  {}", stats["completed"].as_u64().unwrap_or(0));
    println!("  failed:     {}", stats["failed"].as_u64().unwrap_or(0));
    println!("  cancelled:  {}", stats["cancelled"].as_u64().unwrap_or(0));

    let resp = client.get(format!("{api_url}/api/tasks/concurrency-status")).send().await.map_err(friendly_error)?;
    let resp = bail_on_error(resp).await?;
    let concurrency: serde_json::Value = resp.json().await.map_err(friendly_error)?;
    println!(
        "concurrency: system {}/{}  user {}/{}",
        concurrency["system_in_use"].as_u64().unwrap_or(0),
        concurrency["system_limit"].as_u64().unwrap_or(0),
        concurrency["user_in_use"].as_u64().unwrap_or(0),
        concurrency["user_limit"].as_u64().unwrap_or(0),
    );
    Ok(())
}
