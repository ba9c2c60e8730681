use super::{api_client, bail_on_error, friendly_error};

/// Re-enqueue a failed task via `POST /api/tasks/{id}/retry`.
pub async fn run(api_url: &str, token: &str, task_id: &str) -> anyhow::Result<()> {
    let client = api_client(token)?;
    let url = format!("{api_url}/api/tasks/{task_id}/retry");

    let resp = client.post(&url).send().await.map_err(friendly_error)?;
    let resp = bail_on_error(resp).await?;
    let task: serde_json::Value = resp.json().await.map_err(friendly_error)?;

    println!("task requeued: {}", task["id"].as_str().unwrap_or(""));
    println!("  status: {}", task["status"].as_str().unwrap_or(""));
    Ok(())
}
