use super::{api_client, friendly_error};

/// Cancel (non-terminal) or delete (terminal) a task via `DELETE /api/tasks/{id}`.
pub async fn run(api_url: &str, token: &str, task_id: &str) -> anyhow::Result<()> {
    let client = api_client(token)?;
    let url = format!("{api_url}/api/tasks/{task_id}");

    let resp = client.delete(&url).send().await.map_err(friendly_error)?;
    if resp.status().is_success() {
        println!("task {task_id} cancelled/deleted");
        return Ok(());
    }
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    anyhow::bail!("{} (HTTP {status})", body["error"].as_str().unwrap_or("unknown error"));
}
