use super::{api_client, friendly_error};

/// Download a completed task's report to `out_path` via `GET /api/tasks/{id}/report`.
pub async fn run(api_url: &str, token: &str, task_id: &str, out_path: &str) -> anyhow::Result<()> {
    let client = api_client(token)?;
    let url = format!("{api_url}/api/tasks/{task_id}/report");

    let resp = client.get(&url).send().await.map_err(friendly_error)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("failed to fetch report (HTTP {status}): {body}");
    }

    let bytes = resp.bytes().await.map_err(friendly_error)?;
    tokio::fs::write(out_path, &bytes).await.map_err(|e| anyhow::anyhow!("failed to write {out_path}: {e}"))?;
    println!("report written to {out_path} ({} bytes)", bytes.len());
    Ok(())
}
