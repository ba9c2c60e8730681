use super::{api_client, bail_on_error, friendly_error};

/// Submit a document for review, uploading `file_path` as multipart form
/// data to `POST /api/tasks`.
pub async fn run(api_url: &str, token: &str, file_path: &str, title: Option<String>, model_key: Option<String>) -> anyhow::Result<()> {
    let client = api_client(token)?;
    let url = format!("{api_url}/api/tasks");

    let bytes = tokio::fs::read(file_path).await.map_err(|e| anyhow::anyhow!("failed to read {file_path}: {e}"))?;
    let file_name = std::path::Path::new(file_path).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| file_path.to_string());

    let mut form = reqwest::multipart::Form::new().part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));
    if let Some(title) = title {
        form = form.text("title", title);
    }
    if let Some(model_key) = model_key {
        form = form.text("model_key", model_key);
    }

    let resp = client.post(&url).multipart(form).send().await.map_err(friendly_error)?;
    let resp = bail_on_error(resp).await?;
    let task: serde_json::Value = resp.json().await.map_err(friendly_error)?;

    println!("task submitted: {}", task["id"].as_str().unwrap_or("unknown"));
    println!("  title:  {}", task["title"].as_str().unwrap_or(""));
    println!("  status: {}", task["status"].as_str().unwrap_or(""));
    Ok(())
}
