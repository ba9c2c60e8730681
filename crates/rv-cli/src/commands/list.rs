use super::{api_client, bail_on_error, friendly_error};

/// List tasks visible to the caller, optionally filtered by status.
pub async fn run(api_url: &str, token: &str, status: Option<String>, page: u32, page_size: u32) -> anyhow::Result<()> {
    let client = api_client(token)?;
    let mut url = format!("{api_url}/api/tasks?page={page}&page_size={page_size}");
    if let Some(status) = status {
        url.push_str(&format!("&status={status}"));
    }

    let resp = client.get(&url).send().await.map_err(friendly_error)?;
    let resp = bail_on_error(resp).await?;
    let page_body: serde_json::Value = resp.json().await.map_err(friendly_error)?;

    let items = page_body["items"].as_array().cloned().unwrap_or_default();
    println!("{:<38} {:<12} {:>5} {}", "id", "status", "pct", "title");
    for item in &items {
        println!(
            "{:<38} {:<12} {:>4}% {}",
            item["id"].as_str().unwrap_or(""),
            item["status"].as_str().unwrap_or(""),
            item["progress"].as_u64().unwrap_or(0),
            item["title"].as_str().unwrap_or(""),
        );
    }
    println!("-- {} of {} --", items.len(), page_body["total"].as_u64().unwrap_or(0));
    Ok(())
}
