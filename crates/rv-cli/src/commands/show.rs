use super::{api_client, bail_on_error, friendly_error};

/// Show a single task's detail: the row, its issues, and its active shares.
pub async fn run(api_url: &str, token: &str, task_id: &str) -> anyhow::Result<()> {
    let client = api_client(token)?;
    let url = format!("{api_url}/api/tasks/{task_id}");

    let resp = client.get(&url).send().await.map_err(friendly_error)?;
    let resp = bail_on_error(resp).await?;
    let detail: serde_json::Value = resp.json().await.map_err(friendly_error)?;

    let task = &detail["task"];
    println!("task:     {}", task["id"].as_str().unwrap_or(""));
    println!("title:    {}", task["title"].as_str().unwrap_or(""));
    println!("status:   {}", task["status"].as_str().unwrap_or(""));
    println!("progress: {}%", task["progress"].as_u64().unwrap_or(0));
    if let Some(stage) = task["current_stage"].as_str() {
        println!("stage:    {stage}");
    }
    if let Some(err) = task["error_message"].as_str() {
        println!("error:    {err}");
    }

    let issues = detail["issues"].as_array().cloned().unwrap_or_default();
    println!("\nissues ({}):", issues.len());
    for issue in &issues {
        println!(
            "  [{}] {} - {}",
            issue["severity"].as_str().unwrap_or(""),
            issue["issue_type"].as_str().unwrap_or(""),
            issue["title"].as_str().unwrap_or(""),
        );
    }
    Ok(())
}
