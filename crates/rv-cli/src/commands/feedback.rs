use super::{api_client, bail_on_error, friendly_error};

/// Record accept/reject feedback on an issue via `PUT /api/issues/{id}/feedback`.
///
/// `feedback` is the CLI-friendly word ("accept" | "reject" | "clear"); "clear"
/// is sent over the wire as the empty string, which is what clears a prior
/// accept/reject back to unset.
pub async fn run(api_url: &str, token: &str, issue_id: &str, feedback: &str, comment: Option<String>) -> anyhow::Result<()> {
    let feedback_type = match feedback {
        "accept" => "accept",
        "reject" => "reject",
        "clear" => "",
        other => anyhow::bail!("feedback must be one of: accept, reject, clear (got {other:?})"),
    };

    let client = api_client(token)?;
    let url = format!("{api_url}/api/issues/{issue_id}/feedback");

    let resp = client
        .put(&url)
        .json(&serde_json::json!({ "feedback_type": feedback_type, "comment": comment }))
        .send()
        .await
        .map_err(friendly_error)?;
    bail_on_error(resp).await?;

    println!("issue {issue_id} feedback recorded: {feedback}");
    Ok(())
}
