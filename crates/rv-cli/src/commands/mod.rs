pub mod cancel;
pub mod feedback;
pub mod list;
pub mod report;
pub mod retry;
pub mod show;
pub mod stats;
pub mod submit;

/// Build a reqwest client carrying the bearer token for every request.
pub fn api_client(token: &str) -> anyhow::Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))?;
    auth.set_sensitive(true);
    headers.insert(reqwest::header::AUTHORIZATION, auth);
    Ok(reqwest::Client::builder().default_headers(headers).build()?)
}

/// Map common reqwest errors to user-friendly messages.
pub fn friendly_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_connect() {
        anyhow::anyhow!("could not connect to reviewd. Is it running?\n  (hint: start it with `reviewd` or check --api-url)")
    } else if err.is_timeout() {
        anyhow::anyhow!("request timed out")
    } else {
        anyhow::anyhow!("api request failed: {err}")
    }
}

/// Render a non-2xx JSON error body the way `ApiError` serializes it.
pub async fn bail_on_error(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    let msg = body["error"].as_str().unwrap_or("unknown error");
    anyhow::bail!("{msg} (HTTP {status})")
}
