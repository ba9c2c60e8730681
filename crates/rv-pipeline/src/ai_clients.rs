use async_trait::async_trait;
use rv_core::types::{AIModel, IssueSeverity, IssueType};

use crate::error::AIClientError;
use crate::traits::{AIAnalysis, AIClient, IssueDraft};

/// Deterministic local stand-in for a real model, used in tests and in
/// development deployments without a provider key configured. Flags
/// sentences ending in a double space as a "grammar" issue — enough to
/// exercise the full pipeline without calling out to the network.
pub struct LocalStubClient;

#[async_trait]
impl AIClient for LocalStubClient {
    async fn analyze(&self, input: &str, _model: &AIModel) -> Result<AIAnalysis, AIClientError> {
        let mut issues = Vec::new();
        if input.contains("  ") {
            issues.push(IssueDraft {
                issue_type: IssueType::Grammar,
                severity: IssueSeverity::Low,
                title: "double space".into(),
                description: "found a double space, likely a typo".into(),
                original_text: Some(input.to_string()),
                user_impact: None,
                reasoning: Some("stub heuristic: repeated whitespace".into()),
                location_hint: None,
            });
        }
        Ok(AIAnalysis { raw_output: format!("stub analysis of {} chars", input.len()), token_usage: Some(0), issues })
    }
}

/// Calls an HTTP AI provider. The request/response shape is provider
/// specific; this implementation targets a JSON completion endpoint that
/// accepts `{model, prompt}` and returns `{text, usage}`.
pub struct HttpAIClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpAIClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into(), api_key: api_key.into() }
    }
}

#[derive(serde::Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(serde::Deserialize)]
struct CompletionResponse {
    text: String,
    usage: Option<i64>,
    issues: Vec<IssueDraft>,
}

#[async_trait]
impl AIClient for HttpAIClient {
    async fn analyze(&self, input: &str, model: &AIModel) -> Result<AIAnalysis, AIClientError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest { model: &model.key, prompt: input })
            .send()
            .await
            .map_err(|e| AIClientError::Transient(e.to_string()))?;

        if resp.status().is_server_error() || resp.status().as_u16() == 429 {
            return Err(AIClientError::Transient(format!("provider returned {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(AIClientError::Fatal(format!("provider returned {}", resp.status())));
        }

        let body: CompletionResponse = resp.json().await.map_err(|e| AIClientError::Transient(e.to_string()))?;
        Ok(AIAnalysis { raw_output: body.text, token_usage: body.usage, issues: body.issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stub_model() -> AIModel {
        AIModel { id: uuid::Uuid::new_v4(), key: "stub".into(), provider: "local".into(), config: json!({}), is_default: true }
    }

    #[tokio::test]
    async fn local_stub_flags_double_spaces() {
        let client = LocalStubClient;
        let out = client.analyze("a  b", &stub_model()).await.unwrap();
        assert_eq!(out.issues.len(), 1);
    }

    #[tokio::test]
    async fn local_stub_is_clean_on_normal_text() {
        let client = LocalStubClient;
        let out = client.analyze("a normal sentence", &stub_model()).await.unwrap();
        assert!(out.issues.is_empty());
    }
}
