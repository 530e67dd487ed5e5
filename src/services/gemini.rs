use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::services::classifier::{ModelError, ModerationModel};

/// Finish reasons that mean the engine withheld its answer on safety grounds.
const REFUSAL_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Client for the Google Generative Language `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ModerationModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let request_body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.0 }
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ModelError::Other(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModelError::Other(format!("Failed to read response body: {e}")))?;

        interpret_response(status, &body)
    }
}

/// Map an HTTP status and body from `generateContent` to reply text or a [`ModelError`].
fn interpret_response(status: StatusCode, body: &str) -> Result<String, ModelError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ModelError::RateLimited(truncate(body)));
    }
    if !status.is_success() {
        return Err(ModelError::Other(format!("{status}: {}", truncate(body))));
    }

    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| ModelError::Other(format!("Malformed generateContent response: {e}")))?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ModelError::Blocked(reason));
    }

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Other("Response contained no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    match candidate.finish_reason.as_deref() {
        Some(reason) if text.is_empty() && REFUSAL_FINISH_REASONS.contains(&reason) => {
            Err(ModelError::Blocked(reason.to_string()))
        }
        _ if text.is_empty() => Err(ModelError::Other(format!(
            "Candidate has no text (finish reason {:?})",
            candidate.finish_reason
        ))),
        _ => Ok(text),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(300).collect()
}
