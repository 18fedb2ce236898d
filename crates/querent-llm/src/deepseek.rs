use async_trait::async_trait;
use serde_json::json;

use querent_types::{QuerentError, Result};

use crate::port::{Prompt, TextGeneration};
use crate::reply::extract_json;

const PROVIDER: &str = "deepseek";

// ---------------------------------------------------------------------------
// DeepSeekAdapter
// ---------------------------------------------------------------------------

/// OpenAI-compatible `chat/completions` client for the DeepSeek API.
#[derive(Debug)]
pub struct DeepSeekAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl DeepSeekAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
        }
    }

    /// Build from `DEEPSEEK_API_KEY`, honoring `DEEPSEEK_BASE_URL` and
    /// `DEEPSEEK_MODEL` when set.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("DEEPSEEK_API_KEY").map_err(|_| QuerentError::Auth {
            provider: PROVIDER.into(),
        })?;
        let mut adapter = Self::new(key);
        if let Ok(url) = std::env::var("DEEPSEEK_BASE_URL") {
            adapter.base_url = url;
        }
        if let Ok(model) = std::env::var("DEEPSEEK_MODEL") {
            adapter.model = model;
        }
        Ok(adapter)
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    fn build_request_body(&self, prompt: &Prompt) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": prompt.temperature,
        })
    }

    async fn post_chat(&self, prompt: &Prompt) -> Result<serde_json::Value> {
        let body = self.build_request_body(prompt);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| QuerentError::Provider {
                provider: PROVIDER.into(),
                status: 0,
                message: e.to_string(),
                retryable: true,
            })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| QuerentError::Provider {
            provider: PROVIDER.into(),
            status: 0,
            message: e.to_string(),
            retryable: true,
        })?;

        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| {
                QuerentError::MalformedReply(format!("invalid completion envelope: {e}"))
            })?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                QuerentError::MalformedReply("completion has no message content".into())
            })?;

        extract_json(content)
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> QuerentError {
    let status_u16 = status.as_u16();
    match status_u16 {
        401 => QuerentError::Auth {
            provider: PROVIDER.into(),
        },
        429 | 500 | 502 | 503 => QuerentError::Provider {
            provider: PROVIDER.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => QuerentError::Provider {
            provider: PROVIDER.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// TextGeneration implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl TextGeneration for DeepSeekAdapter {
    async fn generate(&self, prompt: &Prompt) -> Result<serde_json::Value> {
        tracing::debug!(
            kind = prompt.kind.as_str(),
            model = %self.model,
            deadline_ms = prompt.deadline.as_millis() as u64,
            "text generation request"
        );

        match tokio::time::timeout(prompt.deadline, self.post_chat(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(QuerentError::RequestTimeout {
                provider: PROVIDER.into(),
                timeout_ms: prompt.deadline.as_millis() as u64,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
