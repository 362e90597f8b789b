//! OpenAI-compatible `/chat/completions` client.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use super::LanguageModel;
use crate::config::LlmConfig;
use crate::error::InsightError;

pub struct OpenAiChat {
    agent: ureq::Agent,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    /// Reads the API key from the environment variable named in `config`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, InsightError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| InsightError::MissingApiKey {
                var: config.api_key_env.clone(),
            })?;

        Ok(Self::new(config, api_key))
    }

    pub fn new(config: &LlmConfig, api_key: String) -> Self {
        OpenAiChat {
            agent: agent(config.timeout),
            url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn request_body(&self, system: &str, user: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

impl LanguageModel for OpenAiChat {
    fn complete(&self, system: &str, user: &str) -> Result<String, InsightError> {
        debug!(model = %self.model, url = %self.url, "sending chat completion");

        let response = self
            .agent
            .post(&self.url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(self.request_body(system, user))
            .map_err(|e| match e {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    InsightError::Upstream(format!("HTTP {code}: {}", upstream_message(&body)))
                }
                ureq::Error::Transport(transport) => InsightError::Upstream(transport.to_string()),
            })?;

        let body: Value = response
            .into_json()
            .map_err(|e| InsightError::MalformedResponse(e.to_string()))?;

        extract_content(&body)
    }
}

/// `choices[0].message.content` of a completion response.
fn extract_content(body: &Value) -> Result<String, InsightError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| InsightError::MalformedResponse("no choices[0].message.content".to_string()))
}

/// Error message from an OpenAI-style error body, or the raw body.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
