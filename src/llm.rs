//! Generation backends.
//!
//! - **[`DisabledModel`]**: every call fails as unreachable.
//! - **[`OpenAIChat`]**: `POST /v1/chat/completions`. Requires `OPENAI_API_KEY`.
//! - **[`OllamaChat`]**: `POST /api/chat` on a local Ollama instance.
//!
//! Transport failures are classified into [`ModelError`] so the
//! orchestrator can tell a dead backend from a bad answer:
//!
//! | Failure | Error |
//! |---------|-------|
//! | connect / DNS, HTTP 401 / 403, provider disabled | `Unreachable` |
//! | client-side timeout | `Timeout` |
//! | anything else | `Backend` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use qms_review_core::llm::LanguageModel;
use qms_review_core::ModelError;

use crate::config::ModelConfig;

const OPENAI_URL: &str = "https://api.openai.com";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Build the backend named in `config.provider`, sampling at `temperature`.
pub fn create_model(config: &ModelConfig, temperature: f32) -> Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledModel),
        "openai" => Arc::new(OpenAIChat::new(config, temperature)?),
        "ollama" => Arc::new(OllamaChat::new(config, temperature)?),
        other => bail!("Unknown model provider: {}", other),
    };
    Ok(model)
}

/// Run `model.invoke` under `timeout`, mapping an elapsed budget to
/// [`ModelError::Timeout`] even if the backend ignores its own deadline.
pub async fn invoke_with_timeout(
    model: &dyn LanguageModel,
    system: &str,
    user: &str,
    timeout: Duration,
) -> Result<String, ModelError> {
    match tokio::time::timeout(timeout, model.invoke(system, user, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout(timeout)),
    }
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn invoke(&self, _system: &str, _user: &str, _timeout: Duration) -> Result<String, ModelError> {
        Err(ModelError::Unreachable("model provider is disabled".to_string()))
    }
}

// ============ OpenAI ============

pub struct OpenAIChat {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &ModelConfig, temperature: f32) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config.url.as_deref().unwrap_or(OPENAI_URL);

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            temperature,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, system: &str, user: &str, timeout: Duration) -> Result<String, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .timeout(timeout);

        let json = send(request, timeout).await?;
        parse_openai_chat(&json)
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String, ModelError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ModelError::Backend("OpenAI response missing choices[0].message.content".into()))
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &ModelConfig, temperature: f32) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.model required for Ollama provider"))?;
        let url = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, system: &str, user: &str, timeout: Duration) -> Result<String, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": {"temperature": self.temperature},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let request = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .timeout(timeout);

        let json = send(request, timeout).await?;
        parse_ollama_chat(&json)
    }
}

fn parse_ollama_chat(json: &serde_json::Value) -> Result<String, ModelError> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ModelError::Backend("Ollama response missing message.content".into()))
}

// ============ Shared ============

async fn send(request: reqwest::RequestBuilder, timeout: Duration) -> Result<serde_json::Value, ModelError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!(%status, "model backend returned an error status");
        return Err(classify_status(status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| classify_transport(e, timeout))
}

fn classify_transport(e: reqwest::Error, timeout: Duration) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout(timeout)
    } else if e.is_connect() {
        ModelError::Unreachable(e.to_string())
    } else {
        ModelError::Backend(e.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> ModelError {
    let message = format!("HTTP {}: {}", status, body);
    match status.as_u16() {
        401 | 403 => ModelError::Unreachable(message),
        _ => ModelError::Backend(message),
    }
}
