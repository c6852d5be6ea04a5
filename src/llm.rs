//! Ollama text-generation client.
//!
//! Calls `POST {url}/api/generate` with `stream: false` and returns the
//! `response` field. Failures are reported once and never retried: a slow
//! or absent model is the caller's signal, not something to paper over.

use std::time::Duration;

use async_trait::async_trait;
use refchat_core::retriever::LanguageModel;
use refchat_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::embedding::request_error;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Language model served by a local Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `true` when `GET /api/tags` answers with a success status.
    pub async fn health(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match response {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url = %self.url, error = %e, "Ollama health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::validation("prompt must not be empty"));
        }

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| request_error(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, model = %self.model, "Ollama generate failed");
            return Err(Error::unavailable(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("reading Ollama response timed out: {}", e))
            } else {
                Error::unavailable(format!("invalid Ollama response: {}", e))
            }
        })?;
        Ok(body.response)
    }
}
