//! HTTP summarization client for an Ollama-style generate endpoint.

use crate::config::LlmConfig;
use crate::llm::{SummaryClient, SummaryError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Summarization client backed by a local or remote generate endpoint.
pub struct HttpSummaryClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize, Debug)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    response: String,
}

impl HttpSummaryClient {
    /// Create a client against the configured endpoint.
    ///
    /// The reqwest-level timeout is a transport backstop; the summarizer
    /// applies its own tighter per-call timeout on top.
    pub fn new(config: &LlmConfig) -> Result<Self, SummaryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| SummaryError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Check that the endpoint knows the configured model.
    pub async fn check_model(&self) -> Result<(), SummaryError> {
        let url = format!("{}/api/show", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "name": self.model }))
            .send()
            .await
            .map_err(|e| SummaryError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SummaryError::Unusable(format!(
                "model '{}' not available at {}",
                self.model, self.base_url
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl SummaryClient for HttpSummaryClient {
    async fn generate(&self, prompt: &str) -> Result<String, SummaryError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.3,
                num_predict: 512,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SummaryError::Timeout
                } else {
                    SummaryError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummaryError::Network(format!(
                "service returned {status}: {body}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SummaryError::Unusable(e.to_string()))?;

        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            return Err(SummaryError::Unusable("empty reply".to_string()));
        }

        Ok(text)
    }
}
