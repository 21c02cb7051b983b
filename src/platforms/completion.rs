// src/platforms/completion.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::time::Duration;

use crate::config::CompletionConfig;

/// Returned in place of a completion when the upstream cannot be reached
pub const FAILED_PLACEHOLDER: &str = "(Failed to load completion)";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, temperature: f64, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            max_tokens,
            stop: "\n".to_string(),
        }
    }
}

/// Source of raw candidate text. Failures surface as inline text, never as errors.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> String;
}

/// Make sure the prompt ends in a bare `CHAT: ` turn for the model to continue
pub fn ensure_bare_chat_suffix(prompt: &str) -> String {
    let p = prompt.trim_end();
    if p.ends_with("CHAT:") {
        return format!("{} ", p);
    }
    let newline = if p.is_empty() { "" } else { "\n" };
    format!("{}{}CHAT: ", p, newline)
}

/// `choices[0].text` of an OpenAI-style body, or the body itself when it has none
pub fn extract_completion_text(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value["choices"][0]["text"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

pub struct CompletionClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .context("Failed to build completion HTTP client")?;
        Ok(Self {
            http,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn request(&self, request: &CompletionRequest) -> Result<String> {
        let body = CompletionRequest {
            prompt: ensure_bare_chat_suffix(&request.prompt),
            ..request.clone()
        };

        let mut builder = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Completion request to {} failed", self.url))?;
        let status = response.status();
        let text = response.text().await.context("Failed to read completion body")?;

        if !status.is_success() {
            warn!("Completion endpoint returned {}", status);
            return Ok(format!("(Error {}) {}", status.as_u16(), text));
        }
        Ok(extract_completion_text(&text))
    }
}

#[async_trait]
impl CompletionSource for CompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> String {
        match self.request(request).await {
            Ok(text) => {
                debug!("Completion: {:?}", text);
                text
            }
            Err(e) => {
                warn!("{:#}", e);
                FAILED_PLACEHOLDER.to_string()
            }
        }
    }
}
