//! Language Model Backend
//!
//! OpenAI-compatible chat completions client.
//! Every history entry is sent as a `user` turn, followed by the prompt.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.llm7.io/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_KEY: &str = "unused";

/// Error types for model calls
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Model API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

/// Something that can produce a reply from a prompt and recent history
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, prompt: &str, history: &[String]) -> Result<String, ModelError>;
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 500,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Message in conversation
#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// API request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

/// API response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self, ModelError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Result<Self, ModelError> {
        Self::new(config.model.clone())
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

fn build_messages<'a>(prompt: &'a str, history: &'a [String]) -> Vec<ChatMessage<'a>> {
    history
        .iter()
        .map(|content| ChatMessage {
            role: "user",
            content: content.as_str(),
        })
        .chain(std::iter::once(ChatMessage {
            role: "user",
            content: prompt,
        }))
        .collect()
}

fn first_choice_content(response: ChatResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .unwrap_or_default()
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn generate(&self, prompt: &str, history: &[String]) -> Result<String, ModelError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: build_messages(prompt, history),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!(
            "Calling model API: model={}, prompt_len={}, history={}",
            self.config.model,
            prompt.len(),
            history.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let content = first_choice_content(response.json().await?);
        info!(
            "Model response: model={}, len={}",
            self.config.model,
            content.len()
        );
        Ok(content)
    }
}
