//! Chat-completion client used by the classifier and the query interface.
//!
//! [`ChatModel`] is the seam: the pipeline only ever asks for "complete this
//! prompt", so tests can substitute a canned model. [`OpenAIChat`] calls
//! the OpenAI `POST /v1/chat/completions` endpoint.
//!
//! Requests are retried as described in [`crate::http`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::config::{Credentials, LlmConfig};
use crate::http::post_json_with_retry;

/// A language model that turns a prompt into a completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Send `prompt` as a single user message and return the reply text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// OpenAI chat-completions model.
pub struct OpenAIChat {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIChat {
    /// # Errors
    ///
    /// Fails if `OPENAI_API_KEY` was not provided.
    pub fn new(config: &LlmConfig, credentials: &Credentials) -> Result<Self> {
        let api_key = credentials.require_openai_key()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let endpoint = self.endpoint();
        let json = post_json_with_retry("OpenAI chat", self.config.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let text = parse_chat_response(&json)?;
        debug!(model = %self.config.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}
