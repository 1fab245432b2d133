//! Minimal client for an OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("service returned no content")]
    EmptyReply,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Anything that can turn a prompt into free text.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(cfg: &LlmConfig) -> Result<Self, LlmError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = cfg.timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }
}

#[async_trait]
impl TextAnalyzer for ChatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let parsed: ChatResponse = resp.json().await?;
        debug!(model = %self.model, choices = parsed.choices.len(), "completion received");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyReply)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    type Delay = Box<dyn Fn(&CompletionRequest) -> Duration + Send + Sync>;

    /// Replies with canned text chosen by a closure over the prompt.
    /// `prompts` records requests in the order their replies completed.
    pub struct ScriptedAnalyzer<F> {
        reply: F,
        delay: Delay,
        pub prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl<F> ScriptedAnalyzer<F>
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync,
    {
        pub fn new(reply: F) -> Self {
            Self {
                reply,
                delay: Box::new(|_| Duration::ZERO),
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Holds each reply back for a per-request time.
        pub fn with_delay(
            mut self,
            delay: impl Fn(&CompletionRequest) -> Duration + Send + Sync + 'static,
        ) -> Self {
            self.delay = Box::new(delay);
            self
        }
    }

    #[async_trait]
    impl<F> TextAnalyzer for ScriptedAnalyzer<F>
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync,
    {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            let wait = (self.delay)(&request);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            let out = (self.reply)(&request);
            self.prompts.lock().unwrap().push(request);
            out
        }
    }
}
