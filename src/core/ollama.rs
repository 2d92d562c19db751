//! Ollama AI Integration
//!
//! Generates call replies through Ollama's `/api/chat` endpoint.

use super::{Conversation, DialogueTurn, ResponseGenerator, Role};
use crate::config::LlmConfig;
use crate::error::{VoxError, VoxResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama API response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

/// Reply generator backed by a local Ollama server
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry_attempts: usize,
    conversation: Conversation,
}

impl OllamaGenerator {
    /// Create new generator from config
    pub fn new(config: &LlmConfig) -> VoxResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| VoxError::Generation(format!("failed to build Ollama client: {e}")))?;

        Ok(Self {
            client,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry_attempts: config.retry_attempts,
            conversation: Conversation::new(config.context_turns),
        })
    }

    async fn chat(&self, user_text: &str) -> VoxResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: self
                .conversation
                .messages_for(user_text)
                .into_iter()
                .map(|(role, content)| ChatMessage { role, content })
                .collect(),
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        // Only connection failures are retried; the model never saw those
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(1))
            .map(jitter)
            .take(self.retry_attempts);
        let endpoint = format!("{}/api/chat", self.url);
        let response = RetryIf::spawn(
            strategy,
            || self.client.post(&endpoint).json(&request).send(),
            |e: &reqwest::Error| e.is_connect(),
        )
        .await
        .map_err(|e| VoxError::Generation(format!("Ollama request failed: {e}")))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| VoxError::Generation(format!("Ollama body read failed: {e}")))?;

        if !status.is_success() {
            warn!("❌ Ollama API Error ({}): {}", status, body_text);
            return Err(VoxError::Generation(format!(
                "Ollama returned {status}: {body_text}"
            )));
        }

        debug!("🧠 Ollama raw body: {}", body_text);

        let parsed: ChatResponse = serde_json::from_str(&body_text).map_err(|e| {
            warn!("❌ Failed to deserialize Ollama response: {} - Body: {}", e, body_text);
            VoxError::Generation(format!("malformed Ollama response: {e}"))
        })?;

        let reply = parsed.message.content.trim().to_string();
        if reply.is_empty() {
            return Err(VoxError::Generation("Ollama returned an empty reply".to_string()));
        }
        Ok(reply)
    }
}

#[async_trait]
impl ResponseGenerator for OllamaGenerator {
    fn set_system_prompt(&mut self, prompt: &str) {
        self.conversation.set_system_prompt(prompt);
    }

    fn add_turn(&mut self, role: Role, content: &str) {
        self.conversation.push(role, content);
    }

    async fn generate_response(&mut self, user_text: &str) -> VoxResult<String> {
        let reply = self.chat(user_text).await?;
        self.conversation.commit_exchange(user_text, &reply);
        Ok(reply)
    }

    fn history(&self) -> &[DialogueTurn] {
        self.conversation.turns()
    }

    /// Health check - verify Ollama is reachable
    async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
