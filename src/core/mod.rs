//! Core conversation modules
//!
//! Contains the response generator seam, per-call dialogue history,
//! the Ollama integration, and transcript/reply text normalization.

pub mod conversation;
pub mod ollama;
pub mod text_normalizer;

use crate::config::Config;
use crate::error::VoxResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use conversation::Conversation;
pub use ollama::OllamaGenerator;
pub use text_normalizer::TextNormalizer;

/// Who said a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of the call's dialogue history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl DialogueTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Trait for reply generators. Owns the call's dialogue history.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Set the system instruction. Only the first call per conversation takes effect.
    fn set_system_prompt(&mut self, prompt: &str);

    /// Append a turn without calling the model
    fn add_turn(&mut self, role: Role, content: &str);

    /// Record the user turn, ask the model, record the reply, return it.
    /// On error neither turn is recorded.
    async fn generate_response(&mut self, user_text: &str) -> VoxResult<String>;

    /// Full ordered history
    fn history(&self) -> &[DialogueTurn];

    /// Check that the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }

    /// Get the engine name
    fn name(&self) -> &str;
}

/// Factory to create the configured generator, system prompt applied
pub fn create_generator(config: &Config) -> VoxResult<Box<dyn ResponseGenerator>> {
    info!(
        "🧠 Creating response generator: ollama ({})",
        config.llm.ollama_model
    );
    let mut generator = OllamaGenerator::new(&config.llm)?;
    if let Some(prompt) = &config.llm.system_prompt {
        generator.set_system_prompt(prompt);
    }
    Ok(Box::new(generator))
}
