//! Per-call dialogue history

use super::{DialogueTurn, Role};
use tracing::warn;

/// Ordered, append-only history plus the system instruction
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    system_prompt: Option<String>,
    turns: Vec<DialogueTurn>,
    /// Most recent turns sent to the model; `None` sends everything
    context_turns: Option<usize>,
}

impl Conversation {
    pub fn new(context_turns: Option<usize>) -> Self {
        Self {
            system_prompt: None,
            turns: Vec::new(),
            context_turns,
        }
    }

    /// First prompt wins; later ones are logged and ignored
    pub fn set_system_prompt(&mut self, prompt: &str) -> bool {
        if let Some(existing) = &self.system_prompt {
            if existing != prompt {
                warn!("System prompt already set for this call, ignoring replacement");
            }
            return false;
        }
        self.system_prompt = Some(prompt.to_string());
        true
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn push(&mut self, role: Role, content: &str) {
        self.turns.push(DialogueTurn::new(role, content));
    }

    /// Record a completed exchange; both turns or nothing
    pub fn commit_exchange(&mut self, user_text: &str, reply: &str) {
        self.turns.reserve(2);
        self.push(Role::User, user_text);
        self.push(Role::Assistant, reply);
    }

    pub fn turns(&self) -> &[DialogueTurn] {
        &self.turns
    }

    /// The window sent to the model, oldest first, without the pending user text
    pub fn context(&self) -> &[DialogueTurn] {
        match self.context_turns {
            Some(limit) if self.turns.len() > limit => &self.turns[self.turns.len() - limit..],
            _ => &self.turns,
        }
    }

    /// Chat messages for a request: system prompt, history window, then `user_text`
    pub fn messages_for(&self, user_text: &str) -> Vec<(&'static str, String)> {
        let mut messages = Vec::with_capacity(self.context().len() + 2);
        if let Some(prompt) = &self.system_prompt {
            messages.push(("system", prompt.clone()));
        }
        messages.extend(
            self.context()
                .iter()
                .map(|turn| (turn.role.as_str(), turn.content.clone())),
        );
        messages.push(("user", user_text.to_string()));
        messages
    }
}
