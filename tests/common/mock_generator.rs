//! Mock response generator for testing
//!
//! Plays back a script of replies and failures, keeping history with the
//! same all-or-nothing rule as the real generator.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voxline::core::{Conversation, DialogueTurn, ResponseGenerator, Role};
use voxline::{VoxError, VoxResult};

pub struct MockGenerator {
    conversation: Conversation,
    script: VecDeque<Result<String, String>>,
    delay: Duration,
    /// Number of `generate_response` calls
    pub calls: Arc<AtomicUsize>,
    /// User texts in call order
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl MockGenerator {
    pub fn new(script: Vec<Result<&str, &str>>) -> Self {
        Self {
            conversation: Conversation::new(None),
            script: script
                .into_iter()
                .map(|step| step.map(str::to_string).map_err(str::to_string))
                .collect(),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(reply: &str) -> Self {
        Self::new(vec![Ok(reply)])
    }

    pub fn failing() -> Self {
        Self::new(vec![Err("model offline"); 8])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ResponseGenerator for MockGenerator {
    fn set_system_prompt(&mut self, prompt: &str) {
        self.conversation.set_system_prompt(prompt);
    }

    fn add_turn(&mut self, role: Role, content: &str) {
        self.conversation.push(role, content);
    }

    async fn generate_response(&mut self, user_text: &str) -> VoxResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user_text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self
            .script
            .pop_front()
            .unwrap_or_else(|| Ok("Okay.".to_string()))
        {
            Ok(reply) => {
                self.conversation.commit_exchange(user_text, &reply);
                Ok(reply)
            }
            Err(reason) => Err(VoxError::Generation(reason)),
        }
    }

    fn history(&self) -> &[DialogueTurn] {
        self.conversation.turns()
    }

    fn name(&self) -> &str {
        "mock"
    }
}
