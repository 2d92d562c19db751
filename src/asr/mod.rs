//! ASR (Automatic Speech Recognition) Module
//!
//! Streams inbound call audio to a recognition backend and delivers
//! transcript events, partial and final, over a channel.
//!
//! Backends:
//! - Wyoming: remote streaming ASR over TCP (e.g., faster-whisper)

pub mod wyoming;

use crate::config::Config;
use crate::error::{VoxError, VoxResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

// Re-export main types
pub use wyoming::WyomingRecognizer;

/// One recognition result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    /// Stabilized segment; not by itself a reason to reply
    pub is_final: bool,
    /// 0.0 ..= 1.0
    pub confidence: f32,
    /// Caller finished the utterance; triggers a turn
    pub speech_final: bool,
    /// Milliseconds since the session connected
    pub timestamp_ms: f64,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>, timestamp_ms: f64) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: 0.0,
            speech_final: false,
            timestamp_ms,
        }
    }

    pub fn utterance_end(text: impl Into<String>, confidence: f32, timestamp_ms: f64) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence: confidence.clamp(0.0, 1.0),
            speech_final: true,
            timestamp_ms,
        }
    }
}

/// Where a recognizer delivers its events. Exactly one consumer per session.
pub type TranscriptSink = mpsc::Sender<TranscriptEvent>;

/// Trait for streaming speech recognizers
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a streaming session with the backend
    async fn connect(&self) -> VoxResult<()>;

    /// Push one inbound frame. Returns once the frame is handed to the
    /// backend, not when it is transcribed.
    async fn send_audio(&self, frame: &[u8]) -> VoxResult<()>;

    /// Register the single consumer of transcript events. Must be called
    /// before or right after `connect`.
    fn on_transcript(&self, sink: TranscriptSink);

    /// Tear down the session. Safe to call repeatedly.
    async fn close(&self) -> VoxResult<()>;

    /// Check that the backend is reachable without opening a session
    async fn health_check(&self) -> bool {
        true
    }

    /// Get the engine name
    fn name(&self) -> &str;
}

/// Factory to create the configured recognizer
pub fn create_recognizer(config: &Config) -> VoxResult<Arc<dyn SpeechRecognizer>> {
    match config.recognizer.engine.as_str() {
        "wyoming" => Ok(Arc::new(WyomingRecognizer::new(
            &config.recognizer,
            config.audio.format,
        ))),
        other => Err(VoxError::Config(format!(
            "unknown recognizer engine '{other}'"
        ))),
    }
}
