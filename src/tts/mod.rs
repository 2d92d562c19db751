//! TTS (Text-to-Speech) Module
//!
//! Provides a unified streaming interface for multiple TTS backends.
//! A synthesis call returns a lazy stream of audio chunks; dropping the
//! stream abandons the synthesis and releases its backend resources.

use crate::audio::AudioChunk;
use crate::config::Config;
use crate::error::{VoxError, VoxResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::info;

pub mod http;
pub mod piper;

pub use http::HttpSynthesizer;
pub use piper::PiperSynthesizer;

/// Chunks in playback order. Finite, not restartable, single consumer.
pub type AudioStream = BoxStream<'static, VoxResult<AudioChunk>>;

/// Trait for streaming TTS engines
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Prepare the backend (load the voice, build the client)
    async fn initialize(&self) -> VoxResult<()>;

    /// Start synthesizing `text`. Audio is produced as the stream is polled.
    async fn synthesize(&self, text: &str) -> VoxResult<AudioStream>;

    /// Release backend resources. Safe to call repeatedly.
    async fn close(&self) -> VoxResult<()>;

    /// Check that the backend is usable without synthesizing
    async fn health_check(&self) -> bool {
        true
    }

    /// Get the engine name
    fn name(&self) -> &str;
}

/// Factory to create the configured TTS engine
pub fn create_synthesizer(config: &Config) -> VoxResult<Arc<dyn SpeechSynthesizer>> {
    let settings = &config.synthesizer;
    info!("🛠️ Creating TTS engine: {}", settings.engine);
    let engine: Arc<dyn SpeechSynthesizer> = match settings.engine.as_str() {
        "piper" => {
            info!("  - Using Piper TTS (Voice: {})", settings.piper_voice);
            Arc::new(PiperSynthesizer::new(settings))
        }
        "http" => {
            info!("  - Using HTTP TTS ({})", settings.http_url);
            Arc::new(HttpSynthesizer::new(settings))
        }
        other => {
            return Err(VoxError::Config(format!(
                "unknown synthesizer engine '{other}'"
            )))
        }
    };
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_engine() {
        let mut config = Config::default();
        config.synthesizer.engine = "http".to_string();
        assert_eq!(create_synthesizer(&config).unwrap().name(), "http");

        config.synthesizer.engine = "piper".to_string();
        assert_eq!(create_synthesizer(&config).unwrap().name(), "piper");
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let mut config = Config::default();
        config.synthesizer.engine = "speechd".to_string();
        assert!(matches!(
            create_synthesizer(&config),
            Err(VoxError::Config(_))
        ));
    }
}
