//! Outbound audio egress toward the telephony transport.

use super::AudioChunk;
use crate::error::{VoxError, VoxResult};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Receives synthesized audio, one chunk at a time, in playback order
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn send(&self, chunk: AudioChunk) -> VoxResult<()>;
}

/// A channel into the transport's send loop
#[async_trait]
impl AudioOutput for mpsc::Sender<AudioChunk> {
    async fn send(&self, chunk: AudioChunk) -> VoxResult<()> {
        mpsc::Sender::send(self, chunk)
            .await
            .map_err(|_| VoxError::Synthesis("audio egress closed".to_string()))
    }
}
