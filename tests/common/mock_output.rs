//! Mock audio egress: records every chunk the caller would hear.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use voxline::audio::{AudioChunk, AudioOutput};
use voxline::VoxResult;

#[derive(Default)]
pub struct MockOutput {
    pub chunks: Arc<Mutex<Vec<AudioChunk>>>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    /// First byte of each chunk; the mock synthesizer numbers its chunks
    pub fn sequence(&self) -> Vec<u8> {
        self.chunks.lock().unwrap().iter().map(|c| c[0]).collect()
    }
}

#[async_trait]
impl AudioOutput for MockOutput {
    async fn send(&self, chunk: AudioChunk) -> VoxResult<()> {
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }
}
