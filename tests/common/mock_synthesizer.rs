//! Mock synthesizer for testing
//!
//! Produces numbered chunks at a fixed pace and tracks how many synthesis
//! streams are alive at once.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voxline::tts::{AudioStream, SpeechSynthesizer};
use voxline::{VoxError, VoxResult};

pub const CHUNK_BYTES: usize = 4;

pub struct MockSynthesizer {
    chunks_per_reply: usize,
    chunk_delay: Duration,
    /// Fail the stream instead of producing this chunk index
    pub fail_at: Option<usize>,
    /// Every text handed to `synthesize`
    pub texts: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    pub closes: AtomicUsize,
}

/// Counts a live stream until dropped
struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>, max_active: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockSynthesizer {
    pub fn new(chunks_per_reply: usize, chunk_delay: Duration) -> Self {
        Self {
            chunks_per_reply,
            chunk_delay,
            fail_at: None,
            texts: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            closes: AtomicUsize::new(0),
        }
    }

    /// Short reply: 5 chunks, 10 ms apart
    pub fn quick() -> Self {
        Self::new(5, Duration::from_millis(10))
    }

    /// Long reply that keeps the pipeline speaking for ~2 s
    pub fn long() -> Self {
        Self::new(100, Duration::from_millis(20))
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn initialize(&self) -> VoxResult<()> {
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> VoxResult<AudioStream> {
        self.texts.lock().unwrap().push(text.to_string());

        let guard = ActiveGuard::new(self.active.clone(), &self.max_active);
        let total = self.chunks_per_reply;
        let delay = self.chunk_delay;
        let fail_at = self.fail_at;

        Ok(stream::unfold((0usize, guard), move |(index, guard)| async move {
            if index >= total {
                return None;
            }
            tokio::time::sleep(delay).await;
            if fail_at == Some(index) {
                let err = VoxError::Synthesis("mock voice crashed".to_string());
                return Some((Err(err), (total, guard)));
            }
            Some((Ok(vec![index as u8; CHUNK_BYTES]), (index + 1, guard)))
        })
        .boxed())
    }

    async fn close(&self) -> VoxResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
