//! Mock recognizer for testing
//!
//! Records every forwarded frame and lets the test play the backend's side
//! by emitting transcript events on demand.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voxline::asr::{SpeechRecognizer, TranscriptEvent, TranscriptSink};
use voxline::{VoxError, VoxResult};

#[derive(Default)]
pub struct MockRecognizer {
    /// All frames forwarded by the pipeline
    pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
    sink: Mutex<Option<TranscriptSink>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    /// Simulate an unreachable backend
    pub fail_connect: bool,
    /// Simulate a mid-stream failure on every send
    pub fail_send: AtomicBool,
    pub connect_delay: Option<Duration>,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Deliver one event to the pipeline as the backend would
    pub async fn emit(&self, event: TranscriptEvent) {
        let sink = self.sink.lock().unwrap().clone();
        sink.expect("no transcript consumer registered")
            .send(event)
            .await
            .expect("transcript consumer dropped");
    }

    /// The caller finished saying `text`
    pub async fn say(&self, text: &str) {
        self.emit(TranscriptEvent::utterance_end(text, 0.92, 0.0)).await;
    }

    pub async fn partial(&self, text: &str) {
        self.emit(TranscriptEvent::partial(text, 0.0)).await;
    }

    /// A stabilized segment: final text, but the caller is still talking
    pub async fn stable(&self, text: &str) {
        self.emit(TranscriptEvent {
            text: text.to_string(),
            is_final: true,
            confidence: 0.8,
            speech_final: false,
            timestamp_ms: 0.0,
        })
        .await;
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn connect(&self) -> VoxResult<()> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect {
            return Err(VoxError::Connection("mock recognizer unreachable".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_audio(&self, frame: &[u8]) -> VoxResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(VoxError::Transcription("mock stream broke".to_string()));
        }
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn on_transcript(&self, sink: TranscriptSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn close(&self) -> VoxResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
