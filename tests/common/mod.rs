#![allow(dead_code)]

pub mod mock_generator;
pub mod mock_output;
pub mod mock_recognizer;
pub mod mock_synthesizer;

use mock_generator::MockGenerator;
use mock_output::MockOutput;
use mock_recognizer::MockRecognizer;
use mock_synthesizer::MockSynthesizer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use voxline::config::Config;
use voxline::{PipelineEvent, VoicePipeline};

/// Upper bound for any single wait in a test
pub const WAIT: Duration = Duration::from_secs(3);

/// One 20 ms frame of 16 kHz PCM silence
pub fn frame() -> Vec<u8> {
    vec![0u8; 640]
}

/// One 20 ms frame of loud 16 kHz PCM
pub fn loud_frame() -> Vec<u8> {
    std::iter::repeat(8000i16.to_le_bytes())
        .take(320)
        .flatten()
        .collect()
}

/// Defaults with short timeouts
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.connect_timeout_ms = 500;
    config.pipeline.generation_timeout_ms = 1000;
    config
}

pub struct Harness {
    pub pipeline: VoicePipeline,
    pub recognizer: Arc<MockRecognizer>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub output: Arc<MockOutput>,
    pub calls: Arc<AtomicUsize>,
    pub prompts: Arc<Mutex<Vec<String>>>,
    pub events: broadcast::Receiver<PipelineEvent>,
}

impl Harness {
    pub fn new(config: Config, synthesizer: MockSynthesizer, generator: MockGenerator) -> Self {
        Self::with_recognizer(config, MockRecognizer::new(), synthesizer, generator)
    }

    pub fn with_recognizer(
        config: Config,
        recognizer: MockRecognizer,
        synthesizer: MockSynthesizer,
        generator: MockGenerator,
    ) -> Self {
        let recognizer = Arc::new(recognizer);
        let synthesizer = Arc::new(synthesizer);
        let output = Arc::new(MockOutput::new());
        let calls = generator.calls.clone();
        let prompts = generator.prompts.clone();

        let pipeline = VoicePipeline::new(
            "test-call",
            &config,
            recognizer.clone(),
            synthesizer.clone(),
            Box::new(generator),
            output.clone(),
        );
        let events = pipeline.subscribe();

        Self {
            pipeline,
            recognizer,
            synthesizer,
            output,
            calls,
            prompts,
            events,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Next event matching `pred`, skipping others
    pub async fn wait_for<F>(&mut self, mut pred: F) -> PipelineEvent
    where
        F: FnMut(&PipelineEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for pipeline event")
    }
}

/// Poll `cond` until it holds
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}
