//! Piper TTS backend calling a local binary
//!
//! Piper is run once per utterance with `--output_raw`, so PCM starts
//! flowing on stdout before the whole sentence is rendered.

use super::{AudioStream, SpeechSynthesizer};
use crate::audio::AudioChunk;
use crate::config::SynthesizerConfig;
use crate::error::{VoxError, VoxResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct PiperSynthesizer {
    binary: String,
    model_path: PathBuf,
    chunk_bytes: usize,
    ready: AtomicBool,
}

impl PiperSynthesizer {
    pub fn new(config: &SynthesizerConfig) -> Self {
        // A voice ending in .onnx is a path; anything else is looked up in voices_dir
        let model_path = if config.piper_voice.ends_with(".onnx") {
            PathBuf::from(&config.piper_voice)
        } else {
            Path::new(&config.voices_dir).join(format!("{}.onnx", config.piper_voice))
        };

        Self {
            binary: config.piper_binary.clone(),
            model_path,
            chunk_bytes: config.output_format.bytes_for_ms(config.chunk_ms),
            ready: AtomicBool::new(false),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    async fn initialize(&self) -> VoxResult<()> {
        if !self.model_path.exists() {
            warn!("⚠️ Piper model not found at {}", self.model_path.display());
            return Err(VoxError::Connection(format!(
                "Piper model file missing: {}",
                self.model_path.display()
            )));
        }
        self.ready.store(true, Ordering::SeqCst);
        info!("✅ Piper ready ({})", self.model_path.display());
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> VoxResult<AudioStream> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(VoxError::Synthesis("Piper not initialized".to_string()));
        }
        debug!("📢 Piper synthesizing: '{}'", text);

        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(&self.model_path)
            .arg("--output_raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!("❌ Failed to spawn {}: {}", self.binary, e);
                VoxError::Synthesis(format!("failed to spawn {}: {}", self.binary, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoxError::Synthesis("Piper stdout unavailable".to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = format!("{}\n", text);
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("Piper stdin closed early: {}", e);
                }
                // stdin dropped here so Piper sees EOF
            });
        }

        let run = PiperRun {
            child,
            stdout,
            chunk_bytes: self.chunk_bytes,
        };

        Ok(stream::unfold(Some(run), |state| async move {
            let mut run = state?;
            match run.read_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(run))),
                Ok(None) => run.finish().await.err().map(|e| (Err(e), None)),
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed())
    }

    async fn close(&self) -> VoxResult<()> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.model_path.exists()
    }

    fn name(&self) -> &str {
        "piper"
    }
}

/// One running Piper process. Dropping it kills the process.
struct PiperRun {
    child: Child,
    stdout: ChildStdout,
    chunk_bytes: usize,
}

impl PiperRun {
    async fn read_chunk(&mut self) -> VoxResult<Option<AudioChunk>> {
        let mut chunk = vec![0u8; self.chunk_bytes];
        let mut filled = 0;
        while filled < chunk.len() {
            let n = self
                .stdout
                .read(&mut chunk[filled..])
                .await
                .map_err(|e| VoxError::Synthesis(format!("Piper read failed: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        Ok(Some(chunk))
    }

    async fn finish(&mut self) -> VoxResult<()> {
        let status = self.child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(VoxError::Synthesis(format!(
                "Piper failed with status {}",
                status
            )))
        }
    }
}
