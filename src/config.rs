use crate::audio::AudioFormat;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Meta
    pub log_level: String,

    // Sections
    pub audio: AudioConfig,
    pub recognizer: RecognizerConfig,
    pub synthesizer: SynthesizerConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,

    // Data
    pub voice_corrections: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            audio: AudioConfig::default(),
            recognizer: RecognizerConfig::default(),
            synthesizer: SynthesizerConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            voice_corrections: HashMap::from([
                ("plummer".to_string(), "plumber".to_string()),
                ("electrition".to_string(), "electrician".to_string()),
            ]),
        }
    }
}

/// Inbound (caller) audio
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub format: AudioFormat,
    /// Telephony frame cadence
    pub frame_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            frame_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub engine: String,
    pub wyoming_host: String,
    pub wyoming_port: u16,
    pub language: Option<String>,
    pub connect_attempts: usize,
    /// Frames at or above this level count as speech
    pub threshold_dbfs: f32,
    /// Trailing silence that closes an utterance
    pub hangover_ms: u32,
    pub transcript_buffer: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            engine: "wyoming".to_string(),
            wyoming_host: "localhost".to_string(),
            wyoming_port: 10300,
            language: Some("en".to_string()),
            connect_attempts: 3,
            threshold_dbfs: -40.0,
            hangover_ms: 600,
            transcript_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    pub engine: String,

    // Piper
    pub piper_binary: String,
    pub piper_voice: String,
    pub voices_dir: String,

    // HTTP
    pub http_url: String,
    pub http_api_key: Option<String>,
    pub http_voice: String,
    pub request_timeout_ms: u64,

    /// Output format of the synthesizer; drives chunk sizing only
    pub output_format: AudioFormat,
    pub chunk_ms: u32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            engine: "piper".to_string(),
            piper_binary: "piper".to_string(),
            piper_voice: "en_US-lessac-medium".to_string(),
            voices_dir: dirs::data_dir()
                .unwrap_or_default()
                .join("voxline/voices")
                .to_string_lossy()
                .to_string(),
            http_url: "http://localhost:5002/api/tts".to_string(),
            http_api_key: None,
            http_voice: "default".to_string(),
            request_timeout_ms: 30_000,
            output_format: AudioFormat {
                sample_rate: 22050,
                ..AudioFormat::default()
            },
            chunk_ms: 20,
        }
    }
}

impl SynthesizerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub ollama_url: String,
    pub ollama_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_ms: u64,
    pub retry_attempts: usize,
    /// Most recent turns sent with each request; `None` sends the whole call
    pub context_turns: Option<usize>,
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3".to_string(),
            temperature: 0.6,
            max_tokens: 120,
            request_timeout_ms: 8_000,
            retry_attempts: 2,
            context_turns: None,
            system_prompt: None,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub connect_timeout_ms: u64,
    pub generation_timeout_ms: u64,
    /// Spoken instead of dead air once generation keeps timing out
    pub fallback_reply: Option<String>,
    pub fallback_after_timeouts: u32,
    pub escalation: Option<EscalationPolicy>,
    /// Caller audio the recognizer may fail on in a row before the call escalates
    pub recognizer_outage_ms: u64,
    pub barge_in: BargeInPolicy,
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            generation_timeout_ms: 10_000,
            fallback_reply: None,
            fallback_after_timeouts: 2,
            escalation: None,
            recognizer_outage_ms: 5_000,
            barge_in: BargeInPolicy::default(),
            event_buffer: 128,
        }
    }
}

impl PipelineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

/// Hand the call back to telephony after repeated turn failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub max_failures: u32,
    pub window_ms: u64,
}

impl EscalationPolicy {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Which inbound frames interrupt playback. The default interrupts on every frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInPolicy {
    pub min_energy_dbfs: Option<f32>,
    pub min_speech_ms: u32,
}

impl Config {
    /// Load config from the default location, or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load config from an explicit path. A corrupt file is set aside and defaults are used.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                let backup_path = path.with_extension("json.corrupt");
                let _ = std::fs::rename(path, &backup_path);
                Ok(Self::default())
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxline")
        .join("config.json")
}
