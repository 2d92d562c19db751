//! Per-turn latency measurements

use serde::Serialize;
use std::time::{Duration, Instant};

/// Stage latencies of the most recent completed turn, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PipelineMetrics {
    /// 1-based turn number; 0 before the first turn completes
    pub turn: u64,
    /// Last forwarded frame to `speech_final` arrival
    pub stt_latency_ms: f64,
    /// `speech_final` arrival to reply text
    pub llm_latency_ms: f64,
    /// Reply text to first audio chunk
    pub tts_latency_ms: f64,
    /// `speech_final` arrival to first audio chunk
    pub total_latency_ms: f64,
}

/// Stage boundaries of one in-flight turn
#[derive(Debug, Clone, Copy)]
pub(crate) struct TurnClock {
    pub turn: u64,
    pub last_audio_at: Option<Instant>,
    pub final_at: Instant,
    pub reply_at: Option<Instant>,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl TurnClock {
    pub fn start(turn: u64, last_audio_at: Option<Instant>) -> Self {
        Self {
            turn,
            last_audio_at,
            final_at: Instant::now(),
            reply_at: None,
        }
    }

    pub fn reply_ready(&mut self) {
        self.reply_at = Some(Instant::now());
    }

    /// Close the turn at the first audio chunk
    pub fn first_audio(&self, at: Instant) -> PipelineMetrics {
        let reply_at = self.reply_at.unwrap_or(self.final_at);
        PipelineMetrics {
            turn: self.turn,
            stt_latency_ms: self
                .last_audio_at
                .map(|t| ms(self.final_at.saturating_duration_since(t)))
                .unwrap_or(0.0),
            llm_latency_ms: ms(reply_at.saturating_duration_since(self.final_at)),
            tts_latency_ms: ms(at.saturating_duration_since(reply_at)),
            total_latency_ms: ms(at.saturating_duration_since(self.final_at)),
        }
    }
}
