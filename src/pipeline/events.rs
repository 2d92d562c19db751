//! Pipeline events broadcast to observers (telephony layer, logging, tests).

use super::{PipelineMetrics, PipelineState, TransitionReason};
use crate::asr::TranscriptEvent;
use serde::Serialize;

/// Pipeline events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StateChanged {
        from: PipelineState,
        to: PipelineState,
        reason: TransitionReason,
    },
    /// Every recognizer event, partial or final
    Transcript(TranscriptEvent),
    /// First audio of a reply reached the caller
    TurnCompleted(PipelineMetrics),
    /// A turn was abandoned; the call continues
    TurnFailed {
        turn: u64,
        stage: &'static str,
        error: String,
    },
    /// Caller interrupted; `chunks_sent` reached the caller before the cut
    BargeIn { turn: u64, chunks_sent: usize },
    /// Too many failures; hand the caller to a human
    EscalationRequested { failures: u32 },
}
