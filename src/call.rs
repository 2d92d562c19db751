//! Call driver
//!
//! Maps the telephony transport's call events onto one [`VoicePipeline`]:
//! answer starts it, audio frames feed it, hangup stops it. An escalation
//! request from the pipeline ends the call so the transport can hand the
//! caller to a human.

use crate::audio::AudioChunk;
use crate::error::VoxResult;
use crate::pipeline::{PipelineEvent, VoicePipeline};
use serde::Serialize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What the telephony transport reports about a call
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Answered,
    /// One inbound frame of caller audio
    Audio(AudioChunk),
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEndReason {
    /// The transport reported the call ended
    Hangup,
    /// The pipeline asked for a human
    Escalated,
    /// The inbound event channel closed without a hangup
    TransportClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSummary {
    pub call_id: String,
    /// Inbound frames received, including any before answer
    pub frames: u64,
    /// Turns whose reply reached the caller
    pub turns: u64,
    pub end_reason: CallEndReason,
}

/// Drive `pipeline` from `inbound` until the call ends, then stop it.
///
/// Fails only if the pipeline cannot start; the call is over in that case.
pub async fn run_call(
    pipeline: VoicePipeline,
    mut inbound: mpsc::Receiver<CallEvent>,
) -> VoxResult<CallSummary> {
    let mut events = pipeline.subscribe();
    let mut answered = false;
    let mut frames = 0u64;
    let mut turns = 0u64;

    let end_reason = loop {
        tokio::select! {
            biased;
            event = events.recv(), if answered => match event {
                Ok(PipelineEvent::EscalationRequested { failures }) => {
                    warn!(call_id = pipeline.call_id(), failures, "📞 Ending call for escalation");
                    break CallEndReason::Escalated;
                }
                Ok(PipelineEvent::TurnCompleted(_)) => turns += 1,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(call_id = pipeline.call_id(), missed, "Call driver lagged behind pipeline events");
                }
                Err(RecvError::Closed) => answered = false,
            },
            event = inbound.recv() => match event {
                Some(CallEvent::Answered) if answered => {
                    debug!(call_id = pipeline.call_id(), "Duplicate answer ignored");
                }
                Some(CallEvent::Answered) => {
                    info!(call_id = pipeline.call_id(), "📞 Call answered");
                    pipeline.start().await?;
                    answered = true;
                }
                Some(CallEvent::Audio(frame)) => {
                    frames += 1;
                    pipeline.process_audio(&frame).await;
                }
                Some(CallEvent::Ended) => break CallEndReason::Hangup,
                None => break CallEndReason::TransportClosed,
            },
        }
    };

    if let Err(e) = pipeline.stop().await {
        warn!(call_id = pipeline.call_id(), "Pipeline shutdown reported: {}", e);
    }

    // Count replies that landed just before the end
    loop {
        match events.try_recv() {
            Ok(PipelineEvent::TurnCompleted(_)) => turns += 1,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    let summary = CallSummary {
        call_id: pipeline.call_id().to_string(),
        frames,
        turns,
        end_reason,
    };
    info!(
        call_id = %summary.call_id,
        frames = summary.frames,
        turns = summary.turns,
        end_reason = ?summary.end_reason,
        "📴 Call finished"
    );
    Ok(summary)
}
