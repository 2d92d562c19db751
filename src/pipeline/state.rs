//! Pipeline lifecycle states and the legal transitions between them.

use serde::Serialize;
use std::fmt;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Not started, or stopped; inbound audio is dropped
    Idle,
    /// Forwarding caller audio to the recognizer
    Listening,
    /// A synthesis task is streaming audio to the caller
    Speaking,
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Start,
    /// Reply synthesis began after a final transcript
    SpeechFinal,
    /// Caller audio arrived while speaking
    BargeIn,
    /// Synthesis stream ran to completion
    PlaybackComplete,
    /// Synthesis stream or audio egress failed mid-reply
    SynthesisFailed,
    Stop,
}

impl PipelineState {
    /// Idle -> Listening -> Speaking -> Listening, and anything -> Idle
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Listening) | (Listening, Speaking) | (Speaking, Listening) | (_, Idle)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "IDLE",
            PipelineState::Listening => "LISTENING",
            PipelineState::Speaking => "SPEAKING",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineState::*;

    #[test]
    fn test_transition_table() {
        assert!(Idle.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Speaking));
        assert!(Speaking.can_transition_to(Listening));
        for state in [Idle, Listening, Speaking] {
            assert!(state.can_transition_to(Idle));
        }

        assert!(!Idle.can_transition_to(Speaking));
        assert!(!Listening.can_transition_to(Listening));
        assert!(!Speaking.can_transition_to(Speaking));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Speaking.to_string(), "SPEAKING");
    }
}
