//! Voxline Error Types
//!
//! Centralized error handling for the pipeline and its leaf services.

use std::time::Duration;
use thiserror::Error;

/// Central error type for Voxline
#[derive(Error, Debug)]
pub enum VoxError {
    /// Recognizer or synthesizer backend unreachable at connect/initialize
    #[error("Connection error: {0}")]
    Connection(String),

    /// Mid-stream recognizer failure
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// Response generator backend failure
    #[error("Generation error: {0}")]
    Generation(String),

    /// Mid-stream synthesizer or audio egress failure
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Expected outcome of a barge-in; never surfaced to the caller
    #[error("Cancelled")]
    Cancelled,

    #[error("{stage} timed out after {after:?}")]
    Timeout {
        stage: &'static str,
        after: Duration,
    },

    #[error("Pipeline already started")]
    AlreadyStarted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoxError {
    /// Barge-in cancellation is not a failure and must not count toward escalation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VoxError::Cancelled)
    }
}

/// Result type alias for Voxline operations
pub type VoxResult<T> = Result<T, VoxError>;
