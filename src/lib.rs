//! Voxline Library
//!
//! Duplex voice conversations for phone calls: streaming recognition,
//! reply generation and streaming synthesis wired into one interruptible
//! pipeline per call.

pub mod asr;
pub mod audio;
pub mod call;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod tts;

#[cfg(test)]
mod testing;

pub use error::{VoxError, VoxResult};
pub use pipeline::{PipelineEvent, PipelineMetrics, PipelineState, VoicePipeline};
