//! Audio helpers
//!
//! PCM format math, frame energy, utterance endpointing, fixed-size
//! re-chunking, and the outbound audio sink exposed to the telephony side.
//! Audio is treated as little-endian signed PCM; codecs are the transport's job.

pub mod endpoint;
pub mod output;

use serde::{Deserialize, Serialize};

pub use endpoint::{EndpointEvent, Endpointer};
pub use output::AudioOutput;

/// One frame of encoded audio, produced, forwarded and discarded
pub type AudioChunk = Vec<u8>;

/// Level reported for digital silence
pub const SILENCE_DBFS: f32 = -96.0;

/// PCM layout shared with the telephony transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    /// Bytes per sample
    pub sample_width: u8,
    pub channels: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            sample_width: 2,
            channels: 1,
        }
    }
}

impl AudioFormat {
    fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.sample_width as u64 * self.channels as u64
    }

    /// Playback duration of `len` bytes
    pub fn duration_ms(&self, len: usize) -> f64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0.0;
        }
        len as f64 * 1000.0 / bps as f64
    }

    /// Byte length of `ms` milliseconds, rounded down to a whole frame
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        let frame = (self.sample_width as usize * self.channels as usize).max(1);
        let raw = (self.bytes_per_second() * ms as u64 / 1000) as usize;
        (raw / frame * frame).max(frame)
    }
}

/// Decode little-endian 16-bit samples; a trailing odd byte is ignored
pub fn samples_from_le_bytes(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Calculate RMS audio energy
pub fn calculate_energy(samples: impl Iterator<Item = i16>) -> f32 {
    let (sum, count) = samples.fold((0i64, 0usize), |(sum, count), s| {
        (sum + (s as i64).pow(2), count + 1)
    });
    if count == 0 {
        return 0.0;
    }
    (sum as f32 / count as f32).sqrt()
}

/// RMS level of a 16-bit PCM frame relative to full scale
pub fn energy_dbfs(frame: &[u8]) -> f32 {
    let rms = calculate_energy(samples_from_le_bytes(frame));
    if rms <= 0.0 {
        return SILENCE_DBFS;
    }
    (20.0 * (rms / i16::MAX as f32).log10()).max(SILENCE_DBFS)
}

/// Re-slices an arbitrary byte stream into fixed-size chunks
#[derive(Debug)]
pub struct Rechunker {
    chunk_bytes: usize,
    pending: Vec<u8>,
}

impl Rechunker {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes: chunk_bytes.max(1),
            pending: Vec::with_capacity(chunk_bytes),
        }
    }

    /// Buffer `data` and return every complete chunk now available
    pub fn push(&mut self, data: &[u8]) -> Vec<AudioChunk> {
        self.pending.extend_from_slice(data);
        let ready = self.pending.len() / self.chunk_bytes;
        if ready == 0 {
            return Vec::new();
        }
        let tail = self.pending.split_off(ready * self.chunk_bytes);
        let full = std::mem::replace(&mut self.pending, tail);
        full.chunks(self.chunk_bytes).map(<[u8]>::to_vec).collect()
    }

    /// The short remainder, if any
    pub fn finish(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
