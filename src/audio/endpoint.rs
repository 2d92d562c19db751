//! Energy-based utterance endpointing.
//!
//! Decides where an utterance starts and ends in a continuous frame stream so
//! the recognizer can bracket each utterance for the backend.

/// What a frame means for the current utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Outside an utterance
    Silence,
    /// First loud frame of an utterance
    SpeechStart,
    /// Inside an utterance (including short pauses)
    Speech,
    /// Hangover elapsed; this frame closes the utterance
    SpeechEnd,
}

#[derive(Debug, Clone)]
pub struct Endpointer {
    threshold_dbfs: f32,
    hangover_ms: f64,
    in_speech: bool,
    silence_ms: f64,
}

impl Endpointer {
    pub fn new(threshold_dbfs: f32, hangover_ms: u32) -> Self {
        Self {
            threshold_dbfs,
            hangover_ms: hangover_ms as f64,
            in_speech: false,
            silence_ms: 0.0,
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Feed one frame's duration and level
    pub fn push(&mut self, frame_ms: f64, level_dbfs: f32) -> EndpointEvent {
        let loud = level_dbfs >= self.threshold_dbfs;

        if !self.in_speech {
            if loud {
                self.in_speech = true;
                self.silence_ms = 0.0;
                return EndpointEvent::SpeechStart;
            }
            return EndpointEvent::Silence;
        }

        if loud {
            self.silence_ms = 0.0;
            return EndpointEvent::Speech;
        }

        self.silence_ms += frame_ms;
        if self.silence_ms >= self.hangover_ms {
            self.in_speech = false;
            self.silence_ms = 0.0;
            EndpointEvent::SpeechEnd
        } else {
            EndpointEvent::Speech
        }
    }
}
