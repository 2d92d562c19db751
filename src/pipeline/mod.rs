//! Voice Pipeline
//!
//! Owns one call's conversation loop: caller audio goes to the recognizer,
//! final transcripts go to the response generator, replies go to the
//! synthesizer and stream back to the caller. Caller audio that arrives while
//! a reply is playing cancels the reply (barge-in).
//!
//! Three activities run concurrently per call:
//! - the transport's receive loop calling [`VoicePipeline::process_audio`]
//! - the transcript consumer task fed by the recognizer
//! - at most one synthesis task streaming chunks to the [`AudioOutput`]
//!
//! All mutable call state lives behind one lock in [`VoicePipeline`]; the
//! lock is never held across an await.

mod escalation;
pub mod events;
pub mod metrics;
pub mod state;

pub use events::PipelineEvent;
pub use metrics::PipelineMetrics;
pub use state::{PipelineState, TransitionReason};

use crate::asr::{self, SpeechRecognizer, TranscriptEvent};
use crate::audio::{energy_dbfs, AudioFormat, AudioOutput};
use crate::config::{Config, PipelineConfig};
use crate::core::{create_generator, DialogueTurn, ResponseGenerator, TextNormalizer};
use crate::error::{VoxError, VoxResult};
use crate::tts::{self, AudioStream, SpeechSynthesizer};
use escalation::FailureWindow;
use futures::StreamExt;
use metrics::TurnClock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Fresh,
    Starting,
    Running,
    Stopped,
}

/// The one running synthesis task
struct SynthesisHandle {
    turn: u64,
    cancel: CancellationToken,
    chunks_sent: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

enum Playback {
    Completed,
    Cancelled,
    Failed(VoxError),
}

struct Reply {
    text: String,
    fallback: bool,
}

struct Control {
    state: PipelineState,
    lifecycle: Lifecycle,
    synthesis: Option<SynthesisHandle>,
    metrics: PipelineMetrics,
    failures: FailureWindow,
    generation_timeouts: u32,
    recognizer_failing: bool,
    /// Caller audio lost to the current recognizer failure streak
    recognizer_outage_ms: f64,
    last_audio_at: Option<Instant>,
    next_turn: u64,
    /// Loud caller audio accumulated while speaking, for the barge-in gate
    loud_ms: f64,
    consumer: Option<JoinHandle<()>>,
}

struct Shared {
    call_id: String,
    config: PipelineConfig,
    format: AudioFormat,
    transcript_buffer: usize,
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    generator: tokio::sync::Mutex<Box<dyn ResponseGenerator>>,
    output: Arc<dyn AudioOutput>,
    normalizer: TextNormalizer,
    control: Mutex<Control>,
    /// Held by a synthesis task for its whole life
    speaker: Arc<tokio::sync::Mutex<()>>,
    events: broadcast::Sender<PipelineEvent>,
    shutdown: CancellationToken,
}

/// One call's pipeline. Cheap to clone; clones share the same call.
#[derive(Clone)]
pub struct VoicePipeline {
    inner: Arc<Shared>,
}

impl VoicePipeline {
    pub fn new(
        call_id: impl Into<String>,
        config: &Config,
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        generator: Box<dyn ResponseGenerator>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.pipeline.event_buffer.max(1));
        let control = Control {
            state: PipelineState::Idle,
            lifecycle: Lifecycle::Fresh,
            synthesis: None,
            metrics: PipelineMetrics::default(),
            failures: FailureWindow::new(config.pipeline.escalation.as_ref()),
            generation_timeouts: 0,
            recognizer_failing: false,
            recognizer_outage_ms: 0.0,
            last_audio_at: None,
            next_turn: 0,
            loud_ms: 0.0,
            consumer: None,
        };

        Self {
            inner: Arc::new(Shared {
                call_id: call_id.into(),
                config: config.pipeline.clone(),
                format: config.audio.format,
                transcript_buffer: config.recognizer.transcript_buffer.max(1),
                recognizer,
                synthesizer,
                generator: tokio::sync::Mutex::new(generator),
                output,
                normalizer: TextNormalizer::new(&config.voice_corrections),
                control: Mutex::new(control),
                speaker: Arc::new(tokio::sync::Mutex::new(())),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Build a pipeline with the configured backends
    pub fn from_config(
        call_id: impl Into<String>,
        config: &Config,
        output: Arc<dyn AudioOutput>,
    ) -> VoxResult<Self> {
        Ok(Self::new(
            call_id,
            config,
            asr::create_recognizer(config)?,
            tts::create_synthesizer(config)?,
            create_generator(config)?,
            output,
        ))
    }

    /// Connect the recognizer, initialize the synthesizer, start consuming
    /// transcripts, and enter `Listening`.
    ///
    /// A pipeline starts once. If start fails the instance is spent; build a
    /// new one to retry.
    pub async fn start(&self) -> VoxResult<()> {
        let shared = &self.inner;
        {
            let mut control = shared.control();
            if control.lifecycle != Lifecycle::Fresh {
                return Err(VoxError::AlreadyStarted);
            }
            control.lifecycle = Lifecycle::Starting;
        }

        let (tx, rx) = mpsc::channel(shared.transcript_buffer);
        shared.recognizer.on_transcript(tx);

        let timeout = shared.config.connect_timeout();
        let ready = async {
            shared.recognizer.connect().await?;
            shared.synthesizer.initialize().await
        };
        let result = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => Err(VoxError::Cancelled),
            outcome = tokio::time::timeout(timeout, ready) => match outcome {
                Ok(result) => result,
                Err(_) => Err(VoxError::Connection(format!(
                    "backends not ready after {timeout:?}"
                ))),
            },
        };

        if let Err(e) = result {
            if !e.is_cancellation() {
                error!(call_id = %shared.call_id, error = %e, "❌ Pipeline failed to start");
            }
            shared.control().lifecycle = Lifecycle::Stopped;
            shared.close_backends().await;
            return Err(e);
        }

        let consumer = tokio::spawn(consume_transcripts(shared.clone(), rx));
        {
            let mut control = shared.control();
            if control.lifecycle == Lifecycle::Starting {
                control.lifecycle = Lifecycle::Running;
                control.consumer = Some(consumer);
                shared.transition(&mut control, PipelineState::Listening, TransitionReason::Start);
                return Ok(());
            }
        }

        // stop() ran while we were connecting
        consumer.abort();
        shared.close_backends().await;
        Err(VoxError::Cancelled)
    }

    /// Feed one inbound caller frame. Never fails; problems are logged and
    /// reported as pipeline events.
    ///
    /// While `Speaking`, the frame first interrupts the reply: synthesis is
    /// cancelled and fully stopped before the frame is forwarded.
    pub async fn process_audio(&self, frame: &[u8]) {
        let shared = &self.inner;
        let interrupted = {
            let mut control = shared.control();
            match control.state {
                PipelineState::Idle => {
                    trace!(call_id = %shared.call_id, "Dropping frame while idle");
                    return;
                }
                PipelineState::Listening => {
                    control.loud_ms = 0.0;
                    None
                }
                PipelineState::Speaking => {
                    if shared.barge_in_passes(&mut control, frame) {
                        let handle = control.synthesis.take();
                        shared.transition(
                            &mut control,
                            PipelineState::Listening,
                            TransitionReason::BargeIn,
                        );
                        handle
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(handle) = interrupted {
            shared.interrupt(handle).await;
        }

        let result = shared.recognizer.send_audio(frame).await;
        let (failing, outage) = {
            let mut control = shared.control();
            control.last_audio_at = Some(Instant::now());
            match &result {
                Ok(()) => {
                    control.recognizer_failing = false;
                    control.recognizer_outage_ms = 0.0;
                    (None, None)
                }
                Err(_) => {
                    control.recognizer_outage_ms += shared.format.duration_ms(frame.len());
                    // One report per failure streak
                    let first = !control.recognizer_failing;
                    control.recognizer_failing = true;
                    let outage = if control.recognizer_outage_ms
                        >= shared.config.recognizer_outage_ms as f64
                    {
                        control.failures.escalate_now()
                    } else {
                        None
                    };
                    (first.then_some(control.next_turn), outage)
                }
            }
        };
        if let Err(e) = &result {
            if let Some(turn) = failing {
                shared.turn_failed(turn, "send_audio", e);
            }
        }
        if let Some(failures) = outage {
            error!(call_id = %shared.call_id, failures, "🚨 Recognizer down, requesting escalation");
            shared.emit(PipelineEvent::EscalationRequested { failures });
        }
    }

    /// Cancel any reply, close the backends and return to `Idle`.
    /// Safe to call repeatedly and before `start`.
    pub async fn stop(&self) -> VoxResult<()> {
        let shared = &self.inner;
        let (synthesis, consumer) = {
            let mut control = shared.control();
            if control.lifecycle == Lifecycle::Stopped {
                return Ok(());
            }
            control.lifecycle = Lifecycle::Stopped;
            shared.transition(&mut control, PipelineState::Idle, TransitionReason::Stop);
            (control.synthesis.take(), control.consumer.take())
        };

        shared.shutdown.cancel();
        if let Some(handle) = synthesis {
            handle.cancel.cancel();
            let _ = handle.task.await;
        }
        if let Some(consumer) = consumer {
            let _ = consumer.await;
        }

        let recognizer = shared.recognizer.close().await;
        let synthesizer = shared.synthesizer.close().await;
        info!(call_id = %shared.call_id, "📴 Pipeline stopped");
        recognizer.and(synthesizer)
    }

    pub fn state(&self) -> PipelineState {
        self.inner.control().state
    }

    /// Latencies of the most recent completed turn
    pub fn metrics(&self) -> PipelineMetrics {
        self.inner.control().metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of the dialogue so far. Waits for an in-flight generation.
    pub async fn dialogue(&self) -> Vec<DialogueTurn> {
        self.inner.generator.lock().await.history().to_vec()
    }

    pub fn call_id(&self) -> &str {
        &self.inner.call_id
    }
}

/// Transcript consumer: one task per call, handles events in order
async fn consume_transcripts(shared: Arc<Shared>, mut rx: mpsc::Receiver<TranscriptEvent>) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => {
                    debug!(call_id = %shared.call_id, "Transcript channel closed");
                    break;
                }
            },
        };
        shared.on_transcript(event).await;
    }
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, control: &mut Control, to: PipelineState, reason: TransitionReason) -> bool {
        let from = control.state;
        if from == to {
            return false;
        }
        if !from.can_transition_to(to) {
            warn!(call_id = %self.call_id, %from, %to, ?reason, "Rejected state transition");
            return false;
        }
        control.state = to;
        info!(call_id = %self.call_id, %from, %to, ?reason, "🔀 State change");
        self.emit(PipelineEvent::StateChanged { from, to, reason });
        true
    }

    fn barge_in_passes(&self, control: &mut Control, frame: &[u8]) -> bool {
        let policy = &self.config.barge_in;
        let Some(min_dbfs) = policy.min_energy_dbfs else {
            return true;
        };
        if energy_dbfs(frame) < min_dbfs {
            control.loud_ms = 0.0;
            return false;
        }
        control.loud_ms += self.format.duration_ms(frame.len());
        control.loud_ms >= policy.min_speech_ms as f64
    }

    async fn close_backends(&self) {
        if let Err(e) = self.recognizer.close().await {
            debug!("Recognizer close failed: {}", e);
        }
        if let Err(e) = self.synthesizer.close().await {
            debug!("Synthesizer close failed: {}", e);
        }
    }

    /// Cancel a reply and wait until its task has fully exited
    async fn interrupt(&self, handle: SynthesisHandle) {
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(call_id = %self.call_id, "Synthesis task ended abnormally: {}", e);
        }
        let chunks_sent = handle.chunks_sent.load(Ordering::SeqCst);
        info!(call_id = %self.call_id, turn = handle.turn, chunks_sent, "✋ Barge-in");
        self.emit(PipelineEvent::BargeIn {
            turn: handle.turn,
            chunks_sent,
        });
    }

    fn turn_failed(&self, turn: u64, stage: &'static str, error: &VoxError) {
        if error.is_cancellation() {
            return;
        }
        warn!(call_id = %self.call_id, turn, stage, %error, "⚠️ Turn failed");
        self.emit(PipelineEvent::TurnFailed {
            turn,
            stage,
            error: error.to_string(),
        });

        let escalate = self.control().failures.record(Instant::now());
        if let Some(failures) = escalate {
            error!(call_id = %self.call_id, failures, "🚨 Repeated failures, requesting escalation");
            self.emit(PipelineEvent::EscalationRequested { failures });
        }
    }

    async fn on_transcript(self: &Arc<Self>, event: TranscriptEvent) {
        self.emit(PipelineEvent::Transcript(event.clone()));
        if !event.speech_final {
            trace!(call_id = %self.call_id, text = %event.text, "Partial transcript");
            return;
        }

        let text = self.normalizer.clean_transcript(&event.text);
        if text.is_empty() {
            debug!(call_id = %self.call_id, raw = %event.text, "Empty final transcript, no turn");
            return;
        }

        let (mut clock, interrupted) = {
            let mut control = self.control();
            if control.lifecycle != Lifecycle::Running || control.state == PipelineState::Idle {
                debug!(call_id = %self.call_id, "Final transcript while idle, ignoring");
                return;
            }
            // A final that lands mid-reply means the caller talked over us
            let interrupted = if control.state == PipelineState::Speaking {
                let handle = control.synthesis.take();
                self.transition(&mut control, PipelineState::Listening, TransitionReason::BargeIn);
                handle
            } else {
                None
            };
            control.next_turn += 1;
            (TurnClock::start(control.next_turn, control.last_audio_at), interrupted)
        };

        if let Some(handle) = interrupted {
            self.interrupt(handle).await;
        }

        let turn = clock.turn;
        info!(call_id = %self.call_id, turn, text = %text, confidence = event.confidence, "🗣️ Caller turn");

        let Some(reply) = self.generate(turn, &text).await else {
            return;
        };
        clock.reply_ready();
        debug!(call_id = %self.call_id, turn, reply = %reply.text, "🧠 Reply ready");

        self.speak(clock, reply).await;
    }

    async fn generate(&self, turn: u64, text: &str) -> Option<Reply> {
        let timeout = self.config.generation_timeout();
        let outcome = {
            let mut generator = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                generator = self.generator.lock() => generator,
            };
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                outcome = tokio::time::timeout(timeout, generator.generate_response(text)) => outcome,
            }
        };

        match outcome {
            Ok(Ok(reply)) => {
                self.control().generation_timeouts = 0;
                Some(Reply {
                    text: reply,
                    fallback: false,
                })
            }
            Ok(Err(e)) => {
                self.turn_failed(turn, "generate_response", &e);
                None
            }
            Err(_) => {
                let timeouts = {
                    let mut control = self.control();
                    control.generation_timeouts += 1;
                    control.generation_timeouts
                };
                self.turn_failed(
                    turn,
                    "generate_response",
                    &VoxError::Timeout {
                        stage: "generate_response",
                        after: timeout,
                    },
                );
                match &self.config.fallback_reply {
                    Some(fallback) if timeouts >= self.config.fallback_after_timeouts.max(1) => {
                        info!(call_id = %self.call_id, turn, timeouts, "Speaking fallback reply");
                        Some(Reply {
                            text: fallback.clone(),
                            fallback: true,
                        })
                    }
                    _ => None,
                }
            }
        }
    }

    async fn speak(self: &Arc<Self>, clock: TurnClock, reply: Reply) {
        let turn = clock.turn;
        let text = self.normalizer.prepare_for_speech(&reply.text);
        if text.is_empty() {
            self.turn_failed(
                turn,
                "synthesize",
                &VoxError::Synthesis("reply is empty after formatting".to_string()),
            );
            return;
        }

        // Wait for any cancelled predecessor to release the speaker
        let permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            permit = self.speaker.clone().lock_owned() => permit,
        };
        let stream = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            stream = self.synthesizer.synthesize(&text) => stream,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                self.turn_failed(turn, "synthesize", &e);
                return;
            }
        };

        let mut control = self.control();
        if control.lifecycle != Lifecycle::Running || control.state != PipelineState::Listening {
            debug!(call_id = %self.call_id, turn, state = %control.state, "Dropping reply, pipeline moved on");
            return;
        }
        self.transition(&mut control, PipelineState::Speaking, TransitionReason::SpeechFinal);
        control.loud_ms = 0.0;

        let cancel = self.shutdown.child_token();
        let chunks_sent = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(self.clone().play(
            clock,
            reply.fallback,
            stream,
            cancel.clone(),
            chunks_sent.clone(),
            permit,
        ));
        control.synthesis = Some(SynthesisHandle {
            turn,
            cancel,
            chunks_sent,
            task,
        });
    }

    /// Synthesis task body: stream chunks to the caller until done or cancelled
    async fn play(
        self: Arc<Self>,
        clock: TurnClock,
        fallback: bool,
        mut stream: AudioStream,
        cancel: CancellationToken,
        chunks_sent: Arc<AtomicUsize>,
        _speaker: OwnedMutexGuard<()>,
    ) {
        let turn = clock.turn;
        let playback = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Playback::Cancelled,
                next = stream.next() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => break Playback::Failed(e),
                None => break Playback::Completed,
            };

            if chunks_sent.load(Ordering::SeqCst) == 0 {
                self.first_audio(&clock, fallback);
            }
            if cancel.is_cancelled() {
                break Playback::Cancelled;
            }
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Playback::Cancelled,
                sent = self.output.send(chunk) => sent,
            };
            if let Err(e) = sent {
                break Playback::Failed(e);
            }
            chunks_sent.fetch_add(1, Ordering::SeqCst);
        };
        drop(stream);

        let sent = chunks_sent.load(Ordering::SeqCst);
        match playback {
            Playback::Completed => {
                debug!(call_id = %self.call_id, turn, chunks = sent, "🔊 Reply finished");
                self.finish_playback(turn, TransitionReason::PlaybackComplete);
            }
            Playback::Cancelled => {
                debug!(call_id = %self.call_id, turn, chunks = sent, "Reply cancelled");
            }
            Playback::Failed(e) => {
                self.turn_failed(turn, "synthesize", &e);
                self.finish_playback(turn, TransitionReason::SynthesisFailed);
            }
        }
    }

    fn first_audio(&self, clock: &TurnClock, fallback: bool) {
        let metrics = clock.first_audio(Instant::now());
        {
            let mut control = self.control();
            control.metrics = metrics;
            // A fallback reply keeps the failure streak alive
            if !fallback {
                control.failures.reset();
            }
        }
        info!(
            call_id = %self.call_id,
            turn = metrics.turn,
            stt_ms = metrics.stt_latency_ms,
            llm_ms = metrics.llm_latency_ms,
            tts_ms = metrics.tts_latency_ms,
            total_ms = metrics.total_latency_ms,
            "⏱️ Turn latency"
        );
        self.emit(PipelineEvent::TurnCompleted(metrics));
    }

    /// Leave `Speaking` if this turn still owns playback
    fn finish_playback(&self, turn: u64, reason: TransitionReason) {
        let mut control = self.control();
        if control.synthesis.as_ref().map(|h| h.turn) != Some(turn) {
            return;
        }
        control.synthesis = None;
        self.transition(&mut control, PipelineState::Listening, reason);
    }
}
