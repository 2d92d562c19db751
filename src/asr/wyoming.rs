//! Wyoming Protocol Client
//!
//! Streams call audio to a Wyoming ASR service (e.g., wyoming-faster-whisper).
//! Each event is a JSON header line, optionally followed by a JSON data block
//! (`data_length`) and a binary payload (`payload_length`).
//!
//! Reference: https://github.com/rhasspy/wyoming

use super::{SpeechRecognizer, TranscriptEvent, TranscriptSink};
use crate::audio::{energy_dbfs, AudioFormat, EndpointEvent, Endpointer};
use crate::config::RecognizerConfig;
use crate::error::{VoxError, VoxResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, info, trace, warn};

/// Upper bound on a JSON data block
const MAX_DATA_BYTES: usize = 1024 * 1024;
/// Upper bound on a binary payload
const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire header
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

/// One Wyoming event
#[derive(Debug, Clone, PartialEq)]
pub struct WyomingEvent {
    pub event_type: String,
    pub data: Value,
    pub payload: Option<Vec<u8>>,
}

impl WyomingEvent {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            data: Value::Null,
            payload: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.data.get("text").and_then(Value::as_str)
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> VoxResult<()> {
        let header = Header {
            event_type: self.event_type.clone(),
            data: (!self.data.is_null()).then(|| self.data.clone()),
            data_length: None,
            payload_length: self.payload.as_ref().map(Vec::len),
        };

        let mut line = serde_json::to_vec(&header)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        if let Some(payload) = &self.payload {
            writer.write_all(payload).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Read the next event. `None` means the peer closed cleanly.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> VoxResult<Option<Self>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let header: Header = serde_json::from_str(line.trim())?;
        let mut data = header.data.unwrap_or(Value::Null);

        if let Some(len) = header.data_length.filter(|len| *len > 0) {
            let block = read_block(reader, len, MAX_DATA_BYTES).await?;
            merge_data(&mut data, serde_json::from_slice(&block)?);
        }

        let payload = match header.payload_length.filter(|len| *len > 0) {
            Some(len) => Some(read_block(reader, len, MAX_PAYLOAD_BYTES).await?),
            None => None,
        };

        Ok(Some(Self {
            event_type: header.event_type,
            data,
            payload,
        }))
    }
}

async fn read_block<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    len: usize,
    limit: usize,
) -> VoxResult<Vec<u8>> {
    if len > limit {
        return Err(VoxError::Transcription(format!(
            "Wyoming block of {len} bytes exceeds limit of {limit}"
        )));
    }
    let mut block = vec![0u8; len];
    reader.read_exact(&mut block).await?;
    Ok(block)
}

/// Inline `data` and a trailing data block are merged; the block wins
fn merge_data(into: &mut Value, extra: Value) {
    match extra {
        Value::Object(extra) if into.is_object() => {
            if let Some(base) = into.as_object_mut() {
                base.extend(extra);
            }
        }
        other => *into = other,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Session {
    writer: OwnedWriteHalf,
    endpointer: Endpointer,
}

/// Streaming Wyoming recognizer
pub struct WyomingRecognizer {
    host: String,
    port: u16,
    language: Option<String>,
    format: AudioFormat,
    connect_attempts: usize,
    threshold_dbfs: f32,
    hangover_ms: u32,
    sink: Arc<Mutex<Option<TranscriptSink>>>,
    session: tokio::sync::Mutex<Option<Session>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl WyomingRecognizer {
    pub fn new(config: &RecognizerConfig, format: AudioFormat) -> Self {
        Self {
            host: config.wyoming_host.clone(),
            port: config.wyoming_port,
            language: config.language.clone(),
            format,
            connect_attempts: config.connect_attempts.max(1),
            threshold_dbfs: config.threshold_dbfs,
            hangover_ms: config.hangover_ms,
            sink: Arc::new(Mutex::new(None)),
            session: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    fn audio_data(&self) -> Value {
        json!({
            "rate": self.format.sample_rate,
            "width": self.format.sample_width,
            "channels": self.format.channels,
        })
    }

    async fn write_frame(
        &self,
        session: &mut Session,
        boundary: EndpointEvent,
        frame: &[u8],
    ) -> VoxResult<()> {
        let chunk = || {
            WyomingEvent::new("audio-chunk")
                .with_data(self.audio_data())
                .with_payload(frame.to_vec())
        };

        match boundary {
            EndpointEvent::Silence => Ok(()),
            EndpointEvent::SpeechStart => {
                let mut transcribe = WyomingEvent::new("transcribe");
                if let Some(language) = &self.language {
                    transcribe = transcribe.with_data(json!({ "language": language }));
                }
                transcribe.write_to(&mut session.writer).await?;
                WyomingEvent::new("audio-start")
                    .with_data(self.audio_data())
                    .write_to(&mut session.writer)
                    .await?;
                chunk().write_to(&mut session.writer).await
            }
            EndpointEvent::Speech => chunk().write_to(&mut session.writer).await,
            EndpointEvent::SpeechEnd => {
                chunk().write_to(&mut session.writer).await?;
                WyomingEvent::new("audio-stop")
                    .write_to(&mut session.writer)
                    .await
            }
        }
    }
}

#[async_trait]
impl SpeechRecognizer for WyomingRecognizer {
    async fn connect(&self) -> VoxResult<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            debug!("Wyoming session already open");
            return Ok(());
        }

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(Duration::from_secs(1))
            .map(jitter)
            .take(self.connect_attempts - 1);
        let stream = Retry::spawn(strategy, || {
            TcpStream::connect((self.host.as_str(), self.port))
        })
        .await
        .map_err(|e| {
            VoxError::Connection(format!(
                "Wyoming server {}:{} unreachable: {}",
                self.host, self.port, e
            ))
        })?;
        let _ = stream.set_nodelay(true);

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        // Send Describe (handshake) and expect Info back
        WyomingEvent::new("describe").write_to(&mut writer).await?;
        let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, WyomingEvent::read_from(&mut reader))
            .await
            .map_err(|_| VoxError::Connection("Wyoming handshake timed out".to_string()))??;
        match reply {
            Some(event) if event.event_type == "info" => {
                debug!("Wyoming handshake: {}", event.data);
            }
            Some(event) => {
                return Err(VoxError::Connection(format!(
                    "unexpected Wyoming handshake reply '{}'",
                    event.event_type
                )))
            }
            None => {
                return Err(VoxError::Connection(
                    "Wyoming server closed during handshake".to_string(),
                ))
            }
        }

        *lock(&self.failure) = None;
        let task = tokio::spawn(read_transcripts(
            reader,
            self.sink.clone(),
            self.failure.clone(),
            Instant::now(),
        ));
        if let Some(previous) = lock(&self.reader).replace(task) {
            previous.abort();
        }

        *session = Some(Session {
            writer,
            endpointer: Endpointer::new(self.threshold_dbfs, self.hangover_ms),
        });
        info!("🎧 Wyoming session open at {}:{}", self.host, self.port);
        Ok(())
    }

    async fn send_audio(&self, frame: &[u8]) -> VoxResult<()> {
        if let Some(reason) = lock(&self.failure).clone() {
            return Err(VoxError::Transcription(reason));
        }

        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| VoxError::Transcription("Wyoming session not connected".to_string()))?;

        let frame_ms = self.format.duration_ms(frame.len());
        let level = energy_dbfs(frame);
        let boundary = session.endpointer.push(frame_ms, level);
        trace!(
            bytes = frame.len(),
            level_dbfs = level,
            ?boundary,
            "frame to recognizer"
        );

        self.write_frame(session, boundary, frame)
            .await
            .map_err(|e| VoxError::Transcription(format!("failed to stream audio: {e}")))
    }

    fn on_transcript(&self, sink: TranscriptSink) {
        if lock(&self.sink).replace(sink).is_some() {
            warn!("Transcript consumer replaced; only one consumer is supported");
        }
    }

    async fn close(&self) -> VoxResult<()> {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            if session.endpointer.in_speech() {
                let _ = WyomingEvent::new("audio-stop")
                    .write_to(&mut session.writer)
                    .await;
            }
            let _ = session.writer.shutdown().await;
            info!("Wyoming session closed");
        }
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(_) => {
                debug!("Wyoming server available at {}:{}", self.host, self.port);
                true
            }
            Err(e) => {
                warn!("Wyoming server not available: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        "wyoming"
    }
}

/// Background receive loop: server events in, transcript events out
async fn read_transcripts(
    mut reader: BufReader<OwnedReadHalf>,
    sink: Arc<Mutex<Option<TranscriptSink>>>,
    failure: Arc<Mutex<Option<String>>>,
    epoch: Instant,
) {
    loop {
        let event = match WyomingEvent::read_from(&mut reader).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                *lock(&failure) = Some("Wyoming server closed the connection".to_string());
                break;
            }
            Err(e) => {
                warn!("Wyoming receive failed: {}", e);
                *lock(&failure) = Some(format!("Wyoming protocol error: {e}"));
                break;
            }
        };

        let timestamp_ms = epoch.elapsed().as_secs_f64() * 1000.0;
        let transcript = match event.event_type.as_str() {
            "transcript-chunk" => event
                .text()
                .map(|text| TranscriptEvent::partial(text, timestamp_ms)),
            "transcript" => {
                let confidence = event
                    .data
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0) as f32;
                Some(TranscriptEvent::utterance_end(
                    event.text().unwrap_or_default(),
                    confidence,
                    timestamp_ms,
                ))
            }
            "error" => {
                warn!("Wyoming server error: {}", event.text().unwrap_or("unknown"));
                None
            }
            other => {
                trace!("Ignoring Wyoming event '{}'", other);
                None
            }
        };

        let Some(transcript) = transcript else {
            continue;
        };

        let consumer = lock(&sink).clone();
        match consumer {
            Some(tx) => {
                if tx.send(transcript).await.is_err() {
                    debug!("Transcript consumer dropped, stopping Wyoming reader");
                    break;
                }
            }
            None => warn!("No transcript consumer registered, dropping event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn frame(amplitude: i16) -> Vec<u8> {
        (0..320)
            .flat_map(|i| {
                let s = if i % 2 == 0 { amplitude } else { -amplitude };
                s.to_le_bytes()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_event_with_payload_roundtrip() {
        let event = WyomingEvent::new("audio-chunk")
            .with_data(json!({"rate": 16000, "width": 2, "channels": 1}))
            .with_payload(vec![1, 2, 3, 4]);

        let mut wire = Vec::new();
        event.write_to(&mut wire).await.unwrap();

        let header_end = wire.iter().position(|b| *b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&wire[..header_end]).unwrap();
        assert_eq!(header["type"], "audio-chunk");
        assert_eq!(header["payload_length"], 4);

        let mut reader = BufReader::new(&wire[..]);
        let decoded = WyomingEvent::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded, Some(event));
        assert_eq!(WyomingEvent::read_from(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_separate_data_block_is_merged() {
        let data = br#"{"text":"i need a plumber"}"#;
        let mut wire = format!(
            "{{\"type\":\"transcript\",\"data\":{{\"language\":\"en\"}},\"data_length\":{}}}\n",
            data.len()
        )
        .into_bytes();
        wire.extend_from_slice(data);

        let mut reader = BufReader::new(&wire[..]);
        let event = WyomingEvent::read_from(&mut reader).await.unwrap().unwrap();
        assert_eq!(event.text(), Some("i need a plumber"));
        assert_eq!(event.data["language"], "en");
        assert!(event.payload.is_none());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let wire = format!(
            "{{\"type\":\"audio-chunk\",\"payload_length\":{}}}\n",
            MAX_PAYLOAD_BYTES + 1
        );
        let mut reader = BufReader::new(wire.as_bytes());
        let err = WyomingEvent::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, VoxError::Transcription(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = RecognizerConfig {
            wyoming_host: "127.0.0.1".to_string(),
            wyoming_port: port,
            connect_attempts: 1,
            ..RecognizerConfig::default()
        };
        let recognizer = WyomingRecognizer::new(&config, AudioFormat::default());
        let err = recognizer.connect().await.unwrap_err();
        assert!(matches!(err, VoxError::Connection(_)));
    }

    #[tokio::test]
    async fn test_streams_utterance_and_delivers_transcripts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut read = BufReader::new(read);

            let describe = WyomingEvent::read_from(&mut read).await.unwrap().unwrap();
            assert_eq!(describe.event_type, "describe");
            WyomingEvent::new("info")
                .with_data(json!({"asr": [{"name": "fake"}]}))
                .write_to(&mut write)
                .await
                .unwrap();

            let mut seen = Vec::new();
            let mut audio_bytes = 0;
            loop {
                let event = WyomingEvent::read_from(&mut read).await.unwrap().unwrap();
                audio_bytes += event.payload.as_ref().map_or(0, Vec::len);
                seen.push(event.event_type.clone());
                if event.event_type == "audio-stop" {
                    break;
                }
            }

            WyomingEvent::new("transcript-chunk")
                .with_data(json!({"text": "i need"}))
                .write_to(&mut write)
                .await
                .unwrap();
            WyomingEvent::new("transcript")
                .with_data(json!({"text": "i need a plumber", "confidence": 0.9}))
                .write_to(&mut write)
                .await
                .unwrap();
            (seen, audio_bytes)
        });

        let config = RecognizerConfig {
            wyoming_host: "127.0.0.1".to_string(),
            wyoming_port: port,
            hangover_ms: 40,
            ..RecognizerConfig::default()
        };
        let recognizer = WyomingRecognizer::new(&config, AudioFormat::default());
        let (tx, mut rx) = mpsc::channel(8);
        recognizer.on_transcript(tx);
        recognizer.connect().await.unwrap();

        recognizer.send_audio(&frame(0)).await.unwrap();
        recognizer.send_audio(&frame(8000)).await.unwrap();
        recognizer.send_audio(&frame(8000)).await.unwrap();
        recognizer.send_audio(&frame(0)).await.unwrap();
        recognizer.send_audio(&frame(0)).await.unwrap();

        let partial = rx.recv().await.unwrap();
        assert_eq!(partial.text, "i need");
        assert!(!partial.speech_final);

        let last = rx.recv().await.unwrap();
        assert_eq!(last.text, "i need a plumber");
        assert!(last.speech_final);
        assert!((last.confidence - 0.9).abs() < 1e-6);

        let (seen, audio_bytes) = server.await.unwrap();
        assert_eq!(
            seen,
            vec![
                "transcribe",
                "audio-start",
                "audio-chunk",
                "audio-chunk",
                "audio-chunk",
                "audio-chunk",
                "audio-stop"
            ]
        );
        assert_eq!(audio_bytes, 4 * 640);

        recognizer.close().await.unwrap();
        recognizer.close().await.unwrap();
    }
}
