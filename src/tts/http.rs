//! HTTP TTS backend
//!
//! POSTs the text to a synthesis endpoint that answers with raw PCM and
//! re-slices the response body into fixed playback chunks as it arrives.

use super::{AudioStream, SpeechSynthesizer};
use crate::audio::{AudioChunk, Rechunker};
use crate::config::SynthesizerConfig;
use crate::error::{VoxError, VoxResult};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HttpSynthesizer {
    url: String,
    api_key: Option<String>,
    voice: String,
    sample_rate: u32,
    chunk_bytes: usize,
    timeout: Duration,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpSynthesizer {
    pub fn new(config: &SynthesizerConfig) -> Self {
        Self {
            url: config.http_url.clone(),
            api_key: config.http_api_key.clone(),
            voice: config.http_voice.clone(),
            sample_rate: config.output_format.sample_rate,
            chunk_bytes: config.output_format.bytes_for_ms(config.chunk_ms),
            timeout: config.request_timeout(),
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn initialize(&self) -> VoxResult<()> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| VoxError::Config(format!("invalid TTS API key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .timeout(self.timeout)
            .build()
            .map_err(|e| VoxError::Connection(format!("failed to build TTS client: {e}")))?;

        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);
        info!("✅ HTTP TTS ready ({})", self.url);
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> VoxResult<AudioStream> {
        let client = self
            .client()
            .ok_or_else(|| VoxError::Synthesis("HTTP TTS not initialized".to_string()))?;

        debug!("📢 HTTP TTS synthesizing: '{}'", text);
        let response = client
            .post(&self.url)
            .json(&serde_json::json!({
                "text": text,
                "voice": self.voice,
                "sample_rate": self.sample_rate,
            }))
            .send()
            .await
            .map_err(|e| VoxError::Synthesis(format!("TTS request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("❌ TTS API Error ({}): {}", status, body);
            return Err(VoxError::Synthesis(format!("TTS API error {status}: {body}")));
        }

        Ok(rechunk_stream(response.bytes_stream(), self.chunk_bytes))
    }

    async fn close(&self) -> VoxResult<()> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let Some(client) = self.client() else {
            return false;
        };
        // Any HTTP answer means the service is up; 405 on GET is normal
        match client
            .get(&self.url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(resp) => !resp.status().is_server_error(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

struct Rechunked<S> {
    body: Pin<Box<S>>,
    rechunker: Rechunker,
    ready: VecDeque<AudioChunk>,
    finished: bool,
}

/// Turn an arbitrarily-sliced byte stream into fixed-size audio chunks.
/// A body error ends the stream after yielding it.
pub(crate) fn rechunk_stream<S, B, E>(body: S, chunk_bytes: usize) -> AudioStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = Rechunked {
        body: Box::pin(body),
        rechunker: Rechunker::new(chunk_bytes),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.ready.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let chunks = state.rechunker.push(bytes.as_ref());
                    state.ready.extend(chunks);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((
                        Err(VoxError::Synthesis(format!("TTS stream failed: {e}"))),
                        state,
                    ));
                }
                None => {
                    state.finished = true;
                    state.ready.extend(state.rechunker.finish());
                }
            }
        }
    })
    .boxed()
}
