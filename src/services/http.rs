//! HTTP clients for the recognition, translation and synthesis services.
//!
//! Endpoints (relative to each configured base URL):
//! - `POST /sessions` opens a recognition session, `POST
//!   /sessions/{id}/audio` uploads PCM and `POST /sessions/{id}/finish`
//!   flushes it. All three answer with pending recognition results.
//! - `POST /translate` with `{text, target}` answers `{translated_text}`.
//! - `POST /synthesize` with `{text, language_code, voice, audio_encoding}`
//!   answers with the encoded audio bytes.

use crate::config::ServicesConfig;
use crate::defaults;
use crate::error::{Result, TransteekError};
use crate::services::{
    RecognitionConfig, RecognitionResult, RecognitionStream, ServiceClients, SpeechRecognizer,
    Synthesizer, Translator, VoiceSelection, summarize_body,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build HTTP clients for all three services, sharing one connection pool.
///
/// Every request, including each recognition upload, is bounded by
/// `call_timeout`.
pub fn clients(config: &ServicesConfig, call_timeout: Duration) -> Result<ServiceClients> {
    let http = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(call_timeout))
        .build()
        .map_err(|e| TransteekError::Other(format!("failed to build HTTP client: {e}")))?;

    let endpoint = |url: &str| {
        Endpoint::new(url, config.api_key.clone(), http.clone()).with_call_timeout(call_timeout)
    };

    Ok(ServiceClients::new(
        Arc::new(HttpRecognizer::new(endpoint(&config.transcription_url))),
        Arc::new(HttpTranslator::new(endpoint(&config.translation_url))),
        Arc::new(HttpSynthesizer::new(endpoint(&config.synthesis_url))),
    ))
}

/// Base URL plus credentials for one service.
#[derive(Clone)]
pub struct Endpoint {
    base_url: String,
    api_key: Option<String>,
    http: Client,
    call_timeout: Duration,
}

impl Endpoint {
    pub fn new(base_url: &str, api_key: Option<String>, http: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
            call_timeout: Duration::from_millis(defaults::SERVICE_TIMEOUT_MS),
        }
    }

    /// Bound on each request, from connecting until the body is read.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .timeout(self.call_timeout);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// Non-success answer from a service.
struct Rejected {
    message: String,
    retryable: bool,
}

async fn ensure_success(response: Response) -> std::result::Result<Response, Rejected> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Rejected {
        message: format!("HTTP {}: {}", status, summarize_body(&body)),
        retryable: is_retryable(status),
    })
}

/// Credentials and addressing problems will not fix themselves.
fn is_retryable(status: StatusCode) -> bool {
    !matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
    )
}

fn transcription_error(message: impl Into<String>) -> TransteekError {
    TransteekError::TranscriptionService {
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Recognition
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct OpenedSession {
    session_id: String,
}

#[derive(Deserialize, Default)]
struct PendingResults {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

pub struct HttpRecognizer {
    endpoint: Endpoint,
}

impl HttpRecognizer {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn open_stream(&self, config: RecognitionConfig) -> Result<RecognitionStream> {
        let response = self
            .endpoint
            .post("sessions")
            .json(&config)
            .send()
            .await
            .map_err(|e| transcription_error(format!("recognition service unreachable: {e}")))?;
        let response = ensure_success(response)
            .await
            .map_err(|r| transcription_error(r.message))?;
        let opened: OpenedSession = response
            .json()
            .await
            .map_err(|e| transcription_error(format!("malformed session response: {e}")))?;

        tracing::debug!(session_id = %opened.session_id, "recognition session opened");

        let (audio_tx, audio_rx) = mpsc::channel(defaults::UPLINK_BUFFER_FRAMES);
        let (results_tx, results_rx) = mpsc::channel(defaults::RESULT_BUFFER);
        tokio::spawn(pump_session(
            self.endpoint.clone(),
            opened.session_id,
            audio_rx,
            results_tx,
        ));

        Ok(RecognitionStream {
            audio: audio_tx,
            results: results_rx,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Uploads audio in order, forwarding whatever results each upload returns,
/// then finishes the session once the uplink is dropped.
async fn pump_session(
    endpoint: Endpoint,
    session_id: String,
    mut audio: mpsc::Receiver<Bytes>,
    results: mpsc::Sender<Result<RecognitionResult>>,
) {
    let audio_path = format!("sessions/{session_id}/audio");
    while let Some(chunk) = audio.recv().await {
        match post_for_results(&endpoint, &audio_path, Some(chunk)).await {
            Ok(batch) => {
                if !forward(&results, batch).await {
                    return;
                }
            }
            Err(e) => {
                let _ = results.send(Err(e)).await;
                return;
            }
        }
    }

    let finish_path = format!("sessions/{session_id}/finish");
    match post_for_results(&endpoint, &finish_path, None).await {
        Ok(batch) => {
            forward(&results, batch).await;
        }
        Err(e) => {
            let _ = results.send(Err(e)).await;
        }
    }
}

/// Returns false once the reader is gone.
async fn forward(
    results: &mpsc::Sender<Result<RecognitionResult>>,
    batch: Vec<RecognitionResult>,
) -> bool {
    for result in batch {
        if results.send(Ok(result)).await.is_err() {
            return false;
        }
    }
    true
}

async fn post_for_results(
    endpoint: &Endpoint,
    path: &str,
    audio: Option<Bytes>,
) -> Result<Vec<RecognitionResult>> {
    let mut request = endpoint.post(path);
    if let Some(audio) = audio {
        request = request
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio);
    }
    let response = request
        .send()
        .await
        .map_err(|e| transcription_error(format!("recognition upload failed: {e}")))?;
    let response = ensure_success(response)
        .await
        .map_err(|r| transcription_error(r.message))?;
    let pending: PendingResults = response
        .json()
        .await
        .map_err(|e| transcription_error(format!("malformed recognition results: {e}")))?;
    Ok(pending.results)
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    target: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

pub struct HttpTranslator {
    endpoint: Endpoint,
}

impl HttpTranslator {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, target: &str) -> Result<String> {
        let failed = |message: String, retryable: bool| TransteekError::TranslationService {
            message,
            retryable,
        };

        let response = self
            .endpoint
            .post("translate")
            .json(&TranslateRequest { text, target })
            .send()
            .await
            .map_err(|e| failed(format!("translation service unreachable: {e}"), true))?;
        let response = ensure_success(response)
            .await
            .map_err(|r| failed(r.message, r.retryable))?;
        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("malformed translation response: {e}"), true))?;
        Ok(body.translated_text)
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language_code: &'a str,
    voice: &'a str,
    audio_encoding: &'a str,
}

pub struct HttpSynthesizer {
    endpoint: Endpoint,
}

impl HttpSynthesizer {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceSelection) -> Result<Bytes> {
        let failed = |message: String, retryable: bool| TransteekError::SynthesisService {
            message,
            retryable,
        };

        let request = SynthesizeRequest {
            text,
            language_code: &voice.language_code,
            voice: &voice.name,
            audio_encoding: voice.encoding.as_str(),
        };
        let response = self
            .endpoint
            .post("synthesize")
            .json(&request)
            .send()
            .await
            .map_err(|e| failed(format!("synthesis service unreachable: {e}"), true))?;
        let response = ensure_success(response)
            .await
            .map_err(|r| failed(r.message, r.retryable))?;
        let audio = response
            .bytes()
            .await
            .map_err(|e| failed(format!("synthesis response interrupted: {e}"), true))?;
        if audio.is_empty() {
            return Err(failed("synthesis returned no audio".to_string(), true));
        }
        Ok(audio)
    }

    fn name(&self) -> &str {
        "http"
    }
}
