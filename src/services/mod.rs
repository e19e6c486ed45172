//! External speech recognition, translation and synthesis services.
//!
//! These traits allow swapping implementations (HTTP clients vs scripted
//! stubs). Every call may fail or hang; callers bound them with timeouts.

pub mod http;
#[cfg(any(test, feature = "stub-services"))]
pub mod stub;

use crate::config::{AudioEncoding, ServiceMode, ServicesConfig};
use crate::defaults;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Parameters for opening a recognition stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognitionConfig {
    pub language_code: String,
    pub sample_rate_hertz: u32,
    pub encoding: String,
    pub enable_automatic_punctuation: bool,
    pub interim_results: bool,
}

impl RecognitionConfig {
    /// Streaming config for 16kHz LINEAR16 audio in `language_code`.
    pub fn for_language(language_code: &str) -> Self {
        Self {
            language_code: language_code.to_string(),
            sample_rate_hertz: defaults::SAMPLE_RATE,
            encoding: defaults::RECOGNITION_ENCODING.to_string(),
            enable_automatic_punctuation: true,
            interim_results: true,
        }
    }
}

/// One hypothesis from the recognition service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecognitionResult {
    pub transcript: String,
    /// Interim hypotheses may still change; only final ones are translated.
    pub is_final: bool,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl RecognitionResult {
    pub fn final_text(text: &str) -> Self {
        Self {
            transcript: text.to_string(),
            is_final: true,
            language_code: None,
        }
    }

    pub fn interim_text(text: &str) -> Self {
        Self {
            transcript: text.to_string(),
            is_final: false,
            language_code: None,
        }
    }
}

/// An open recognition stream.
///
/// Audio goes up through `audio`; dropping it half-closes the stream, after
/// which the service delivers its remaining results and closes `results`.
pub struct RecognitionStream {
    pub audio: mpsc::Sender<Bytes>,
    pub results: mpsc::Receiver<Result<RecognitionResult>>,
}

/// Streaming speech-to-text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn open_stream(&self, config: RecognitionConfig) -> Result<RecognitionStream>;

    fn name(&self) -> &str;
}

/// Text-to-text translation.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into the language with primary subtag `target`.
    async fn translate(&self, text: &str, target: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Voice used for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSelection {
    pub language_code: String,
    pub name: String,
    pub encoding: AudioEncoding,
}

/// Text-to-speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceSelection) -> Result<Bytes>;

    fn name(&self) -> &str;
}

/// Shared service handles used by every session.
#[derive(Clone)]
pub struct ServiceClients {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl ServiceClients {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            recognizer,
            translator,
            synthesizer,
        }
    }

    /// Build the clients selected by `services.mode`. `call_timeout` bounds
    /// every request the HTTP clients make.
    pub fn from_config(config: &ServicesConfig, call_timeout: Duration) -> Result<Self> {
        match config.mode {
            ServiceMode::Http => http::clients(config, call_timeout),
            ServiceMode::Stub => stub_clients(),
        }
    }

    /// Human-readable summary for startup logs.
    pub fn describe(&self) -> String {
        format!(
            "recognizer={} translator={} synthesizer={}",
            self.recognizer.name(),
            self.translator.name(),
            self.synthesizer.name()
        )
    }
}

#[cfg(any(test, feature = "stub-services"))]
fn stub_clients() -> Result<ServiceClients> {
    Ok(stub::demo_clients())
}

#[cfg(not(any(test, feature = "stub-services")))]
fn stub_clients() -> Result<ServiceClients> {
    Err(crate::error::TransteekError::NotImplemented {
        feature: "stub services (build with --features stub-services)".to_string(),
    })
}

/// Used by service clients to keep error bodies readable.
pub(crate) fn summarize_body(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX).collect();
        format!("{head}...")
    }
}
