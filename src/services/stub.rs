//! Scripted in-process services for tests and offline demos.

use crate::defaults;
use crate::error::{Result, TransteekError};
use crate::services::{
    RecognitionConfig, RecognitionResult, RecognitionStream, ServiceClients, SpeechRecognizer,
    Synthesizer, Translator, VoiceSelection,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

/// Clients used by `services.mode = "stub"`: one utterance per second of
/// audio, tagged translations and text-as-audio synthesis.
pub fn demo_clients() -> ServiceClients {
    ServiceClients::new(
        Arc::new(MockRecognizer::counting(10)),
        Arc::new(MockTranslator::new()),
        Arc::new(MockSynthesizer::new()),
    )
}

/// Recognizer that replays a script.
///
/// Each audio chunk received releases the next scripted result; whatever is
/// left is delivered when the uplink is dropped.
#[derive(Clone, Default)]
pub struct MockRecognizer {
    script: Vec<RecognitionResult>,
    fail_after: Option<usize>,
    fail_open: bool,
    stall_uplink: bool,
    frames_per_utterance: Option<usize>,
    chunks_received: Arc<AtomicUsize>,
}

impl MockRecognizer {
    pub fn new(script: Vec<RecognitionResult>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Emit a final "utterance N" every `frames` chunks instead of a script.
    pub fn counting(frames: usize) -> Self {
        Self {
            frames_per_utterance: Some(frames.max(1)),
            ..Self::default()
        }
    }

    /// Fail the stream after `chunks` audio chunks.
    pub fn with_failure_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    /// Fail when the stream is opened.
    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Accept the stream but never read audio from it.
    pub fn with_stalled_uplink(mut self) -> Self {
        self.stall_uplink = true;
        self
    }

    /// Audio chunks received across all streams.
    pub fn chunks_received(&self) -> usize {
        self.chunks_received.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn open_stream(&self, _config: RecognitionConfig) -> Result<RecognitionStream> {
        if self.fail_open {
            return Err(TransteekError::TranscriptionService {
                message: "mock recognizer refused the stream".to_string(),
            });
        }

        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(defaults::UPLINK_BUFFER_FRAMES);
        let (results_tx, results_rx) = mpsc::channel(defaults::RESULT_BUFFER);
        if self.stall_uplink {
            tokio::spawn(async move {
                let _held = audio_rx;
                results_tx.closed().await;
            });
            return Ok(RecognitionStream {
                audio: audio_tx,
                results: results_rx,
            });
        }
        let mut pending = self.script.clone().into_iter();
        let fail_after = self.fail_after;
        let frames_per_utterance = self.frames_per_utterance;
        let counter = self.chunks_received.clone();

        tokio::spawn(async move {
            let mut received = 0usize;
            while audio_rx.recv().await.is_some() {
                received += 1;
                counter.fetch_add(1, Ordering::SeqCst);

                if fail_after == Some(received) {
                    let _ = results_tx
                        .send(Err(TransteekError::TranscriptionService {
                            message: format!("mock recognizer failed after {received} chunks"),
                        }))
                        .await;
                    return;
                }

                let next = match frames_per_utterance {
                    Some(frames) if received % frames == 0 => Some(RecognitionResult::final_text(
                        &format!("utterance {}", received / frames),
                    )),
                    Some(_) => None,
                    None => pending.next(),
                };
                if let Some(result) = next
                    && results_tx.send(Ok(result)).await.is_err()
                {
                    return;
                }
            }

            for result in pending {
                if results_tx.send(Ok(result)).await.is_err() {
                    return;
                }
            }
        });

        Ok(RecognitionStream {
            audio: audio_tx,
            results: results_rx,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Translator that tags text with the target language: `[fr] hello`.
#[derive(Clone, Default)]
pub struct MockTranslator {
    failing_texts: HashSet<String>,
    permanent_failures: bool,
    fail_all: bool,
    hanging_texts: HashSet<String>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a retryable error whenever `text` is translated.
    pub fn with_failure_on(mut self, text: &str) -> Self {
        self.failing_texts.insert(text.to_string());
        self
    }

    /// Fail every call.
    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Report failures as permanent (e.g. bad credentials).
    pub fn with_permanent_failures(mut self) -> Self {
        self.permanent_failures = true;
        self
    }

    /// Never answer when `text` is translated.
    pub fn with_hang_on(mut self, text: &str) -> Self {
        self.hanging_texts.insert(text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Each call consumes one permit from `gate` before answering.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Texts passed to `translate`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, text: &str, target: &str) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    return Err(TransteekError::TranslationService {
                        message: "mock gate closed".to_string(),
                        retryable: true,
                    });
                }
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.hanging_texts.contains(text) {
            std::future::pending::<()>().await;
        }
        if self.fail_all || self.failing_texts.contains(text) {
            return Err(TransteekError::TranslationService {
                message: format!("mock translation failure for {text:?}"),
                retryable: !self.permanent_failures,
            });
        }
        Ok(format!("[{target}] {text}"))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Synthesizer whose "audio" is the UTF-8 text it was given.
#[derive(Clone, Default)]
pub struct MockSynthesizer {
    failing_texts: HashSet<String>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a retryable error whenever `text` is synthesized.
    pub fn with_failure_on(mut self, text: &str) -> Self {
        self.failing_texts.insert(text.to_string());
        self
    }

    /// `(text, voice name)` pairs passed to `synthesize`, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceSelection) -> Result<Bytes> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((text.to_string(), voice.name.clone()));
        }
        if self.failing_texts.contains(text) {
            return Err(TransteekError::SynthesisService {
                message: format!("mock synthesis failure for {text:?}"),
                retryable: true,
            });
        }
        Ok(Bytes::from(text.to_string()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
