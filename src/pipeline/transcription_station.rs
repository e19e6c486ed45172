//! Transcription station.
//!
//! Streams inbound audio frames to the recognition service and queues every
//! final result as a transcript segment. Interim hypotheses are never
//! queued. When audio ends the uplink is half-closed, remaining results are
//! flushed, and an end-of-stream marker closes the queue.

use crate::error::{Result, TransteekError};
use crate::pipeline::events::{StageEvent, StageEvents};
use crate::pipeline::frame::{AudioFrame, StreamEnd, TranscriptSegment, UtteranceItem};
use crate::pipeline::queue::UtteranceProducer;
use crate::pipeline::source::AudioSourceAdapter;
use crate::services::{RecognitionConfig, RecognitionResult, RecognitionStream, SpeechRecognizer};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Counters reported when the station finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptionSummary {
    pub frames_sent: u64,
    pub segments_queued: u64,
    pub interim_ignored: u64,
}

/// Control signals from the owning session.
#[derive(Debug, Clone, Default)]
pub struct StationControl {
    /// Stop reading audio and flush what was already sent.
    pub stop_intake: CancellationToken,
    /// Abandon work immediately.
    pub cancel: CancellationToken,
}

pub struct TranscriptionStation {
    recognizer: Arc<dyn SpeechRecognizer>,
    config: RecognitionConfig,
    call_timeout: Duration,
}

impl TranscriptionStation {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, config: RecognitionConfig) -> Self {
        Self {
            recognizer,
            config,
            call_timeout: Duration::from_millis(crate::defaults::SERVICE_TIMEOUT_MS),
        }
    }

    /// Bound on opening the stream, on each wait for uplink capacity and on
    /// flushing results after audio ends.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Runs the station until audio ends and all results are flushed.
    ///
    /// Always leaves an end-of-stream marker in the queue unless cancelled
    /// or the queue consumer is gone.
    pub async fn run(
        self,
        mut source: AudioSourceAdapter,
        queue: UtteranceProducer,
        events: StageEvents,
        control: StationControl,
    ) -> Result<TranscriptionSummary> {
        let cancel = control.cancel.clone();
        let mut writer = TranscriptWriter {
            queue,
            events: events.clone(),
            language: self.config.language_code.clone(),
            next_index: 0,
            summary: TranscriptionSummary::default(),
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransteekError::Cancelled),
            opened = tokio::time::timeout(
                self.call_timeout,
                self.recognizer.open_stream(self.config.clone()),
            ) => opened,
        };
        let RecognitionStream { audio, mut results } = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return writer.abort(e, &cancel).await,
            Err(_) => return writer.abort(self.timeout("opening recognition stream"), &cancel).await,
        };
        tracing::debug!(recognizer = self.recognizer.name(), "recognition stream open");

        let mut uplink = Some(audio);
        let mut pending: Option<AudioFrame> = None;

        while uplink.is_some() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransteekError::Cancelled),
                result = results.recv() => match result {
                    Some(Ok(result)) => writer.accept(result, &cancel).await?,
                    Some(Err(e)) => return writer.abort(e, &cancel).await,
                    None => {
                        let error = TransteekError::TranscriptionService {
                            message: "recognition stream ended before audio did".to_string(),
                        };
                        return writer.abort(error, &cancel).await;
                    }
                },
                _ = control.stop_intake.cancelled() => {
                    tracing::debug!("audio intake stopped by session");
                    uplink = None;
                }
                slot = reserve(uplink.clone(), self.call_timeout), if pending.is_some() => match (slot, pending.take()) {
                    (Uplink::Ready(permit), Some(frame)) => {
                        permit.send(frame.data);
                        writer.summary.frames_sent += 1;
                    }
                    (Uplink::Stalled, _) => {
                        return writer
                            .abort(self.timeout("sending audio to recognizer"), &cancel)
                            .await;
                    }
                    _ => {
                        let error = TransteekError::TranscriptionService {
                            message: "recognition uplink closed".to_string(),
                        };
                        return writer.abort(error, &cancel).await;
                    }
                },
                frame = source.next_frame(), if pending.is_none() => match frame {
                    Some(Ok(frame)) => pending = Some(frame),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "inbound audio lost");
                        events.report(StageEvent::TransportLost { reason: e.to_string() });
                        uplink = None;
                    }
                    None => {
                        tracing::debug!(frames = source.frames_read(), "inbound audio ended");
                        events.report(StageEvent::AudioEnded);
                        uplink = None;
                    }
                },
            }
        }

        // Uplink dropped: the service now flushes its remaining results.
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransteekError::Cancelled),
                next = tokio::time::timeout(self.call_timeout, results.recv()) => next,
            };
            match next {
                Ok(Some(Ok(result))) => writer.accept(result, &cancel).await?,
                Ok(Some(Err(e))) => return writer.abort(e, &cancel).await,
                Ok(None) => break,
                Err(_) => {
                    return writer
                        .abort(self.timeout("flushing recognition results"), &cancel)
                        .await;
                }
            }
        }

        writer.finish(StreamEnd::Completed, &cancel).await?;
        tracing::debug!(
            frames = writer.summary.frames_sent,
            segments = writer.summary.segments_queued,
            "transcription finished"
        );
        Ok(writer.summary)
    }

    fn timeout(&self, operation: &str) -> TransteekError {
        TransteekError::Timeout {
            operation: operation.to_string(),
            after_ms: self.call_timeout.as_millis() as u64,
        }
    }
}

enum Uplink {
    Ready(mpsc::OwnedPermit<Bytes>),
    Closed,
    /// The recognizer stopped taking audio for a whole call timeout.
    Stalled,
}

/// Waits for uplink capacity. Never resolves without an uplink.
async fn reserve(uplink: Option<mpsc::Sender<Bytes>>, limit: Duration) -> Uplink {
    let Some(tx) = uplink else {
        return std::future::pending().await;
    };
    match tokio::time::timeout(limit, tx.reserve_owned()).await {
        Ok(Ok(permit)) => Uplink::Ready(permit),
        Ok(Err(_)) => Uplink::Closed,
        Err(_) => Uplink::Stalled,
    }
}

/// Turns recognition results into indexed queue items.
struct TranscriptWriter {
    queue: UtteranceProducer,
    events: StageEvents,
    language: String,
    next_index: u64,
    summary: TranscriptionSummary,
}

impl TranscriptWriter {
    async fn accept(&mut self, result: RecognitionResult, cancel: &CancellationToken) -> Result<()> {
        if !result.is_final {
            self.summary.interim_ignored += 1;
            tracing::trace!(text = %result.transcript, "interim result");
            return Ok(());
        }

        let index = self.next_index;
        self.next_index += 1;
        let segment = TranscriptSegment {
            index,
            text: result.transcript,
            language: result
                .language_code
                .unwrap_or_else(|| self.language.clone()),
        };
        tracing::debug!(index, chars = segment.text.len(), "final transcript");

        self.queue.push(UtteranceItem::Segment(segment), cancel).await?;
        self.summary.segments_queued += 1;
        self.events.report(StageEvent::UtteranceQueued { index });
        Ok(())
    }

    async fn finish(&self, end: StreamEnd, cancel: &CancellationToken) -> Result<()> {
        self.queue
            .push(UtteranceItem::EndOfStream(end), cancel)
            .await
            .map(|_| ())
    }

    /// Marks the stream aborted so the consumer stops, then fails with
    /// `error`.
    async fn abort(
        &self,
        error: TransteekError,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionSummary> {
        tracing::warn!(error = %error, "transcription stopped");
        let end = StreamEnd::Aborted {
            reason: error.to_string(),
        };
        if let Err(e) = self.finish(end, cancel).await {
            tracing::debug!(error = %e, "could not queue end-of-stream marker");
        }
        Err(error)
    }
}
