//! Translation station.
//!
//! Consumes transcript segments in FIFO order and, one utterance at a time,
//! translates, synthesizes and dispatches them. A failed utterance is
//! dropped and counted; enough failures inside the failure window (or one
//! refusal such as bad credentials) ends the station with a systemic failure.

use crate::error::{Result, TransteekError};
use crate::pipeline::dispatcher::OutputDispatcher;
use crate::pipeline::events::{StageEvent, StageEvents};
use crate::pipeline::frame::{AudioOutputChunk, StreamEnd, TranscriptSegment, TranslatedUtterance, UtteranceItem};
use crate::pipeline::queue::UtteranceConsumer;
use crate::services::{Synthesizer, Translator, VoiceSelection};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Counters reported when the station finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationSummary {
    pub dispatched: u64,
    pub skipped_blank: u64,
    pub failed: u64,
    /// How the transcript stream ended, if its marker was seen.
    pub end: Option<StreamEnd>,
}

/// Result of a station run plus the dispatcher handed back to the session.
pub struct TranslationOutcome {
    pub result: Result<TranslationSummary>,
    pub dispatcher: OutputDispatcher,
}

/// Sliding window of recent utterance failures.
#[derive(Debug, Clone)]
pub struct FailureWindow {
    threshold: usize,
    window: Duration,
    failures: VecDeque<Instant>,
}

impl FailureWindow {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            failures: VecDeque::new(),
        }
    }

    /// Record a failure at `now`. Returns true once the threshold is reached
    /// within the window.
    pub fn record(&mut self, now: Instant) -> bool {
        self.failures.push_back(now);
        while let Some(&oldest) = self.failures.front()
            && now.duration_since(oldest) > self.window
        {
            self.failures.pop_front();
        }
        self.failures.len() >= self.threshold
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct TranslationStation {
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn Synthesizer>,
    target: String,
    voice: VoiceSelection,
    call_timeout: Duration,
    failures: FailureWindow,
}

impl TranslationStation {
    /// `target` is the translation target (primary subtag); `voice` selects
    /// the synthesis voice.
    pub fn new(
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn Synthesizer>,
        target: &str,
        voice: VoiceSelection,
    ) -> Self {
        Self {
            translator,
            synthesizer,
            target: target.to_string(),
            voice,
            call_timeout: Duration::from_millis(crate::defaults::SERVICE_TIMEOUT_MS),
            failures: FailureWindow::new(
                crate::defaults::FAILURE_THRESHOLD,
                Duration::from_millis(crate::defaults::FAILURE_WINDOW_MS),
            ),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_failure_window(mut self, threshold: usize, window: Duration) -> Self {
        self.failures = FailureWindow::new(threshold, window);
        self
    }

    /// Runs until the end-of-stream marker, a systemic failure, a transport
    /// failure or cancellation.
    pub async fn run(
        mut self,
        mut queue: UtteranceConsumer,
        mut dispatcher: OutputDispatcher,
        events: StageEvents,
        cancel: CancellationToken,
    ) -> TranslationOutcome {
        let result = self
            .process(&mut queue, &mut dispatcher, &events, &cancel)
            .await;
        if let Ok(summary) = &result {
            tracing::debug!(
                dispatched = summary.dispatched,
                skipped = summary.skipped_blank,
                failed = summary.failed,
                "translation finished"
            );
        }
        TranslationOutcome { result, dispatcher }
    }

    async fn process(
        &mut self,
        queue: &mut UtteranceConsumer,
        dispatcher: &mut OutputDispatcher,
        events: &StageEvents,
        cancel: &CancellationToken,
    ) -> Result<TranslationSummary> {
        let mut summary = TranslationSummary::default();
        loop {
            match queue.recv(cancel).await? {
                Some(UtteranceItem::Segment(segment)) => {
                    self.handle(segment, dispatcher, events, cancel, &mut summary)
                        .await?;
                }
                Some(UtteranceItem::EndOfStream(end)) => {
                    summary.end = Some(end);
                    return Ok(summary);
                }
                None => {
                    tracing::warn!("utterance queue closed without end-of-stream marker");
                    return Ok(summary);
                }
            }
        }
    }

    async fn handle(
        &mut self,
        segment: TranscriptSegment,
        dispatcher: &mut OutputDispatcher,
        events: &StageEvents,
        cancel: &CancellationToken,
        summary: &mut TranslationSummary,
    ) -> Result<()> {
        let index = segment.index;
        if segment.is_blank() {
            summary.skipped_blank += 1;
            events.report(StageEvent::UtteranceSkipped { index });
            tracing::debug!(index, "blank transcript skipped");
            return Ok(());
        }

        let translated = self
            .bounded(
                "translation",
                self.translator.translate(&segment.text, &self.target),
                cancel,
            )
            .await;
        let translated = match translated {
            Ok(text) => TranslatedUtterance {
                index,
                text,
                language: self.voice.language_code.clone(),
            },
            Err(e) => return self.record_failure(index, e, events, summary),
        };
        if translated.text.trim().is_empty() {
            summary.skipped_blank += 1;
            events.report(StageEvent::UtteranceSkipped { index });
            tracing::debug!(index, "blank translation skipped");
            return Ok(());
        }

        let audio = self
            .bounded(
                "synthesis",
                self.synthesizer.synthesize(&translated.text, &self.voice),
                cancel,
            )
            .await;
        let audio = match audio {
            Ok(audio) => audio,
            Err(e) => return self.record_failure(index, e, events, summary),
        };

        if let Err(e) = dispatcher
            .dispatch(AudioOutputChunk { index, audio }, cancel)
            .await
        {
            if let TransteekError::Transport { message } = &e {
                events.report(StageEvent::TransportLost {
                    reason: message.clone(),
                });
            }
            return Err(e);
        }
        summary.dispatched += 1;
        events.report(StageEvent::UtteranceDispatched { index });
        Ok(())
    }

    /// Applies the per-call timeout and the session's cancellation.
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransteekError::Cancelled),
            outcome = tokio::time::timeout(self.call_timeout, call) => {
                outcome.unwrap_or_else(|_| Err(TransteekError::Timeout {
                    operation: operation.to_string(),
                    after_ms: self.call_timeout.as_millis() as u64,
                }))
            }
        }
    }

    fn record_failure(
        &mut self,
        index: u64,
        error: TransteekError,
        events: &StageEvents,
        summary: &mut TranslationSummary,
    ) -> Result<()> {
        if matches!(error, TransteekError::Cancelled) {
            return Err(error);
        }

        summary.failed += 1;
        tracing::warn!(index, error = %error, transient = error.is_transient(), "utterance dropped");
        events.report(StageEvent::UtteranceFailed {
            index,
            error: error.to_string(),
        });

        if error.is_permanent() {
            return Err(error);
        }
        if self.failures.record(Instant::now()) {
            return Err(TransteekError::SystemicFailure {
                failures: self.failures.len(),
                window_ms: self.failures.window.as_millis() as u64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioEncoding;
    use crate::pipeline::queue::{UtteranceProducer, utterance_queue};
    use crate::services::stub::{MockSynthesizer, MockTranslator};
    use crate::transport::memory::{MemoryClient, OutboundMessage, memory_connection};
    use bytes::Bytes;

    fn voice() -> VoiceSelection {
        VoiceSelection {
            language_code: "fr-FR".to_string(),
            name: "fr-FR-Standard-A".to_string(),
            encoding: AudioEncoding::Mp3,
        }
    }

    fn station(translator: MockTranslator, synthesizer: MockSynthesizer) -> TranslationStation {
        TranslationStation::new(Arc::new(translator), Arc::new(synthesizer), "fr", voice())
            .with_call_timeout(Duration::from_secs(1))
    }

    async fn enqueue(producer: &UtteranceProducer, texts: &[&str], end: StreamEnd) {
        let cancel = CancellationToken::new();
        for (i, text) in texts.iter().enumerate() {
            let segment = TranscriptSegment {
                index: i as u64,
                text: text.to_string(),
                language: "en-US".to_string(),
            };
            producer
                .push(UtteranceItem::Segment(segment), &cancel)
                .await
                .unwrap();
        }
        producer
            .push(UtteranceItem::EndOfStream(end), &cancel)
            .await
            .unwrap();
    }

    async fn audio_texts(client: &mut MemoryClient) -> Vec<String> {
        client
            .collect_until_closed()
            .await
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::Audio(audio) => {
                    Some(String::from_utf8_lossy(&audio).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    async fn run_to_end(
        station: TranslationStation,
        texts: &[&str],
    ) -> (Result<TranslationSummary>, Vec<String>) {
        let (mut client, connection) = memory_connection(32);
        let (producer, consumer) = utterance_queue(16, Duration::from_secs(1));
        enqueue(&producer, texts, StreamEnd::Completed).await;

        let dispatcher = OutputDispatcher::new(connection.outbound, Duration::from_secs(1));
        let mut outcome = station
            .run(consumer, dispatcher, StageEvents::discard(), CancellationToken::new())
            .await;
        outcome.dispatcher.close().await;
        (outcome.result, audio_texts(&mut client).await)
    }

    #[tokio::test]
    async fn test_blank_segment_skipped_between_utterances() {
        let translator = MockTranslator::new();
        let synthesizer = MockSynthesizer::new();
        let (result, audio) = run_to_end(
            station(translator.clone(), synthesizer.clone()),
            &["hello", "", "goodbye"],
        )
        .await;

        let summary = result.unwrap();
        assert_eq!(audio, vec!["[fr] hello", "[fr] goodbye"]);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.skipped_blank, 1);
        assert_eq!(summary.end, Some(StreamEnd::Completed));
        assert_eq!(translator.calls(), vec!["hello", "goodbye"]);
        assert!(
            synthesizer
                .calls()
                .iter()
                .all(|(_, voice)| voice == "fr-FR-Standard-A")
        );
    }

    #[tokio::test]
    async fn test_output_order_matches_transcript_order() {
        let texts: Vec<String> = (0..10).map(|i| format!("utterance {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let (result, audio) =
            run_to_end(station(MockTranslator::new(), MockSynthesizer::new()), &refs).await;

        assert!(result.is_ok());
        let expected: Vec<String> = texts.iter().map(|t| format!("[fr] {t}")).collect();
        assert_eq!(audio, expected);
    }

    #[tokio::test]
    async fn test_single_translation_failure_is_isolated() {
        let translator = MockTranslator::new().with_failure_on("two");
        let (result, audio) = run_to_end(
            station(translator, MockSynthesizer::new()),
            &["one", "two", "three"],
        )
        .await;

        let summary = result.unwrap();
        assert_eq!(audio, vec!["[fr] one", "[fr] three"]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.dispatched, 2);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_isolated() {
        let synthesizer = MockSynthesizer::new().with_failure_on("[fr] one");
        let (result, audio) =
            run_to_end(station(MockTranslator::new(), synthesizer), &["one", "two"]).await;

        assert_eq!(result.unwrap().failed, 1);
        assert_eq!(audio, vec!["[fr] two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_translation_times_out_and_is_skipped() {
        let translator = MockTranslator::new().with_hang_on("stuck");
        let (result, audio) = run_to_end(
            station(translator, MockSynthesizer::new()),
            &["stuck", "free"],
        )
        .await;

        assert_eq!(result.unwrap().failed, 1);
        assert_eq!(audio, vec!["[fr] free"]);
    }

    #[tokio::test]
    async fn test_repeated_failures_escalate() {
        let translator = MockTranslator::new().failing();
        let (result, audio) = run_to_end(
            station(translator, MockSynthesizer::new())
                .with_failure_window(3, Duration::from_secs(30)),
            &["a", "b", "c", "d"],
        )
        .await;

        assert!(matches!(
            result,
            Err(TransteekError::SystemicFailure { failures: 3, .. })
        ));
        assert!(audio.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_escalates_immediately() {
        let translator = MockTranslator::new().failing().with_permanent_failures();
        let (result, _) = run_to_end(station(translator, MockSynthesizer::new()), &["a", "b"]).await;

        assert!(matches!(
            result,
            Err(TransteekError::TranslationService { retryable: false, .. })
        ));
    }

    struct GarbledTranslator;

    #[async_trait::async_trait]
    impl Translator for GarbledTranslator {
        async fn translate(&self, _text: &str, _target: &str) -> Result<String> {
            Err(TransteekError::Other("unexpected response shape".to_string()))
        }

        fn name(&self) -> &str {
            "garbled"
        }
    }

    #[tokio::test]
    async fn test_unclassified_failures_count_toward_window() {
        let single = TranslationStation::new(
            Arc::new(GarbledTranslator),
            Arc::new(MockSynthesizer::new()),
            "fr",
            voice(),
        );
        let (result, _) = run_to_end(single, &["a"]).await;
        assert_eq!(result.unwrap().failed, 1);

        let repeated = TranslationStation::new(
            Arc::new(GarbledTranslator),
            Arc::new(MockSynthesizer::new()),
            "fr",
            voice(),
        )
        .with_failure_window(3, Duration::from_secs(30));
        let (result, _) = run_to_end(repeated, &["a", "b", "c", "d"]).await;
        assert!(matches!(
            result,
            Err(TransteekError::SystemicFailure { failures: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_aborted_stream_end_is_reported() {
        let (_client, connection) = memory_connection(8);
        let (producer, consumer) = utterance_queue(4, Duration::from_secs(1));
        let end = StreamEnd::Aborted {
            reason: "recognizer gone".to_string(),
        };
        enqueue(&producer, &["kept"], end.clone()).await;

        let outcome = station(MockTranslator::new(), MockSynthesizer::new())
            .run(
                consumer,
                OutputDispatcher::new(connection.outbound, Duration::from_secs(1)),
                StageEvents::discard(),
                CancellationToken::new(),
            )
            .await;
        let summary = outcome.result.unwrap();
        assert_eq!(summary.end, Some(end));
        assert_eq!(summary.dispatched, 1);
        assert_eq!(outcome.dispatcher.chunks_sent(), 1);
    }

    #[tokio::test]
    async fn test_departed_client_reports_transport_loss() {
        let (client, connection) = memory_connection(8);
        let (producer, consumer) = utterance_queue(4, Duration::from_secs(1));
        enqueue(&producer, &["hello"], StreamEnd::Completed).await;
        drop(client);

        let (events, mut event_rx) = StageEvents::channel();
        let outcome = station(MockTranslator::new(), MockSynthesizer::new())
            .run(
                consumer,
                OutputDispatcher::new(connection.outbound, Duration::from_secs(1)),
                events,
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome.result, Err(TransteekError::Transport { .. })));
        assert!(matches!(
            event_rx.recv().await,
            Some(StageEvent::TransportLost { .. })
        ));
    }

    #[test]
    fn test_failure_window_slides() {
        let mut window = FailureWindow::new(3, Duration::from_secs(10));
        let start = Instant::now();

        assert!(!window.record(start));
        assert!(!window.record(start + Duration::from_secs(5)));
        // First failure has left the window.
        assert!(!window.record(start + Duration::from_secs(12)));
        assert_eq!(window.len(), 2);
        assert!(window.record(start + Duration::from_secs(13)));
    }

    #[test]
    fn test_failure_window_threshold_of_one() {
        let mut window = FailureWindow::new(1, Duration::from_secs(1));
        assert!(window.is_empty());
        assert!(window.record(Instant::now()));
    }

    #[tokio::test]
    async fn test_audio_bytes_are_synthesizer_output() {
        let (mut client, connection) = memory_connection(8);
        let (producer, consumer) = utterance_queue(4, Duration::from_secs(1));
        enqueue(&producer, &["hi"], StreamEnd::Completed).await;

        let mut outcome = station(MockTranslator::new(), MockSynthesizer::new())
            .run(
                consumer,
                OutputDispatcher::new(connection.outbound, Duration::from_secs(1)),
                StageEvents::discard(),
                CancellationToken::new(),
            )
            .await;
        outcome.dispatcher.close().await;

        assert_eq!(
            client.collect_until_closed().await,
            vec![OutboundMessage::Audio(Bytes::from_static(b"[fr] hi"))]
        );
    }
}
