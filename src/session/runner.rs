//! Drives one session from first message to release.
//!
//! The runner owns the session state and is the only place transitions
//! happen. Stages report through [`StageEvents`]; their task results and
//! external close requests arrive in the same `select!` loop, so every
//! state change is applied in one place and in order.

use crate::error::TransteekError;
use crate::pipeline::dispatcher::OutputDispatcher;
use crate::pipeline::events::{StageEvent, StageEvents};
use crate::pipeline::queue::utterance_queue;
use crate::pipeline::source::AudioSourceAdapter;
use crate::pipeline::transcription_station::{
    StationControl, TranscriptionStation, TranscriptionSummary,
};
use crate::pipeline::translation_station::{TranslationOutcome, TranslationStation};
use crate::services::{RecognitionConfig, ServiceClients, VoiceSelection};
use crate::session::manager::SessionStats;
use crate::session::{
    LanguagePair, SessionEvent, SessionId, SessionReport, SessionSettings, SessionState,
};
use crate::transport::{Connection, InboundChannel, InboundMessage, Notice, NoticeKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Far enough in the future to never fire before a drain starts.
const NO_DEADLINE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

pub(crate) struct SessionRunner {
    settings: SessionSettings,
    services: ServiceClients,
    stats: Arc<SessionStats>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    close: CancellationToken,
    report: SessionReport,
}

impl SessionRunner {
    pub(crate) fn new(
        id: SessionId,
        peer: &str,
        settings: SessionSettings,
        services: ServiceClients,
        stats: Arc<SessionStats>,
        state_tx: watch::Sender<SessionState>,
        close: CancellationToken,
    ) -> Self {
        Self {
            settings,
            services,
            stats,
            state: SessionState::Created,
            state_tx,
            close,
            report: SessionReport::new(id, peer),
        }
    }

    pub(crate) async fn run(mut self, connection: Connection) -> SessionReport {
        let started = Instant::now();
        let Connection {
            mut inbound,
            outbound,
            ..
        } = connection;
        let mut dispatcher = OutputDispatcher::new(outbound, self.settings.output_write_timeout);

        match self.configure(inbound.as_mut(), &mut dispatcher).await {
            Some(languages) => {
                tracing::Span::current().record("languages", tracing::field::display(&languages));
                tracing::info!(languages = %languages, "session configured");
                self.report.languages = Some(languages.clone());
                if let Some(mut dispatcher) = self.run_pipeline(&languages, inbound, dispatcher).await {
                    self.report.audio_bytes_sent = dispatcher.bytes_sent();
                    tracing::debug!(
                        chunks = dispatcher.chunks_sent(),
                        bytes = dispatcher.bytes_sent(),
                        "output finished"
                    );
                    self.say_goodbye(&mut dispatcher).await;
                }
            }
            None => self.say_goodbye(&mut dispatcher).await,
        }

        self.report.final_state = self.state;
        self.report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            state = %self.state,
            dispatched = self.report.utterances_dispatched,
            failed = self.report.utterances_failed,
            duration_ms = self.report.duration_ms,
            "session ended"
        );
        self.report
    }

    /// Reads and validates the configuration message.
    async fn configure(
        &mut self,
        inbound: &mut dyn InboundChannel,
        dispatcher: &mut OutputDispatcher,
    ) -> Option<LanguagePair> {
        let first = tokio::select! {
            biased;
            _ = self.close.cancelled() => {
                self.apply(SessionEvent::CloseRequested);
                return None;
            }
            first = tokio::time::timeout(self.settings.config_timeout, inbound.recv()) => first,
        };

        let text = match first {
            Err(_) => {
                let reason = format!(
                    "no configuration received within {}ms",
                    self.settings.config_timeout.as_millis()
                );
                self.reject(reason, dispatcher).await;
                return None;
            }
            Ok(None) => {
                self.apply(SessionEvent::TransportLost {
                    reason: "client left before configuring".to_string(),
                });
                return None;
            }
            Ok(Some(Err(e))) => {
                self.report.record_error(e.to_string());
                self.apply(SessionEvent::TransportLost {
                    reason: e.to_string(),
                });
                return None;
            }
            Ok(Some(Ok(InboundMessage::Binary(_)))) => {
                self.apply(SessionEvent::ConfigReceived);
                let reason = "expected \"<source>,<target>\" before any audio".to_string();
                self.reject(reason, dispatcher).await;
                return None;
            }
            Ok(Some(Ok(InboundMessage::Text(text)))) => text,
        };

        self.apply(SessionEvent::ConfigReceived);
        match LanguagePair::parse(&text) {
            Ok(languages) => {
                self.apply(SessionEvent::Configured);
                Some(languages)
            }
            Err(e) => {
                self.reject(e.to_string(), dispatcher).await;
                None
            }
        }
    }

    async fn reject(&mut self, reason: String, dispatcher: &mut OutputDispatcher) {
        tracing::warn!(reason = %reason, "session configuration rejected");
        dispatcher
            .notify(&Notice::new(NoticeKind::ConfigError, reason.clone()))
            .await;
        self.report.record_error(reason.clone());
        self.apply(SessionEvent::ConfigRejected { reason });
    }

    /// Runs both stages until the session reaches a terminal state. Returns
    /// the dispatcher if the translation stage handed it back.
    async fn run_pipeline(
        &mut self,
        languages: &LanguagePair,
        inbound: Box<dyn InboundChannel>,
        dispatcher: OutputDispatcher,
    ) -> Option<OutputDispatcher> {
        let settings = self.settings.clone();
        let (events, mut event_rx) = StageEvents::channel();
        let (producer, consumer) = utterance_queue(settings.queue_capacity, settings.overload_after);
        let producer = producer.with_events(events.clone());
        let control = StationControl::default();

        let transcription = TranscriptionStation::new(
            self.services.recognizer.clone(),
            RecognitionConfig::for_language(&languages.source),
        )
        .with_call_timeout(settings.service_timeout);

        let voice = VoiceSelection {
            language_code: languages.target.clone(),
            name: languages.voice_name(&settings.voice_suffix),
            encoding: settings.audio_encoding,
        };
        let translation = TranslationStation::new(
            self.services.translator.clone(),
            self.services.synthesizer.clone(),
            languages.target_code(),
            voice,
        )
        .with_call_timeout(settings.service_timeout)
        .with_failure_window(settings.failure_threshold, settings.failure_window);

        let span = tracing::Span::current();
        let mut transcribe = tokio::spawn(
            transcription
                .run(
                    AudioSourceAdapter::new(inbound),
                    producer,
                    events.clone(),
                    control.clone(),
                )
                .instrument(span.clone()),
        );
        let mut translate = tokio::spawn(
            translation
                .run(consumer, dispatcher, events, control.cancel.clone())
                .instrument(span),
        );

        let mut transcribe_done = false;
        let mut translate_done = false;
        let mut close_seen = false;
        let mut dispatcher = None;
        let deadline = tokio::time::sleep(NO_DEADLINE);
        tokio::pin!(deadline);

        while !self.state.is_terminal() {
            let event = tokio::select! {
                biased;
                Some(event) = event_rx.recv() => self.stage_event(event),
                joined = &mut transcribe, if !transcribe_done => {
                    transcribe_done = true;
                    Some(self.transcription_ended(joined))
                }
                joined = &mut translate, if !translate_done => {
                    translate_done = true;
                    let (event, handed_back) = self.translation_ended(joined);
                    dispatcher = handed_back;
                    Some(event)
                }
                _ = self.close.cancelled(), if !close_seen => {
                    close_seen = true;
                    Some(SessionEvent::CloseRequested)
                }
                _ = &mut deadline, if self.state == SessionState::Draining => {
                    tracing::warn!(
                        timeout_ms = settings.drain_timeout.as_millis() as u64,
                        "drain timed out, abandoning in-flight utterances"
                    );
                    self.report.record_error("drain timed out");
                    Some(SessionEvent::DrainTimedOut)
                }
            };

            if let Some(event) = event {
                let before = self.state;
                self.apply(event);
                if before.accepts_audio() && !self.state.accepts_audio() {
                    control.stop_intake.cancel();
                    deadline
                        .as_mut()
                        .reset(Instant::now() + settings.drain_timeout);
                }
            }
            if transcribe_done && translate_done {
                self.drain_stage_events(&mut event_rx);
                self.apply(SessionEvent::PipelineDrained);
            }
        }

        // Terminal: anything still running is abandoned.
        control.cancel.cancel();
        if !translate_done {
            dispatcher = stop(translate, settings.stop_grace())
                .await
                .and_then(|outcome| outcome.ok())
                .map(|outcome| outcome.dispatcher);
        }
        if !transcribe_done {
            stop(transcribe, settings.stop_grace()).await;
        }
        self.drain_stage_events(&mut event_rx);
        dispatcher
    }

    /// Applies every stage event already reported without waiting for more.
    /// Stages report just before returning, so their last events can still
    /// be queued when both tasks have been joined.
    fn drain_stage_events(&mut self, event_rx: &mut mpsc::UnboundedReceiver<StageEvent>) {
        while let Ok(event) = event_rx.try_recv() {
            if let Some(event) = self.stage_event(event) {
                self.apply(event);
            }
        }
    }

    /// Final words to the client, then close.
    async fn say_goodbye(&mut self, dispatcher: &mut OutputDispatcher) {
        if self.state == SessionState::Failed
            && self.report.languages.is_some()
            && let Some(error) = &self.report.error
        {
            let notice = Notice::new(NoticeKind::ServiceError, error.clone());
            dispatcher.notify(&notice).await;
        }
        dispatcher.close().await;
    }

    fn stage_event(&mut self, event: StageEvent) -> Option<SessionEvent> {
        match event {
            StageEvent::AudioEnded => Some(SessionEvent::AudioEnded),
            StageEvent::TransportLost { reason } => {
                self.report.record_error(format!("transport lost: {reason}"));
                Some(SessionEvent::TransportLost { reason })
            }
            StageEvent::Overload { waited_ms, .. } => {
                self.report.overload_warnings += 1;
                self.stats.record_overload();
                Some(SessionEvent::Overload { waited_ms })
            }
            StageEvent::UtteranceQueued { .. } => {
                self.report.segments_queued += 1;
                None
            }
            StageEvent::UtteranceDispatched { .. } => {
                self.report.utterances_dispatched += 1;
                self.stats.record_dispatched();
                None
            }
            StageEvent::UtteranceSkipped { .. } => {
                self.report.utterances_skipped += 1;
                self.stats.record_skipped();
                None
            }
            StageEvent::UtteranceFailed { .. } => {
                self.report.utterances_failed += 1;
                self.stats.record_failed_utterance();
                None
            }
        }
    }

    fn transcription_ended(
        &mut self,
        joined: Result<crate::error::Result<TranscriptionSummary>, JoinError>,
    ) -> SessionEvent {
        match joined {
            Ok(Ok(summary)) => {
                self.report.audio_frames = summary.frames_sent;
                SessionEvent::TranscriptionFinished
            }
            Ok(Err(TransteekError::Cancelled | TransteekError::PipelineClosed { .. })) => {
                SessionEvent::TranscriptionFinished
            }
            Ok(Err(e)) => {
                self.report.record_error(e.to_string());
                SessionEvent::TranscriptionFailed {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                self.report.record_error(format!("transcription task: {e}"));
                SessionEvent::InternalFailure {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn translation_ended(
        &mut self,
        joined: Result<TranslationOutcome, JoinError>,
    ) -> (SessionEvent, Option<OutputDispatcher>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report.record_error(format!("translation task: {e}"));
                return (
                    SessionEvent::InternalFailure {
                        reason: e.to_string(),
                    },
                    None,
                );
            }
        };

        let event = match outcome.result {
            Ok(_) | Err(TransteekError::Cancelled) => SessionEvent::TranslationFinished,
            Err(TransteekError::Transport { message }) => {
                self.report.record_error(format!("transport lost: {message}"));
                SessionEvent::TransportLost { reason: message }
            }
            Err(e) => {
                tracing::error!(error = %e, "translation unavailable, ending session");
                self.report.record_error(e.to_string());
                SessionEvent::SystemicFailure {
                    reason: e.to_string(),
                }
            }
        };
        (event, Some(outcome.dispatcher))
    }

    fn apply(&mut self, event: SessionEvent) {
        let next = self.state.on(&event);
        if next == self.state {
            tracing::trace!(state = %self.state, ?event, "event ignored");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, ?event, "session state changed");
        self.state = next;
        self.state_tx.send_replace(next);
    }
}

/// Wait briefly for a cancelled stage, then abort it.
async fn stop<T>(mut handle: JoinHandle<T>, grace: Duration) -> Option<Result<T, JoinError>> {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(joined) => Some(joined),
        Err(_) => {
            tracing::warn!("pipeline stage did not stop in time, aborting");
            handle.abort();
            None
        }
    }
}
