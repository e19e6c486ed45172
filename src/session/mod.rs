//! Call sessions: one client connection, one language pair, one pipeline.

pub mod language;
pub mod manager;
mod runner;
pub mod state;

pub use language::LanguagePair;
pub use manager::{SessionManager, SessionStats, StatsSnapshot};
pub use state::{SessionEvent, SessionState};

use crate::config::{AudioEncoding, Config};
use crate::defaults;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-session tuning, resolved from the configuration file.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub config_timeout: Duration,
    pub queue_capacity: usize,
    pub overload_after: Duration,
    pub drain_timeout: Duration,
    pub service_timeout: Duration,
    pub output_write_timeout: Duration,
    pub failure_threshold: usize,
    pub failure_window: Duration,
    pub voice_suffix: String,
    pub audio_encoding: AudioEncoding,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        Self {
            config_timeout: Duration::from_millis(config.server.config_timeout_ms),
            queue_capacity: pipeline.queue_capacity,
            overload_after: pipeline.overload_warn_after(),
            drain_timeout: pipeline.drain_timeout(),
            service_timeout: pipeline.service_timeout(),
            output_write_timeout: pipeline.output_write_timeout(),
            failure_threshold: pipeline.failure_threshold,
            failure_window: pipeline.failure_window(),
            voice_suffix: config.services.voice_suffix.clone(),
            audio_encoding: config.services.audio_encoding,
        }
    }

    /// Time allowed for a cancelled stage to hand back its resources.
    pub(crate) fn stop_grace(&self) -> Duration {
        Duration::from_millis(defaults::STAGE_STOP_GRACE_MS)
    }
}

/// What happened during a session, returned when it ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub id: SessionId,
    pub peer: String,
    pub languages: Option<LanguagePair>,
    pub final_state: SessionState,
    pub audio_frames: u64,
    pub segments_queued: u64,
    pub utterances_dispatched: u64,
    pub utterances_skipped: u64,
    pub utterances_failed: u64,
    pub overload_warnings: u64,
    /// Synthesized audio written to the client.
    pub audio_bytes_sent: u64,
    /// First error that ended or degraded the session.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SessionReport {
    pub(crate) fn new(id: SessionId, peer: &str) -> Self {
        Self {
            id,
            peer: peer.to_string(),
            languages: None,
            final_state: SessionState::Created,
            audio_frames: 0,
            segments_queued: 0,
            utterances_dispatched: 0,
            utterances_skipped: 0,
            utterances_failed: 0,
            overload_warnings: 0,
            audio_bytes_sent: 0,
            error: None,
            duration_ms: 0,
        }
    }

    /// Keep the first error; later ones are usually consequences of it.
    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.pipeline.queue_capacity = 9;
        config.pipeline.drain_timeout_ms = 1500;
        config.services.voice_suffix = "Wavenet-B".to_string();

        let settings = SessionSettings::from_config(&config);
        assert_eq!(settings.queue_capacity, 9);
        assert_eq!(settings.drain_timeout, Duration::from_millis(1500));
        assert_eq!(settings.voice_suffix, "Wavenet-B");
    }

    #[test]
    fn test_report_keeps_first_error() {
        let mut report = SessionReport::new(SessionId::new(), "test");
        report.record_error("first");
        report.record_error("second");
        assert_eq!(report.error.as_deref(), Some("first"));
    }
}
