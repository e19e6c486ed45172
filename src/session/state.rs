//! Session lifecycle state machine.
//!
//! ```text
//! Created ──► Configuring ──► Active ──► Draining ──► Closed
//!    │             │            │            │
//!    └─────────────┴────────────┴────────────┴──────► Failed
//! ```
//!
//! Every transition goes through [`SessionState::on`], so the lifecycle can
//! be checked without running a pipeline. Closed and Failed are terminal.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Connection accepted, nothing received yet.
    Created,
    /// Configuration message received and being validated.
    Configuring,
    /// Both pipeline stages running.
    Active,
    /// Intake stopped; queued utterances are finishing.
    Draining,
    Closed,
    Failed,
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConfigReceived,
    Configured,
    ConfigRejected { reason: String },
    /// The client finished sending audio.
    AudioEnded,
    TransportLost { reason: String },
    /// The transcription stage queued its end-of-stream marker.
    TranscriptionFinished,
    TranscriptionFailed { reason: String },
    /// The translation stage stopped.
    TranslationFinished,
    /// Repeated or permanent service failures.
    SystemicFailure { reason: String },
    /// Queue overload, informational.
    Overload { waited_ms: u64 },
    CloseRequested,
    /// Both stages have stopped.
    PipelineDrained,
    DrainTimedOut,
    /// A stage task panicked or was lost.
    InternalFailure { reason: String },
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// True while audio is being accepted.
    pub fn accepts_audio(self) -> bool {
        self == Self::Active
    }

    /// State after `event`. Events that do not apply leave the state as is.
    pub fn on(self, event: &SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Closed | S::Failed, _) => self,

            (_, E::InternalFailure { .. }) => S::Failed,

            (S::Created, E::ConfigReceived) => S::Configuring,
            (S::Created | S::Configuring, E::TransportLost { .. } | E::CloseRequested) => {
                S::Closed
            }
            (S::Created | S::Configuring, E::ConfigRejected { .. }) => S::Failed,
            (S::Configuring, E::Configured) => S::Active,

            (S::Active, E::SystemicFailure { .. }) | (S::Draining, E::SystemicFailure { .. }) => {
                S::Failed
            }
            (
                S::Active,
                E::AudioEnded
                | E::TransportLost { .. }
                | E::CloseRequested
                | E::TranscriptionFinished
                | E::TranscriptionFailed { .. }
                | E::TranslationFinished,
            ) => S::Draining,
            (S::Active | S::Draining, E::PipelineDrained) => S::Closed,
            (S::Draining, E::DrainTimedOut) => S::Closed,

            _ => self,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Configuring => "configuring",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
