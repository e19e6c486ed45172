//! Events that pipeline stations report to the session that owns them.

use tokio::sync::mpsc;

/// Something a station observed that the session may need to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// The client finished sending audio.
    AudioEnded,
    /// The transport failed in either direction.
    TransportLost { reason: String },
    /// A push waited on a full utterance queue past the warning threshold.
    Overload { waited_ms: u64, capacity: usize },
    UtteranceQueued { index: u64 },
    UtteranceDispatched { index: u64 },
    /// The utterance had nothing to translate.
    UtteranceSkipped { index: u64 },
    /// A service call for this utterance failed and it was dropped.
    UtteranceFailed { index: u64, error: String },
}

/// Reporting handle shared by the stations of one session.
///
/// Reporting never blocks and never fails: a session that has stopped
/// listening simply stops receiving events.
#[derive(Debug, Clone, Default)]
pub struct StageEvents {
    tx: Option<mpsc::UnboundedSender<StageEvent>>,
}

impl StageEvents {
    /// Creates a reporter and the receiver the session listens on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Reporter that drops every event.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, event: StageEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
