//! Bounded FIFO between the transcription and translation stations.
//!
//! The queue never drops or reorders items. When it is full, the producer
//! waits for space; if the wait exceeds the overload threshold an overload
//! warning is reported once for that push and the producer keeps waiting.

use crate::error::{Result, TransteekError};
use crate::pipeline::events::{StageEvent, StageEvents};
use crate::pipeline::frame::UtteranceItem;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Creates a queue holding at most `capacity` items.
pub fn utterance_queue(
    capacity: usize,
    overload_after: Duration,
) -> (UtteranceProducer, UtteranceConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        UtteranceProducer {
            tx,
            overload_after,
            events: StageEvents::discard(),
        },
        UtteranceConsumer { rx },
    )
}

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pushed {
    pub waited: Duration,
    pub overloaded: bool,
}

/// Writing half, owned by the transcription station.
#[derive(Debug)]
pub struct UtteranceProducer {
    tx: mpsc::Sender<UtteranceItem>,
    overload_after: Duration,
    events: StageEvents,
}

impl UtteranceProducer {
    /// Report overload warnings to the given session.
    pub fn with_events(mut self, events: StageEvents) -> Self {
        self.events = events;
        self
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Items currently waiting in the queue.
    fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Append an item, waiting while the queue is full.
    ///
    /// Returns `Cancelled` if `cancel` fires while waiting and
    /// `PipelineClosed` if the consumer is gone.
    pub async fn push(&self, item: UtteranceItem, cancel: &CancellationToken) -> Result<Pushed> {
        let started = Instant::now();
        let mut overloaded = false;

        let permit = match self.tx.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Closed(())) => return Err(closed()),
            Err(TrySendError::Full(())) => {
                tracing::debug!(capacity = self.capacity(), "utterance queue full, waiting");
                let warn_at = tokio::time::sleep(self.overload_after);
                tokio::pin!(warn_at);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(TransteekError::Cancelled),
                        permit = self.tx.reserve() => break permit.map_err(|_| closed())?,
                        _ = &mut warn_at, if !overloaded => {
                            overloaded = true;
                            let waited_ms = started.elapsed().as_millis() as u64;
                            tracing::warn!(
                                waited_ms,
                                queued = self.queued(),
                                capacity = self.capacity(),
                                "translation is falling behind speech"
                            );
                            self.events.report(StageEvent::Overload {
                                waited_ms,
                                capacity: self.capacity(),
                            });
                        }
                    }
                }
            }
        };

        permit.send(item);
        Ok(Pushed {
            waited: started.elapsed(),
            overloaded,
        })
    }
}

/// Reading half, owned by the translation station.
#[derive(Debug)]
pub struct UtteranceConsumer {
    rx: mpsc::Receiver<UtteranceItem>,
}

impl UtteranceConsumer {
    /// Next item in FIFO order.
    ///
    /// `Ok(None)` means the producer went away without an end-of-stream
    /// marker.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Result<Option<UtteranceItem>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransteekError::Cancelled),
            item = self.rx.recv() => Ok(item),
        }
    }
}

fn closed() -> TransteekError {
    TransteekError::PipelineClosed {
        stage: "utterance queue".to_string(),
    }
}
