//! Audio source adapter: turns inbound transport messages into an ordered
//! stream of audio frames.

use crate::error::Result;
use crate::pipeline::frame::AudioFrame;
use crate::transport::{InboundChannel, InboundMessage};

/// Sequenced view over the binary messages of an inbound channel.
///
/// Once the channel ends or fails, the adapter is finished and keeps
/// returning `None`.
pub struct AudioSourceAdapter {
    inbound: Box<dyn InboundChannel>,
    next_sequence: u64,
    finished: bool,
}

impl AudioSourceAdapter {
    pub fn new(inbound: Box<dyn InboundChannel>) -> Self {
        Self {
            inbound,
            next_sequence: 0,
            finished: false,
        }
    }

    /// Next audio frame.
    ///
    /// Returns `None` when the client ended the stream and `Some(Err)` once
    /// if the transport failed. Text messages after configuration are
    /// ignored. Cancel safe.
    pub async fn next_frame(&mut self) -> Option<Result<AudioFrame>> {
        while !self.finished {
            match self.inbound.recv().await {
                Some(Ok(InboundMessage::Binary(data))) => {
                    if data.is_empty() {
                        continue;
                    }
                    let frame = AudioFrame::new(self.next_sequence, data);
                    self.next_sequence += 1;
                    return Some(Ok(frame));
                }
                Some(Ok(InboundMessage::Text(text))) => {
                    tracing::debug!(len = text.len(), "ignoring text message during audio stream");
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                }
            }
        }
        None
    }

    /// Frames delivered so far.
    pub fn frames_read(&self) -> u64 {
        self.next_sequence
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
