//! Frame types for the translation pipeline.
//!
//! Defines the data structures that flow between pipeline stations.

use bytes::Bytes;
use tokio::time::Instant;

/// Chunk of inbound PCM audio with its arrival order.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Position in the inbound stream, starting at 0.
    pub sequence: u64,
    /// When the frame arrived from the transport.
    pub received_at: Instant,
    /// 16-bit little-endian mono PCM.
    pub data: Bytes,
}

impl AudioFrame {
    /// Creates a new audio frame stamped with the current time.
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self {
            sequence,
            received_at: Instant::now(),
            data,
        }
    }
}

/// Finalized recognition result for one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSegment {
    /// Utterance number within the session, assigned in arrival order.
    pub index: u64,
    pub text: String,
    /// Language tag the text is in.
    pub language: String,
}

impl TranscriptSegment {
    /// True when the segment carries no speech worth translating.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Translated text for one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedUtterance {
    pub index: u64,
    pub text: String,
    pub language: String,
}

/// Synthesized audio for one utterance, ready for the outbound channel.
#[derive(Debug, Clone)]
pub struct AudioOutputChunk {
    pub index: u64,
    pub audio: Bytes,
}

/// Why the transcript stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// All audio was transcribed and every final result was queued.
    Completed,
    /// Transcription stopped early. Segments queued before this point are
    /// still valid.
    Aborted { reason: String },
}

/// Item carried by the utterance queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceItem {
    Segment(TranscriptSegment),
    /// Terminal marker: no items follow.
    EndOfStream(StreamEnd),
}

impl UtteranceItem {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::EndOfStream(_))
    }
}
