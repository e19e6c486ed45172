//! Per-session translation pipeline.
//!
//! Two stations run as separate tasks, joined by a bounded utterance queue:
//!
//! ```text
//! inbound ─► source ─► transcription ─► queue(C) ─► translation ─► dispatcher ─► outbound
//! ```
//!
//! Data only flows forward through bounded channels. Control events
//! (end of audio, overload, per-utterance outcomes) flow back to the session
//! runner through [`events::StageEvents`].

pub mod dispatcher;
pub mod events;
pub mod frame;
pub mod queue;
pub mod source;
pub mod transcription_station;
pub mod translation_station;

pub use dispatcher::OutputDispatcher;
pub use events::{StageEvent, StageEvents};
pub use frame::{AudioFrame, AudioOutputChunk, StreamEnd, TranscriptSegment, UtteranceItem};
pub use queue::{UtteranceConsumer, UtteranceProducer, utterance_queue};
pub use source::AudioSourceAdapter;
pub use transcription_station::{StationControl, TranscriptionStation, TranscriptionSummary};
pub use translation_station::{FailureWindow, TranslationOutcome, TranslationStation};
