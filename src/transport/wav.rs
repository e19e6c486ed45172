//! File transport: a WAV file stands in for the caller and a directory
//! collects the synthesized utterances.

use crate::defaults::{BYTES_PER_SAMPLE, SAMPLE_RATE};
use crate::error::{Result, TransteekError};
use crate::session::LanguagePair;
use crate::transport::{Connection, InboundChannel, InboundMessage, Notice, OutboundChannel};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Replays a WAV file as a client would: the language configuration first,
/// then the audio in fixed-size frames.
pub struct WavFileInbound {
    pending: VecDeque<InboundMessage>,
}

impl WavFileInbound {
    pub fn open(path: &Path, languages: &LanguagePair, frame_ms: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            TransteekError::transport(format!("cannot open {}: {e}", path.display()))
        })?;
        Self::from_reader(std::io::BufReader::new(file), languages, frame_ms)
    }

    /// Only 16 kHz mono 16-bit integer PCM is accepted; anything else is
    /// rejected rather than converted.
    pub fn from_reader<R: Read>(reader: R, languages: &LanguagePair, frame_ms: u32) -> Result<Self> {
        let mut wav = hound::WavReader::new(reader)
            .map_err(|e| TransteekError::transport(format!("failed to parse WAV: {e}")))?;

        let spec = wav.spec();
        if spec.sample_rate != SAMPLE_RATE
            || spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(TransteekError::AudioFormatMismatch {
                expected: format!("{SAMPLE_RATE} Hz mono 16-bit PCM"),
                actual: format!(
                    "{} Hz, {} channel(s), {}-bit {:?}",
                    spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
                ),
            });
        }

        let samples = wav
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TransteekError::transport(format!("failed to read WAV samples: {e}")))?;

        let samples_per_frame = (SAMPLE_RATE as usize * frame_ms.max(1) as usize / 1000).max(1);
        let mut pending = VecDeque::with_capacity(samples.len() / samples_per_frame + 2);
        pending.push_back(InboundMessage::Text(languages.to_string()));
        for chunk in samples.chunks(samples_per_frame) {
            let mut frame = Vec::with_capacity(chunk.len() * BYTES_PER_SAMPLE);
            for sample in chunk {
                frame.extend_from_slice(&sample.to_le_bytes());
            }
            pending.push_back(InboundMessage::Binary(Bytes::from(frame)));
        }

        tracing::debug!(
            samples = samples.len(),
            frames = pending.len() - 1,
            frame_ms,
            "loaded WAV input"
        );
        Ok(Self { pending })
    }

    /// Messages left to deliver, configuration included.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl InboundChannel for WavFileInbound {
    async fn recv(&mut self) -> Option<Result<InboundMessage>> {
        self.pending.pop_front().map(Ok)
    }
}

/// Writes each synthesized utterance to `utterance-NNNN.<ext>`.
pub struct DirectoryOutbound {
    dir: PathBuf,
    extension: &'static str,
    written: usize,
    closed: bool,
}

impl DirectoryOutbound {
    pub fn create(dir: &Path, extension: &'static str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            extension,
            written: 0,
            closed: false,
        })
    }

    fn next_path(&self) -> PathBuf {
        self.dir
            .join(format!("utterance-{:04}.{}", self.written, self.extension))
    }
}

#[async_trait]
impl OutboundChannel for DirectoryOutbound {
    async fn send_audio(&mut self, audio: Bytes) -> Result<()> {
        if self.closed {
            return Err(TransteekError::transport("output directory already closed"));
        }
        let path = self.next_path();
        tokio::fs::write(&path, &audio).await.map_err(|e| {
            TransteekError::transport(format!("cannot write {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), bytes = audio.len(), "utterance written");
        self.written += 1;
        Ok(())
    }

    async fn send_notice(&mut self, notice: &Notice) -> Result<()> {
        tracing::warn!(kind = ?notice.kind, message = %notice.message, "session notice");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Connection that plays `input` and writes results into `out_dir`.
pub fn file_connection(
    input: &Path,
    out_dir: &Path,
    languages: &LanguagePair,
    frame_ms: u32,
    extension: &'static str,
) -> Result<Connection> {
    let inbound = WavFileInbound::open(input, languages, frame_ms)?;
    let outbound = DirectoryOutbound::create(out_dir, extension)?;
    Ok(Connection::new(
        Box::new(inbound),
        Box::new(outbound),
        input.display().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..samples * channels as usize {
                writer.write_sample((i % 100) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn pair() -> LanguagePair {
        LanguagePair::new("en-US", "fr-FR").unwrap()
    }

    #[tokio::test]
    async fn test_config_message_comes_first() {
        let data = wav_bytes(16000, 1, 3200);
        let mut inbound = WavFileInbound::from_reader(Cursor::new(data), &pair(), 100).unwrap();

        assert_eq!(
            inbound.recv().await.unwrap().unwrap(),
            InboundMessage::Text("en-US,fr-FR".to_string())
        );
        let mut frames = 0;
        while let Some(message) = inbound.recv().await {
            match message.unwrap() {
                InboundMessage::Binary(frame) => {
                    assert_eq!(frame.len(), 1600 * BYTES_PER_SAMPLE);
                    frames += 1;
                }
                InboundMessage::Text(text) => panic!("unexpected text {text}"),
            }
        }
        assert_eq!(frames, 2);
    }

    #[test]
    fn test_short_tail_frame() {
        let data = wav_bytes(16000, 1, 2000);
        let inbound = WavFileInbound::from_reader(Cursor::new(data), &pair(), 100).unwrap();
        assert_eq!(inbound.remaining(), 3);
    }

    #[test]
    fn test_rejects_wrong_sample_rate() {
        let data = wav_bytes(44100, 1, 441);
        let result = WavFileInbound::from_reader(Cursor::new(data), &pair(), 100);
        assert!(matches!(
            result,
            Err(TransteekError::AudioFormatMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_stereo() {
        let data = wav_bytes(16000, 2, 1600);
        let result = WavFileInbound::from_reader(Cursor::new(data), &pair(), 100);
        assert!(matches!(
            result,
            Err(TransteekError::AudioFormatMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        let result = WavFileInbound::from_reader(Cursor::new(b"not a wav".to_vec()), &pair(), 100);
        assert!(matches!(result, Err(TransteekError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_directory_outbound_numbers_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbound = DirectoryOutbound::create(dir.path(), "mp3").unwrap();

        outbound.send_audio(Bytes::from_static(b"one")).await.unwrap();
        outbound.send_audio(Bytes::from_static(b"two")).await.unwrap();
        outbound.close().await.unwrap();
        outbound.close().await.unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("utterance-0000.mp3")).unwrap(),
            b"one"
        );
        assert_eq!(
            std::fs::read(dir.path().join("utterance-0001.mp3")).unwrap(),
            b"two"
        );
        assert!(outbound.send_audio(Bytes::from_static(b"late")).await.is_err());
    }
}
