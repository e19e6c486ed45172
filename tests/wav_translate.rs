#![cfg(feature = "stub-services")]
//! File translation mode: WAV in, one synthesized file per utterance out.

use std::path::Path;
use transteek::TransteekError;
use transteek::app::run_translate_file;
use transteek::config::{AudioEncoding, Config, ServiceMode};
use transteek::session::{LanguagePair, SessionState};

fn write_wav(path: &Path, sample_rate: u32, channels: u16, seconds: u32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(sample_rate * seconds * channels as u32) {
        let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

fn stub_config() -> Config {
    let mut config = Config::default();
    config.services.mode = ServiceMode::Stub;
    config
}

fn pair() -> LanguagePair {
    LanguagePair::new("en-US", "fr-FR").unwrap()
}

#[tokio::test]
async fn test_wav_file_is_translated_into_numbered_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("call.wav");
    let out = dir.path().join("out");
    write_wav(&input, 16000, 1, 3);

    let report = run_translate_file(&stub_config(), &input, &pair(), &out)
        .await
        .unwrap();

    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.audio_frames, 30);
    assert_eq!(report.utterances_dispatched, 3);
    for (index, text) in ["utterance 1", "utterance 2", "utterance 3"].iter().enumerate() {
        let file = out.join(format!("utterance-{index:04}.mp3"));
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            format!("[fr] {text}")
        );
    }
    assert!(!out.join("utterance-0003.mp3").exists());
}

#[tokio::test]
async fn test_output_extension_follows_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("call.wav");
    let out = dir.path().join("out");
    write_wav(&input, 16000, 1, 1);

    let mut config = stub_config();
    config.services.audio_encoding = AudioEncoding::OggOpus;
    run_translate_file(&config, &input, &pair(), &out)
        .await
        .unwrap();

    assert!(out.join("utterance-0000.ogg").exists());
}

#[tokio::test]
async fn test_wrong_sample_rate_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("call.wav");
    write_wav(&input, 8000, 1, 1);

    let error = run_translate_file(&stub_config(), &input, &pair(), &dir.path().join("out"))
        .await
        .unwrap_err();

    assert!(matches!(error, TransteekError::AudioFormatMismatch { .. }));
    assert!(error.to_string().contains("8000 Hz"));
}

#[tokio::test]
async fn test_stereo_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("call.wav");
    write_wav(&input, 16000, 2, 1);

    let error = run_translate_file(&stub_config(), &input, &pair(), &dir.path().join("out"))
        .await
        .unwrap_err();

    assert!(matches!(error, TransteekError::AudioFormatMismatch { .. }));
}

#[tokio::test]
async fn test_missing_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_translate_file(
        &stub_config(),
        &dir.path().join("missing.wav"),
        &pair(),
        &dir.path().join("out"),
    )
    .await;

    assert!(matches!(result, Err(TransteekError::Transport { .. })));
}
