use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use player_core::audio_format::AudioFormat;
use player_core::config::PlaybackConfig;
use player_core::decoder::symphonia_backend::SymphoniaPlugin;
use player_core::decoder::{DecoderPlugin, DecoderRegistry};
use player_core::input::{FileInput, LocalInputOpener};
use player_core::output::NullOutput;
use player_core::{PlayerControl, Song, spawn_worker};
use player_types::PlaybackState;

const RATE: u32 = 44_100;

fn sample_at(frame: usize, channel: usize) -> i16 {
    let v = (frame % 2_000) as i16 - 1_000;
    if channel == 0 { v } else { -v }
}

fn write_wav(dir: &Path) -> PathBuf {
    let path = dir.join("ramp.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for frame in 0..RATE as usize {
        writer.write_sample(sample_at(frame, 0)).unwrap();
        writer.write_sample(sample_at(frame, 1)).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn open_input(path: &Path) -> Box<FileInput> {
    let uri = path.to_str().unwrap();
    Box::new(FileInput::open(path, uri).unwrap())
}

#[test]
fn decodes_wav_samples_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path());

    let mut session = SymphoniaPlugin.open(open_input(&path)).unwrap();
    assert_eq!(session.audio_format(), AudioFormat::new(RATE, 16, 2));
    assert!(session.seekable());
    let total = session.total_time().unwrap();
    assert!((total - 1.0).abs() < 0.01, "total {total}");

    let mut samples = Vec::new();
    while let Some(chunk) = session.next_chunk().unwrap() {
        samples.extend(
            chunk
                .pcm
                .chunks_exact(2)
                .map(|c| i16::from_ne_bytes([c[0], c[1]])),
        );
    }

    assert_eq!(samples.len(), RATE as usize * 2);
    for (i, frame) in samples.chunks_exact(2).enumerate().step_by(997) {
        assert_eq!(frame, [sample_at(i, 0), sample_at(i, 1)], "frame {i}");
    }
}

#[test]
fn tag_reports_duration() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path());

    let tag = SymphoniaPlugin.tag(open_input(&path)).unwrap().unwrap();
    let duration = tag.duration.unwrap();
    assert!((duration - 1.0).abs() < 0.01, "duration {duration}");
    assert!(tag.title.is_none());
}

#[test]
fn seek_moves_next_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path());

    let mut session = SymphoniaPlugin.open(open_input(&path)).unwrap();
    session.next_chunk().unwrap();
    session.seek(0.25).unwrap();

    let chunk = session.next_chunk().unwrap().unwrap();
    let ts = chunk.timestamp.unwrap();
    assert!((ts - 0.25).abs() < 0.1, "timestamp {ts}");
}

#[test]
fn worker_plays_wav_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path());

    let control = PlayerControl::new();
    let join = spawn_worker(
        control.clone(),
        Arc::new(DecoderRegistry::builtin()),
        Arc::new(LocalInputOpener::new(None)),
        PlaybackConfig::default(),
        || Box::new(NullOutput::new(false)),
    )
    .unwrap();

    control
        .play(Song::new(path.to_str().unwrap()).shared())
        .unwrap();
    assert!(control.error_kind().is_none());
    assert_eq!(control.total_time(), Some(1));

    let deadline = Instant::now() + Duration::from_secs(5);
    while control.state() != PlaybackState::Stopped && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(control.state(), PlaybackState::Stopped);
    assert!(control.error_kind().is_none());
    assert_eq!(control.sample_rate(), RATE);

    control.kill().unwrap();
    join.join().unwrap();
}
