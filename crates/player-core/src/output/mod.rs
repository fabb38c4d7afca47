//! Audio output sinks.
//!
//! The decode worker owns exactly one [`AudioOutput`]. It opens the output
//! lazily for the first chunk's format, keeps it open across songs with the
//! same format and closes it only on `CloseAudio`.

pub mod cpal_output;
pub mod device;
pub mod queue;
pub mod resample;

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::audio_format::AudioFormat;

pub use cpal_output::CpalOutput;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("audio device: {0}")]
    Device(String),
    #[error("output config: {0}")]
    Config(String),
    #[error("output stream: {0}")]
    Stream(String),
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("output is not open")]
    NotOpen,
}

/// A PCM sink.
///
/// Implementations are created and used on the decode worker thread only.
pub trait AudioOutput {
    fn name(&self) -> &str;

    /// Format the output is currently open with.
    fn format(&self) -> Option<AudioFormat>;

    fn is_open(&self) -> bool {
        self.format().is_some()
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), OutputError>;

    /// Queue interleaved PCM in the open format. May block until there is room.
    fn play(&mut self, pcm: &[u8]) -> Result<(), OutputError>;

    /// Hold playback without discarding buffered audio.
    fn pause(&mut self);

    fn resume(&mut self);

    /// Discard buffered audio; the output stays open.
    fn cancel(&mut self);

    /// Wait up to `timeout` for buffered audio to play out.
    ///
    /// Returns `true` once nothing is left to play.
    fn drain(&mut self, timeout: Duration) -> bool;

    fn close(&mut self);
}

/// Output that discards audio.
///
/// With `sync` set, `play` sleeps for the chunk's duration so playback runs in
/// real time.
#[derive(Debug, Default)]
pub struct NullOutput {
    sync: bool,
    format: Option<AudioFormat>,
    paused: bool,
}

impl NullOutput {
    pub fn new(sync: bool) -> Self {
        Self {
            sync,
            ..Self::default()
        }
    }
}

impl AudioOutput for NullOutput {
    fn name(&self) -> &str {
        "null"
    }

    fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), OutputError> {
        if format.sample_size().is_none() {
            return Err(OutputError::UnsupportedFormat(format.to_string()));
        }
        tracing::debug!(format = %format, "null output opened");
        self.format = Some(*format);
        self.paused = false;
        Ok(())
    }

    fn play(&mut self, pcm: &[u8]) -> Result<(), OutputError> {
        let format = self.format.ok_or(OutputError::NotOpen)?;
        if self.sync && !self.paused {
            thread::sleep(Duration::from_secs_f64(format.duration_of(pcm.len())));
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn cancel(&mut self) {}

    fn drain(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn close(&mut self) {
        self.format = None;
    }
}

/// Convert host-order integer PCM to `f32` in `[-1.0, 1.0)`.
///
/// 24-bit samples are read from 32-bit words.
pub fn pcm_to_f32(pcm: &[u8], bits: u8) -> Vec<f32> {
    match bits {
        8 => pcm.iter().map(|b| f32::from(*b as i8) / 128.0).collect(),
        16 => pcm
            .chunks_exact(2)
            .map(|c| f32::from(i16::from_ne_bytes([c[0], c[1]])) / 32_768.0)
            .collect(),
        24 => pcm
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f32 / 8_388_608.0)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_to_f32_scales_each_depth() {
        assert_eq!(pcm_to_f32(&[0x80, 0x40], 8), vec![-1.0, 0.5]);

        let pcm: Vec<u8> = [i16::MIN, 16_384].iter().flat_map(|s| s.to_ne_bytes()).collect();
        assert_eq!(pcm_to_f32(&pcm, 16), vec![-1.0, 0.5]);

        let pcm: Vec<u8> = [-8_388_608i32, 4_194_304]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        assert_eq!(pcm_to_f32(&pcm, 24), vec![-1.0, 0.5]);
        assert!(pcm_to_f32(&pcm, 32).is_empty());
    }

    #[test]
    fn null_output_requires_open() {
        let mut out = NullOutput::new(false);
        assert!(matches!(out.play(&[0, 0]), Err(OutputError::NotOpen)));

        let format = AudioFormat::new(44_100, 16, 2);
        out.open(&format).unwrap();
        assert_eq!(out.format(), Some(format));
        out.play(&[0; 16]).unwrap();
        assert!(out.drain(Duration::ZERO));

        out.close();
        assert!(!out.is_open());
    }

    #[test]
    fn null_output_rejects_unsupported_depth() {
        let mut out = NullOutput::new(false);
        assert!(out.open(&AudioFormat::new(44_100, 32, 2)).is_err());
    }
}
