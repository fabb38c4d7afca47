//! Raw PCM format description.
//!
//! Samples are signed and stored in host byte order. 24-bit samples are packed
//! into 32-bit words, so a 24-bit buffer uses four bytes per sample.

use std::fmt;

use player_types::AudioFormatInfo;

/// Sample rate, bit depth and channel count of an interleaved PCM stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits: u8,
    pub channels: u8,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, bits: u8, channels: u8) -> Self {
        Self {
            sample_rate,
            bits,
            channels,
        }
    }

    /// Whether every field holds a value the playback core accepts.
    pub fn is_valid(&self) -> bool {
        valid_sample_rate(self.sample_rate)
            && valid_bits(self.bits)
            && valid_channel_count(self.channels)
    }

    /// Storage size of one sample in bytes, or `None` for unsupported depths.
    pub fn sample_size(&self) -> Option<usize> {
        match self.bits {
            8 => Some(1),
            16 => Some(2),
            24 => Some(4),
            _ => None,
        }
    }

    /// Storage size of one interleaved frame in bytes.
    pub fn frame_size(&self) -> Option<usize> {
        self.sample_size()
            .map(|size| size * usize::from(self.channels))
    }

    /// Playback duration of `bytes` of PCM in this format, in seconds.
    pub fn duration_of(&self, bytes: usize) -> f64 {
        match self.frame_size() {
            Some(frame) if frame > 0 && self.sample_rate > 0 => {
                (bytes / frame) as f64 / f64::from(self.sample_rate)
            }
            _ => 0.0,
        }
    }

    /// Byte length of a buffer holding `frames` frames.
    pub fn bytes_for_frames(&self, frames: usize) -> usize {
        self.frame_size().unwrap_or(0).saturating_mul(frames)
    }

    pub fn info(&self) -> AudioFormatInfo {
        AudioFormatInfo {
            sample_rate: self.sample_rate,
            bits: self.bits,
            channels: self.channels,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sample_rate, self.bits, self.channels)
    }
}

pub fn valid_sample_rate(rate: u32) -> bool {
    rate > 0 && rate < (1 << 30)
}

pub fn valid_bits(bits: u8) -> bool {
    matches!(bits, 8 | 16 | 24)
}

pub fn valid_channel_count(channels: u8) -> bool {
    (1..=8).contains(&channels)
}

/// Map a source's bits-per-sample to the nearest supported output depth.
///
/// Unknown depths (typical for lossy codecs) decode to 16 bits.
pub fn output_bits_for(source_bits: Option<u32>) -> u8 {
    match source_bits {
        Some(bits) if bits <= 8 => 8,
        Some(bits) if bits <= 16 => 16,
        Some(_) => 24,
        None => 16,
    }
}
