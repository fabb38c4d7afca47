//! Software volume stage.
//!
//! Scales interleaved PCM in place by `volume / 1000`. A small triangular dither
//! is added before rounding and the result is clamped to the sample's range.

use thiserror::Error;

use crate::audio_format::AudioFormat;

/// Unity gain.
pub const VOLUME_UNITY: i32 = 1000;

/// Largest magnitude the dither term can reach.
///
/// Must stay below `VOLUME_UNITY / 2` so silence scales to silence.
pub const DITHER_BOUND: i32 = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VolumeError {
    #[error("{0} bits not supported by the volume stage")]
    UnsupportedBits(u8),
}

/// Triangular dither source backed by a 64-bit LCG.
#[derive(Clone, Debug)]
pub struct Dither {
    state: u64,
}

impl Dither {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_byte(&mut self) -> i32 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.state >> 33) & 0xff) as i32
    }

    /// Next zero-mean dither value in `-DITHER_BOUND..=DITHER_BOUND`.
    pub fn next(&mut self) -> i32 {
        self.next_byte() - self.next_byte()
    }
}

impl Default for Dither {
    fn default() -> Self {
        Self::new(0x5eed_d17e_0000_0001)
    }
}

/// Apply software volume to `buffer`, which holds samples in `format`.
///
/// - `volume == VOLUME_UNITY` leaves the buffer untouched.
/// - `volume <= 0` zeroes the whole buffer.
/// - otherwise every sample is scaled, dithered, rounded and clamped.
///   Bit depths other than 8, 16 and 24 are rejected.
///
/// Trailing bytes that do not form a whole sample are left as they are.
pub fn apply_volume(
    buffer: &mut [u8],
    format: &AudioFormat,
    volume: i32,
    dither: &mut Dither,
) -> Result<(), VolumeError> {
    if volume == VOLUME_UNITY {
        return Ok(());
    }

    if volume <= 0 {
        buffer.fill(0);
        return Ok(());
    }

    match format.bits {
        8 => {
            for byte in buffer.iter_mut() {
                let sample = i64::from(*byte as i8);
                *byte = clamp_sample(scale(sample, volume, dither), 8) as i8 as u8;
            }
        }
        16 => {
            for chunk in buffer.chunks_exact_mut(2) {
                let sample = i64::from(i16::from_ne_bytes([chunk[0], chunk[1]]));
                let scaled = clamp_sample(scale(sample, volume, dither), 16) as i16;
                chunk.copy_from_slice(&scaled.to_ne_bytes());
            }
        }
        24 => {
            for chunk in buffer.chunks_exact_mut(4) {
                let sample = i64::from(i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                let scaled = clamp_sample(scale(sample, volume, dither), 24) as i32;
                chunk.copy_from_slice(&scaled.to_ne_bytes());
            }
        }
        other => return Err(VolumeError::UnsupportedBits(other)),
    }

    Ok(())
}

fn scale(sample: i64, volume: i32, dither: &mut Dither) -> i64 {
    (sample * i64::from(volume) + i64::from(dither.next()) + i64::from(VOLUME_UNITY / 2))
        / i64::from(VOLUME_UNITY)
}

fn clamp_sample(sample: i64, bits: u32) -> i64 {
    let max = (1i64 << (bits - 1)) - 1;
    let min = -(1i64 << (bits - 1));
    sample.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(bits: u8) -> AudioFormat {
        AudioFormat::new(44_100, bits, 2)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 + 11) as u8).collect()
    }

    #[test]
    fn dither_stays_within_bound() {
        let mut dither = Dither::default();
        let mut saw_negative = false;
        let mut saw_positive = false;
        for _ in 0..10_000 {
            let d = dither.next();
            assert!((-DITHER_BOUND..=DITHER_BOUND).contains(&d));
            saw_negative |= d < 0;
            saw_positive |= d > 0;
        }
        assert!(saw_negative && saw_positive);
    }

    #[test]
    fn unity_is_identity_for_every_depth() {
        for bits in [8, 16, 24] {
            let original = pattern(96);
            let mut buf = original.clone();
            apply_volume(&mut buf, &fmt(bits), VOLUME_UNITY, &mut Dither::default()).unwrap();
            assert_eq!(buf, original, "bits={bits}");
        }
    }

    #[test]
    fn non_positive_volume_zeroes_buffer_and_keeps_length() {
        for bits in [8, 16, 24] {
            for volume in [0, -1, -1000] {
                let mut buf = pattern(50);
                apply_volume(&mut buf, &fmt(bits), volume, &mut Dither::default()).unwrap();
                assert_eq!(buf.len(), 50);
                assert!(buf.iter().all(|b| *b == 0), "bits={bits} volume={volume}");
            }
        }
    }

    #[test]
    fn silence_stays_silent_for_every_volume() {
        let mut dither = Dither::new(42);
        for bits in [8, 16, 24] {
            for volume in [1, 3, 250, 500, 999, 1000, 1001, 1500] {
                let mut buf = vec![0u8; 64];
                apply_volume(&mut buf, &fmt(bits), volume, &mut dither).unwrap();
                assert!(buf.iter().all(|b| *b == 0), "bits={bits} volume={volume}");
            }
        }
    }

    #[test]
    fn half_volume_halves_16_bit_samples() {
        let samples: [i16; 4] = [10_000, -10_000, 2_000, -32_768];
        let mut buf: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        apply_volume(&mut buf, &fmt(16), 500, &mut Dither::default()).unwrap();
        let out: Vec<i16> = buf
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect();
        let expected = [5_000, -5_000, 1_000, -16_384];
        for (got, want) in out.iter().zip(expected) {
            assert!((i32::from(*got) - want).abs() <= 1, "got {got}, want {want}");
        }
    }

    #[test]
    fn boost_clamps_to_24_bit_range() {
        let samples: [i32; 2] = [8_000_000, -8_000_000];
        let mut buf: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        apply_volume(&mut buf, &fmt(24), 2000, &mut Dither::default()).unwrap();
        let out: Vec<i32> = buf
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(out, vec![(1 << 23) - 1, -(1 << 23)]);
    }

    #[test]
    fn scales_8_bit_samples() {
        let mut buf = vec![100i8 as u8, (-100i8) as u8];
        apply_volume(&mut buf, &fmt(8), 100, &mut Dither::default()).unwrap();
        assert_eq!(buf[0] as i8, 10);
        assert!((-10..=-9).contains(&(buf[1] as i8)));
    }

    #[test]
    fn unsupported_depth_is_an_error() {
        let mut buf = pattern(8);
        let err = apply_volume(&mut buf, &fmt(32), 500, &mut Dither::default()).unwrap_err();
        assert_eq!(err, VolumeError::UnsupportedBits(32));
    }

    #[test]
    fn channel_count_does_not_change_result() {
        let original = pattern(48);
        let mut mono = original.clone();
        let mut stereo = original.clone();
        apply_volume(&mut mono, &AudioFormat::new(44_100, 16, 1), 700, &mut Dither::new(7)).unwrap();
        apply_volume(&mut stereo, &AudioFormat::new(44_100, 16, 2), 700, &mut Dither::new(7))
            .unwrap();
        assert_eq!(mono, stereo);
    }
}
