//! CPAL-backed output.
//!
//! PCM handed to [`CpalOutput::play`] is converted to `f32` and pushed into a
//! bounded source queue. If the song's rate differs from the device rate, a
//! resampler thread sits between the source queue and the device queue. The
//! CPAL callback:
//! - refills a small local buffer from the device queue without blocking
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};

use super::device::{pick_buffer_size, pick_device, pick_output_config};
use super::queue::{PopStrategy, SharedAudio, calc_max_buffered_samples};
use super::resample::{ResampleConfig, start_resampler};
use super::{AudioOutput, OutputError, pcm_to_f32};
use crate::audio_format::AudioFormat;
use crate::config::PlaybackConfig;

pub struct CpalOutput {
    device: Option<String>,
    playback: PlaybackConfig,
    name: String,
    open: Option<OpenStream>,
}

struct OpenStream {
    format: AudioFormat,
    _stream: cpal::Stream,
    srcq: Arc<SharedAudio>,
    dstq: Arc<SharedAudio>,
    resampling: bool,
    paused: Arc<AtomicBool>,
    flush: Arc<AtomicBool>,
}

impl CpalOutput {
    /// `device` is a case-insensitive name substring; `None` uses the default device.
    pub fn new(device: Option<String>, playback: PlaybackConfig) -> Self {
        Self {
            name: device.clone().unwrap_or_else(|| "default".into()),
            device,
            playback,
            open: None,
        }
    }

    fn start(&self, format: &AudioFormat) -> Result<OpenStream, OutputError> {
        let host = cpal::default_host();
        let device = pick_device(&host, self.device.as_deref())?;
        let config = pick_output_config(&device, Some(format.sample_rate))?;
        let mut stream_config: cpal::StreamConfig = config.config();
        if let Some(buffer_size) = pick_buffer_size(&config) {
            stream_config.buffer_size = buffer_size;
        }

        let channels = usize::from(format.channels);
        let srcq = Arc::new(SharedAudio::new(
            channels,
            calc_max_buffered_samples(format.sample_rate, channels, self.playback.buffer_seconds),
        ));

        let dst_rate = stream_config.sample_rate;
        let resampling = format.sample_rate != dst_rate;
        let dstq = if resampling {
            tracing::info!(src_rate = format.sample_rate, dst_rate, "resampling");
            start_resampler(
                srcq.clone(),
                format.sample_rate,
                dst_rate,
                ResampleConfig {
                    chunk_frames: self.playback.chunk_frames,
                    buffer_seconds: self.playback.buffer_seconds,
                },
            )?
        } else {
            tracing::info!(rate_hz = dst_rate, "resample skipped");
            srcq.clone()
        };

        let paused = Arc::new(AtomicBool::new(false));
        let flush = Arc::new(AtomicBool::new(false));
        let stream = build_output_stream(
            &device,
            &stream_config,
            config.sample_format(),
            &dstq,
            StreamControl {
                refill_max_frames: self.playback.refill_max_frames,
                paused: paused.clone(),
                flush: flush.clone(),
            },
        )?;
        stream
            .play()
            .map_err(|e| OutputError::Stream(e.to_string()))?;

        tracing::info!(
            device = %self.name,
            format = %format,
            device_channels = stream_config.channels,
            sample_format = ?config.sample_format(),
            "audio output opened"
        );

        Ok(OpenStream {
            format: *format,
            _stream: stream,
            srcq,
            dstq,
            resampling,
            paused,
            flush,
        })
    }
}

impl AudioOutput for CpalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> Option<AudioFormat> {
        self.open.as_ref().map(|o| o.format)
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), OutputError> {
        self.close();
        if format.sample_size().is_none() {
            return Err(OutputError::UnsupportedFormat(format.to_string()));
        }
        self.open = Some(self.start(format)?);
        Ok(())
    }

    fn play(&mut self, pcm: &[u8]) -> Result<(), OutputError> {
        let open = self.open.as_ref().ok_or(OutputError::NotOpen)?;
        let samples = pcm_to_f32(pcm, open.format.bits);
        open.srcq.push_interleaved_blocking(&samples);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(open) = &self.open {
            open.paused.store(true, Ordering::Relaxed);
        }
    }

    fn resume(&mut self) {
        if let Some(open) = &self.open {
            open.paused.store(false, Ordering::Relaxed);
        }
    }

    fn cancel(&mut self) {
        if let Some(open) = &self.open {
            open.srcq.clear();
            open.dstq.clear();
            open.flush.store(true, Ordering::Relaxed);
        }
    }

    fn drain(&mut self, timeout: Duration) -> bool {
        let Some(open) = &self.open else {
            return true;
        };
        // The resampler only consumes whole chunks; a shorter tail stays queued.
        let residual = if open.resampling {
            self.playback.chunk_frames
        } else {
            1
        };
        open.srcq.wait_until_below(residual, timeout) && open.dstq.wait_until_below(1, timeout)
    }

    fn close(&mut self) {
        if let Some(open) = self.open.take() {
            open.paused.store(true, Ordering::Relaxed);
            open.srcq.close();
            open.dstq.close();
            tracing::info!(device = %self.name, "audio output closed");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

struct StreamControl {
    /// Maximum frames pulled from the queue per refill.
    refill_max_frames: usize,
    /// When `true`, the callback outputs silence and does not drain the queue.
    paused: Arc<AtomicBool>,
    /// Set to drop the callback's local buffer on the next invocation.
    flush: Arc<AtomicBool>,
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    dstq: &Arc<SharedAudio>,
    control: StreamControl,
) -> Result<cpal::Stream, OutputError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, dstq, control),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, dstq, control),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, dstq, control),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, dstq, control),
        other => Err(OutputError::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    dstq: &Arc<SharedAudio>,
    control: StreamControl,
) -> Result<cpal::Stream, OutputError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = usize::from(config.channels).max(1);
    let state = Mutex::new(CallbackState {
        pos: 0,
        src_channels: dstq.channels(),
        src: Vec::new(),
    });

    let refill_max_frames = control.refill_max_frames.max(1);
    let dstq_cb = dstq.clone();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
                let mut st = state.lock().unwrap_or_else(PoisonError::into_inner);
                if control.flush.swap(false, Ordering::Relaxed) {
                    st.src.clear();
                    st.pos = 0;
                }
                if control.paused.load(Ordering::Relaxed) {
                    data.fill(silence);
                    return;
                }

                let frames = data.len() / channels_out;
                for frame in 0..frames {
                    if st.pos >= st.src.len() {
                        st.pos = 0;
                        st.src.clear();
                        match dstq_cb.pop(PopStrategy::NonBlocking {
                            max_frames: refill_max_frames,
                        }) {
                            Some(v) => st.src = v,
                            None => {
                                data[frame * channels_out..].fill(silence);
                                break;
                            }
                        }
                    }
                    for ch in 0..channels_out {
                        let sample = next_sample_mapped(&mut st, channels_out, ch);
                        data[frame * channels_out + ch] =
                            <T as cpal::Sample>::from_sample::<f32>(sample);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| OutputError::Stream(e.to_string()))
}

/// Local buffer for the CPAL callback, refilled from the device queue.
struct CallbackState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to the available channels
///
/// `st.pos` advances once per destination frame (after the last channel).
fn next_sample_mapped(st: &mut CallbackState, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }

    let frame_start = st.pos;
    let get_src = |ch: usize, st: &CallbackState| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get_src(0, st) + get_src(1, st)),
        (1, _) => get_src(0, st),
        _ => get_src(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(src_channels: usize, src: Vec<f32>) -> CallbackState {
        CallbackState {
            pos: 0,
            src_channels,
            src,
        }
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let mut st = state(1, vec![0.5, -0.5]);
        assert_eq!(next_sample_mapped(&mut st, 2, 0), 0.5);
        assert_eq!(next_sample_mapped(&mut st, 2, 1), 0.5);
        assert_eq!(next_sample_mapped(&mut st, 2, 0), -0.5);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut st = state(2, vec![1.0, 0.0, 0.5, 0.5]);
        assert_eq!(next_sample_mapped(&mut st, 1, 0), 0.5);
        assert_eq!(next_sample_mapped(&mut st, 1, 0), 0.5);
        assert_eq!(next_sample_mapped(&mut st, 1, 0), 0.0);
    }

    #[test]
    fn surround_clamps_to_available_channels() {
        let mut st = state(2, vec![0.1, 0.2]);
        let out: Vec<f32> = (0..6).map(|ch| next_sample_mapped(&mut st, 6, ch)).collect();
        assert_eq!(out, vec![0.1, 0.2, 0.2, 0.2, 0.2, 0.2]);
        assert_eq!(st.pos, 2);
    }
}
