//! Streaming resample stage.
//!
//! Uses Rubato to convert interleaved `f32` audio from the song's rate to the
//! device rate. Runs in a background thread between the source queue and the
//! device queue.

use std::sync::Arc;
use std::thread;

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use super::OutputError;
use super::queue::{PopStrategy, SharedAudio, calc_max_buffered_samples};

#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input chunk size in frames for the steady-state loop.
    pub chunk_frames: usize,
    /// Target buffering (seconds) for the output queue.
    pub buffer_seconds: f32,
}

/// Start a resampler thread reading `srcq` at `src_rate` and writing a new
/// queue at `dst_rate`.
///
/// When `srcq` closes, the buffered tail is flushed and the returned queue is
/// closed.
pub fn start_resampler(
    srcq: Arc<SharedAudio>,
    src_rate: u32,
    dst_rate: u32,
    cfg: ResampleConfig,
) -> Result<Arc<SharedAudio>, OutputError> {
    let channels = srcq.channels();
    let max_buffered_samples = calc_max_buffered_samples(dst_rate, channels, cfg.buffer_seconds);
    let dstq = Arc::new(SharedAudio::new(channels, max_buffered_samples));

    let f_ratio = dst_rate as f64 / src_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let chunk_in_frames = cfg.chunk_frames.max(1);

    let dstq_thread = dstq.clone();
    thread::Builder::new()
        .name("resampler".into())
        .spawn(move || {
            let mut resampler: Box<dyn Resampler<f32>> = match Async::<f32>::new_sinc(
                f_ratio,
                1.1,
                &params,
                chunk_in_frames,
                channels,
                FixedAsync::Input,
            ) {
                Ok(r) => Box::new(r),
                Err(e) => {
                    tracing::error!("resampler init error: {e:#}");
                    dstq_thread.close();
                    return;
                }
            };

            let mut out_interleaved = vec![0.0f32; channels * chunk_in_frames * 3];

            while let Some(interleaved) =
                srcq.pop(PopStrategy::BlockingExact { frames: chunk_in_frames })
            {
                let Some(produced) = process(
                    resampler.as_mut(),
                    &interleaved,
                    &mut out_interleaved,
                    channels,
                    None,
                ) else {
                    break;
                };
                dstq_thread.push_interleaved_blocking(&out_interleaved[..produced]);
            }

            while let Some(tail) = srcq.pop(PopStrategy::BlockingUpTo {
                max_frames: chunk_in_frames,
            }) {
                let tail_frames = tail.len() / channels;
                let Some(produced) = process(
                    resampler.as_mut(),
                    &tail,
                    &mut out_interleaved,
                    channels,
                    Some(tail_frames),
                ) else {
                    break;
                };
                if produced > 0 {
                    dstq_thread.push_interleaved_blocking(&out_interleaved[..produced]);
                }
            }

            dstq_thread.close();
        })
        .map_err(|e| OutputError::Stream(format!("spawn resampler: {e}")))?;

    tracing::debug!(src_rate, dst_rate, channels, "resampler started");
    Ok(dstq)
}

/// Resample one interleaved block; returns the number of output samples.
fn process(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    out: &mut [f32],
    channels: usize,
    partial_len: Option<usize>,
) -> Option<usize> {
    let in_frames = input.len() / channels;
    let input_adapter = match InterleavedSlice::new(input, channels, in_frames) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("interleaved slice (input) error: {e:#}");
            return None;
        }
    };

    let out_frames = out.len() / channels;
    let mut output_adapter = match InterleavedSlice::new_mut(out, channels, out_frames) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("interleaved slice (output) error: {e:#}");
            return None;
        }
    };

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };

    match resampler.process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing)) {
        Ok((_nbr_in, nbr_out)) => Some(nbr_out * channels),
        Err(e) => {
            tracing::error!("resampler process error: {e:#}");
            None
        }
    }
}
