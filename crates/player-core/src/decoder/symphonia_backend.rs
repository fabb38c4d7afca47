//! Symphonia-backed decoder for the common containers and codecs.
//!
//! Probes the container, picks the first decodable track and converts every
//! decoded packet to interleaved integer PCM at 8, 16 or 24 bits, chosen from
//! the source's bits per sample.

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::{Hint, ProbeResult};
use symphonia::core::units::{Time, TimeBase};

use super::{Chunk, DecodeError, DecodeSession, DecoderPlugin, Tag};
use crate::audio_format::{AudioFormat, output_bits_for};
use crate::input::{InputMediaSource, InputStream, uri_suffix};

pub struct SymphoniaPlugin;

impl DecoderPlugin for SymphoniaPlugin {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &["flac", "mp3", "ogg", "oga", "wav", "aif", "aiff", "m4a", "mp4", "aac"]
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &[
            "audio/flac",
            "audio/x-flac",
            "audio/mpeg",
            "audio/ogg",
            "audio/vorbis",
            "audio/wav",
            "audio/x-wav",
            "audio/aiff",
            "audio/x-aiff",
            "audio/mp4",
            "audio/aac",
        ]
    }

    /// Symphonia sniffs the container itself, so it is tried for streams
    /// without a usable suffix or MIME type.
    fn is_fallback(&self) -> bool {
        true
    }

    fn open(&self, input: Box<dyn InputStream>) -> Result<Box<dyn DecodeSession>, DecodeError> {
        let seekable = input.seekable();
        let probed = probe(input)?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioStream)?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => DecodeError::UnsupportedCodec(what.to_string()),
                other => DecodeError::Open(other.to_string()),
            })?;

        let audio_format = audio_format_from_params(&codec_params)?;
        let total_time = total_time_from_params(&codec_params);

        tracing::debug!(
            format = %audio_format,
            total_secs = ?total_time,
            seekable,
            "symphonia stream opened"
        );

        Ok(Box::new(SymphoniaSession {
            format,
            decoder,
            track_id,
            time_base: codec_params.time_base,
            audio_format,
            total_time,
            seekable,
        }))
    }

    fn tag(&self, input: Box<dyn InputStream>) -> Result<Option<Tag>, DecodeError> {
        let mut probed = probe(input)?;

        let duration = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .map(|t| total_time_from_params(&t.codec_params))
            .ok_or(DecodeError::NoAudioStream)?;

        let mut tag = Tag {
            duration,
            ..Tag::default()
        };
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                fill_tag(&mut tag, revision);
            }
        }
        if let Some(revision) = probed.format.metadata().current() {
            fill_tag(&mut tag, revision);
        }
        Ok(Some(tag))
    }
}

struct SymphoniaSession {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    audio_format: AudioFormat,
    total_time: Option<f64>,
    seekable: bool,
}

impl DecodeSession for SymphoniaSession {
    fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    fn total_time(&self) -> Option<f64> {
        self.total_time
    }

    fn seekable(&self) -> bool {
        self.seekable
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let timestamp = self.time_base.map(|tb| seconds(tb.calc_time(packet.ts())));
            let bit_rate_kbps = self.time_base.and_then(|tb| {
                let secs = seconds(tb.calc_time(packet.dur()));
                (secs > 0.0).then(|| (packet.buf().len() as f64 * 8.0 / secs / 1000.0) as u32)
            });

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    return Err(DecodeError::CorruptChunk(msg.to_string()));
                }
                Err(SymphoniaError::IoError(e)) => {
                    return Err(DecodeError::CorruptChunk(e.to_string()));
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            };

            return Ok(Some(Chunk {
                pcm: interleave(decoded, self.audio_format.bits),
                timestamp,
                bit_rate_kbps,
            }));
        }
    }

    fn seek(&mut self, target: f64) -> Result<(), DecodeError> {
        if !self.seekable {
            return Err(DecodeError::Seek("stream is not seekable".into()));
        }
        if !target.is_finite() || target < 0.0 {
            return Err(DecodeError::Seek(format!("invalid target {target}")));
        }
        let time = Time::new(target.trunc() as u64, target.fract());
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecodeError::Seek(e.to_string()))?;
        self.decoder.reset();
        Ok(())
    }
}

fn probe(input: Box<dyn InputStream>) -> Result<ProbeResult, DecodeError> {
    let mut hint = Hint::new();
    if let Some(ext) = uri_suffix(input.uri()) {
        hint.with_extension(&ext);
    }
    if let Some(mime) = input.mime() {
        hint.mime_type(super::mime_base(mime));
    }

    let mss = MediaSourceStream::new(Box::new(InputMediaSource::new(input)), Default::default());
    symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions {
                enable_gapless: true,
                ..FormatOptions::default()
            },
            &MetadataOptions::default(),
        )
        .map_err(|e| match e {
            SymphoniaError::Unsupported(what) => DecodeError::UnsupportedCodec(what.to_string()),
            other => DecodeError::Open(other.to_string()),
        })
}

fn audio_format_from_params(params: &CodecParameters) -> Result<AudioFormat, DecodeError> {
    let rate = params
        .sample_rate
        .ok_or_else(|| DecodeError::InvalidFormat("unknown sample rate".into()))?;
    let channels = params
        .channels
        .ok_or_else(|| DecodeError::InvalidFormat("unknown channel layout".into()))?
        .count();
    let channels = u8::try_from(channels)
        .map_err(|_| DecodeError::InvalidFormat(format!("{channels} channels")))?;

    let format = AudioFormat::new(rate, output_bits_for(params.bits_per_sample), channels);
    if !format.is_valid() {
        return Err(DecodeError::InvalidFormat(format.to_string()));
    }
    Ok(format)
}

/// Stream length in seconds, or `None` when the container does not say.
fn total_time_from_params(params: &CodecParameters) -> Option<f64> {
    let frames = params.n_frames?;
    if let Some(tb) = params.time_base {
        return Some(seconds(tb.calc_time(frames)));
    }
    let rate = params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames as f64 / f64::from(rate))
}

fn seconds(time: Time) -> f64 {
    time.seconds as f64 + time.frac
}

/// Convert a decoded buffer to interleaved host-order PCM at `bits`.
fn interleave(decoded: AudioBufferRef<'_>, bits: u8) -> Vec<u8> {
    let spec = *decoded.spec();
    let frames = decoded.frames() as u64;
    match bits {
        8 => {
            let mut buf = SampleBuffer::<i8>::new(frames, spec);
            buf.copy_interleaved_ref(decoded);
            buf.samples().iter().map(|s| *s as u8).collect()
        }
        16 => {
            let mut buf = SampleBuffer::<i16>::new(frames, spec);
            buf.copy_interleaved_ref(decoded);
            buf.samples().iter().flat_map(|s| s.to_ne_bytes()).collect()
        }
        _ => {
            let mut buf = SampleBuffer::<i32>::new(frames, spec);
            buf.copy_interleaved_ref(decoded);
            buf.samples()
                .iter()
                .flat_map(|s| (s >> 8).to_ne_bytes())
                .collect()
        }
    }
}

fn fill_tag(tag: &mut Tag, revision: &MetadataRevision) {
    for item in revision.tags() {
        let slot = match item.std_key {
            Some(StandardTagKey::TrackTitle) => &mut tag.title,
            Some(StandardTagKey::Artist) => &mut tag.artist,
            Some(StandardTagKey::Album) => &mut tag.album,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(item.value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::Channels;

    #[test]
    fn total_time_uses_time_base() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        params.time_base = Some(TimeBase::new(1, 48_000));
        assert_eq!(total_time_from_params(&params), Some(2.0));
    }

    #[test]
    fn total_time_falls_back_to_sample_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(44_100);
        params.n_frames = Some(22_050);
        assert_eq!(total_time_from_params(&params), Some(0.5));
    }

    #[test]
    fn total_time_unknown_without_frames_or_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(total_time_from_params(&params).is_none());
        let params = CodecParameters::new();
        assert!(total_time_from_params(&params).is_none());
    }

    #[test]
    fn audio_format_picks_supported_depth() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(96_000);
        params.channels = Some(Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        params.bits_per_sample = Some(24);
        assert_eq!(
            audio_format_from_params(&params).unwrap(),
            AudioFormat::new(96_000, 24, 2)
        );
        params.bits_per_sample = None;
        assert_eq!(audio_format_from_params(&params).unwrap().bits, 16);
    }

    #[test]
    fn audio_format_requires_rate_and_channels() {
        let mut params = CodecParameters::new();
        params.channels = Some(Channels::FRONT_LEFT);
        assert!(audio_format_from_params(&params).is_err());
        params.sample_rate = Some(44_100);
        params.channels = None;
        assert!(audio_format_from_params(&params).is_err());
    }
}
