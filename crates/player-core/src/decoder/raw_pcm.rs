//! Headerless 16-bit big-endian PCM (`audio/L16`).
//!
//! Stream parameters come from the MIME type (`audio/L16;rate=48000;channels=1`),
//! defaulting to 44.1 kHz stereo.

use std::io::{ErrorKind, Seek, SeekFrom};

use super::{Chunk, DecodeError, DecodeSession, DecoderPlugin, Tag};
use crate::audio_format::AudioFormat;
use crate::input::InputStream;

const DEFAULT_RATE: u32 = 44_100;
const DEFAULT_CHANNELS: u8 = 2;
const CHUNK_FRAMES: usize = 1024;

pub struct RawPcmPlugin;

impl DecoderPlugin for RawPcmPlugin {
    fn name(&self) -> &'static str {
        "raw_pcm"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &["l16"]
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["audio/L16"]
    }

    fn open(&self, input: Box<dyn InputStream>) -> Result<Box<dyn DecodeSession>, DecodeError> {
        let format = format_from_mime(input.mime())?;
        Ok(Box::new(RawPcmSession {
            total_time: input.size().map(|size| format.duration_of(size as usize)),
            seekable: input.seekable(),
            input,
            format,
            position: 0,
        }))
    }

    fn tag(&self, input: Box<dyn InputStream>) -> Result<Option<Tag>, DecodeError> {
        let format = format_from_mime(input.mime())?;
        Ok(Some(Tag {
            duration: input.size().map(|size| format.duration_of(size as usize)),
            ..Tag::default()
        }))
    }
}

struct RawPcmSession {
    input: Box<dyn InputStream>,
    format: AudioFormat,
    total_time: Option<f64>,
    seekable: bool,
    /// Byte offset of the next read.
    position: u64,
}

impl DecodeSession for RawPcmSession {
    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    fn total_time(&self) -> Option<f64> {
        self.total_time
    }

    fn seekable(&self) -> bool {
        self.seekable
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>, DecodeError> {
        let mut buf = vec![0u8; self.format.bytes_for_frames(CHUNK_FRAMES)];
        let filled = read_full(self.input.as_mut(), &mut buf)?;
        let frame = self.format.frame_size().unwrap_or(2);
        let usable = filled - filled % frame;
        if usable == 0 {
            return Ok(None);
        }
        buf.truncate(usable);

        for sample in buf.chunks_exact_mut(2) {
            let value = i16::from_be_bytes([sample[0], sample[1]]);
            sample.copy_from_slice(&value.to_ne_bytes());
        }

        let timestamp = self.format.duration_of(self.position as usize);
        self.position += filled as u64;
        let bit_rate = self.format.sample_rate * 16 * u32::from(self.format.channels) / 1000;
        Ok(Some(Chunk {
            pcm: buf,
            timestamp: Some(timestamp),
            bit_rate_kbps: Some(bit_rate),
        }))
    }

    fn seek(&mut self, target: f64) -> Result<(), DecodeError> {
        if !self.seekable {
            return Err(DecodeError::Seek("stream is not seekable".into()));
        }
        if !target.is_finite() || target < 0.0 {
            return Err(DecodeError::Seek(format!("invalid target {target}")));
        }
        let frame = (target * f64::from(self.format.sample_rate)) as u64;
        let offset = frame * self.format.frame_size().unwrap_or(2) as u64;
        if let Some(size) = self.input.size() {
            if offset > size {
                return Err(DecodeError::Seek(format!("target {target}s past end of stream")));
            }
        }
        self.input
            .seek(SeekFrom::Start(offset))
            .map_err(|e| DecodeError::Seek(e.to_string()))?;
        self.position = offset;
        Ok(())
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read.
fn read_full(input: &mut dyn InputStream, buf: &mut [u8]) -> Result<usize, DecodeError> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(DecodeError::Io(e)),
        }
    }
    Ok(filled)
}

/// Parse `rate=` and `channels=` parameters of an `audio/L16` MIME type.
fn format_from_mime(mime: Option<&str>) -> Result<AudioFormat, DecodeError> {
    let mut rate = DEFAULT_RATE;
    let mut channels = DEFAULT_CHANNELS;

    for param in mime.unwrap_or("").split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "rate" => {
                rate = value
                    .parse()
                    .map_err(|_| DecodeError::InvalidFormat(format!("rate={value}")))?;
            }
            "channels" => {
                channels = value
                    .parse()
                    .map_err(|_| DecodeError::InvalidFormat(format!("channels={value}")))?;
            }
            _ => {}
        }
    }

    let format = AudioFormat::new(rate, 16, channels);
    if !format.is_valid() {
        return Err(DecodeError::InvalidFormat(format.to_string()));
    }
    Ok(format)
}
