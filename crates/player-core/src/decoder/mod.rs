//! Decoder backend contract.
//!
//! A backend turns an [`InputStream`] into PCM chunks. The decode worker hands it
//! a [`DecoderHandle`]; the backend reports the resolved format once, then
//! pushes chunks through the handle and polls it for commands between chunks.
//! That poll is the only preemption point, so a chunk should cover a short
//! stretch of audio.
//!
//! Most backends only implement [`DecoderPlugin::open`] and a [`DecodeSession`];
//! the provided [`DecoderPlugin::decode`] runs the standard chunk loop.

pub mod raw_pcm;
pub mod registry;
pub mod symphonia_backend;

use player_types::PlayerErrorKind;
use thiserror::Error;

use crate::audio_format::AudioFormat;
use crate::input::{InputStream, uri_suffix};

pub use registry::DecoderRegistry;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot open stream: {0}")]
    Open(String),
    #[error("no audio stream found")]
    NoAudioStream,
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("invalid audio format: {0}")]
    InvalidFormat(String),
    /// A single packet failed to decode; the stream itself is still usable.
    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("seek failed: {0}")]
    Seek(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Whether decoding may continue with the next chunk.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::CorruptChunk(_))
    }

    /// Error class reported to front-ends when this aborts playback.
    pub fn kind(&self) -> PlayerErrorKind {
        match self {
            DecodeError::UnsupportedCodec(_) => PlayerErrorKind::UnsupportedType,
            _ => PlayerErrorKind::DecodeFailure,
        }
    }
}

/// Command seen by a backend when it polls the handle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecoderCommand {
    None,
    /// Leave the decode loop and return.
    Stop,
    /// Reposition to the given time in seconds, then call
    /// [`DecoderHandle::seek_finished`].
    Seek(f64),
}

/// One unit of decoded PCM.
#[derive(Clone, Debug, Default)]
pub struct Chunk {
    /// Interleaved samples in the session's [`AudioFormat`], host byte order.
    pub pcm: Vec<u8>,
    /// Stream time of the first frame, in seconds.
    pub timestamp: Option<f64>,
    /// Instantaneous bit rate in kbps.
    pub bit_rate_kbps: Option<u32>,
}

/// Descriptive metadata readable without starting playback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tag {
    /// Duration in seconds.
    pub duration: Option<f64>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Worker side of the backend contract.
pub trait DecoderHandle {
    /// Report the resolved format before emitting audio.
    ///
    /// `total_time` is `None` when the stream length is unknown. A returned
    /// [`DecoderCommand::Stop`] means the stream must not be decoded further.
    fn initialized(
        &mut self,
        format: AudioFormat,
        seekable: bool,
        total_time: Option<f64>,
    ) -> DecoderCommand;

    /// Hand over one chunk; returns the command pending afterwards.
    fn data(&mut self, chunk: Chunk) -> DecoderCommand;

    /// Poll for a pending command without producing audio.
    fn command(&mut self) -> DecoderCommand;

    /// Acknowledge the seek requested by the last [`DecoderCommand::Seek`].
    fn seek_finished(&mut self, ok: bool);
}

/// An open decoding session over one stream.
pub trait DecodeSession: Send {
    fn audio_format(&self) -> AudioFormat;

    /// Total length in seconds; `None` when unknown.
    fn total_time(&self) -> Option<f64>;

    fn seekable(&self) -> bool;

    /// Decode the next chunk. `Ok(None)` signals end of stream.
    fn next_chunk(&mut self) -> Result<Option<Chunk>, DecodeError>;

    /// Reposition to `target` seconds without restarting the stream.
    fn seek(&mut self, target: f64) -> Result<(), DecodeError>;
}

/// A compiled-in codec/container backend.
pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lowercase file suffixes this backend handles.
    fn suffixes(&self) -> &'static [&'static str];

    /// MIME types this backend handles (without parameters).
    fn mime_types(&self) -> &'static [&'static str];

    /// Whether to try this backend for streams nothing else claims.
    fn is_fallback(&self) -> bool {
        false
    }

    /// Cheap suitability check by MIME type or suffix; never parses the stream.
    /// The registry only tries backends that accept, plus fallbacks.
    fn probe(&self, input: &dyn InputStream) -> bool {
        self.probe_mime(input) || self.probe_suffix(input)
    }

    fn probe_mime(&self, input: &dyn InputStream) -> bool {
        input
            .mime()
            .map(mime_base)
            .is_some_and(|mime| {
                self.mime_types()
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(mime))
            })
    }

    fn probe_suffix(&self, input: &dyn InputStream) -> bool {
        uri_suffix(input.uri()).is_some_and(|ext| self.suffixes().contains(&ext.as_str()))
    }

    /// Open a decoding session. Fails without emitting audio.
    fn open(&self, input: Box<dyn InputStream>) -> Result<Box<dyn DecodeSession>, DecodeError>;

    /// Decode `input` until end of stream or until the handle says stop.
    fn decode(
        &self,
        handle: &mut dyn DecoderHandle,
        input: Box<dyn InputStream>,
    ) -> Result<(), DecodeError> {
        let mut session = self.open(input)?;
        run_session(handle, session.as_mut())
    }

    /// Read metadata without decoding audio.
    fn tag(&self, input: Box<dyn InputStream>) -> Result<Option<Tag>, DecodeError>;
}

/// Standard chunk loop: report format, then decode, forward and poll.
pub fn run_session(
    handle: &mut dyn DecoderHandle,
    session: &mut dyn DecodeSession,
) -> Result<(), DecodeError> {
    let mut cmd = handle.initialized(
        session.audio_format(),
        session.seekable(),
        session.total_time(),
    );

    loop {
        match cmd {
            DecoderCommand::Stop => return Ok(()),
            DecoderCommand::Seek(target) => {
                let ok = match session.seek(target) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(target_secs = target, "seek failed: {e}");
                        false
                    }
                };
                handle.seek_finished(ok);
                cmd = handle.command();
                continue;
            }
            DecoderCommand::None => {}
        }

        cmd = match session.next_chunk() {
            Ok(Some(chunk)) => handle.data(chunk),
            Ok(None) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                tracing::warn!("skipping chunk: {e}");
                handle.command()
            }
            Err(e) => return Err(e),
        };
    }
}

/// MIME type without parameters (`audio/L16;rate=8000` -> `audio/L16`).
pub fn mime_base(mime: &str) -> &str {
    mime.split(';').next().unwrap_or(mime).trim()
}
