//! Input stream transports.
//!
//! Backends read through [`InputStream`] and never touch file descriptors
//! directly. Transports expose a readiness gate (`is_ready` / `buffer`) so the
//! worker can wait for remote streams without blocking commands.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use symphonia::core::io::MediaSource;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported input scheme: {0}")]
    UnsupportedScheme(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A readable byte stream with the metadata backends need for dispatch.
pub trait InputStream: Read + Seek + Send + Sync {
    /// URI the stream was opened from.
    fn uri(&self) -> &str;

    /// MIME type announced by the transport, if any.
    fn mime(&self) -> Option<&str> {
        None
    }

    /// Total size in bytes, when known.
    fn size(&self) -> Option<u64>;

    fn seekable(&self) -> bool {
        true
    }

    /// Whether metadata (mime, size) is available and reads may begin.
    fn is_ready(&self) -> bool {
        true
    }

    /// Make progress towards readiness without blocking longer than one step.
    ///
    /// Returns `Ok(true)` once the stream is ready.
    fn buffer(&mut self) -> Result<bool, InputError> {
        Ok(self.is_ready())
    }
}

/// Opens transports for song URLs.
pub trait InputOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn InputStream>, InputError>;
}

/// Opener for local files (`file://` URLs and plain paths).
#[derive(Clone, Debug, Default)]
pub struct LocalInputOpener {
    /// Base directory for relative paths.
    pub music_dir: Option<PathBuf>,
}

impl LocalInputOpener {
    pub fn new(music_dir: Option<PathBuf>) -> Self {
        Self { music_dir }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, InputError> {
        let path = if let Some(rest) = url.strip_prefix("file://") {
            PathBuf::from(rest)
        } else if url.contains("://") {
            return Err(InputError::UnsupportedScheme(url.to_string()));
        } else {
            PathBuf::from(url)
        };
        match (&self.music_dir, path.is_relative()) {
            (Some(dir), true) => Ok(dir.join(path)),
            _ => Ok(path),
        }
    }
}

impl InputOpener for LocalInputOpener {
    fn open(&self, url: &str) -> Result<Box<dyn InputStream>, InputError> {
        let path = self.resolve(url)?;
        let input = FileInput::open(&path, url)?;
        Ok(Box::new(input))
    }
}

/// Local file transport.
pub struct FileInput {
    file: File,
    uri: String,
    size: u64,
    mime: Option<&'static str>,
}

impl FileInput {
    pub fn open(path: &Path, uri: &str) -> Result<Self, InputError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                InputError::NotFound(path.display().to_string())
            }
            _ => InputError::Io(e),
        })?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(InputError::NotFound(path.display().to_string()));
        }
        Ok(Self {
            file,
            uri: uri.to_string(),
            size: meta.len(),
            mime: uri_suffix(uri).and_then(|ext| mime_for_suffix(&ext)),
        })
    }
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl InputStream for FileInput {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn mime(&self) -> Option<&str> {
        self.mime
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }
}

/// In-memory transport, used for already-fetched payloads.
pub struct MemoryInput {
    cursor: Cursor<Vec<u8>>,
    uri: String,
    mime: Option<String>,
}

impl MemoryInput {
    pub fn new(uri: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
            uri: uri.into(),
            mime: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl InputStream for MemoryInput {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    fn size(&self) -> Option<u64> {
        Some(self.cursor.get_ref().len() as u64)
    }
}

/// Adapter exposing an [`InputStream`] as a Symphonia [`MediaSource`].
pub struct InputMediaSource {
    inner: Box<dyn InputStream>,
}

impl InputMediaSource {
    pub fn new(inner: Box<dyn InputStream>) -> Self {
        Self { inner }
    }
}

impl Read for InputMediaSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for InputMediaSource {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl MediaSource for InputMediaSource {
    fn is_seekable(&self) -> bool {
        self.inner.seekable()
    }

    fn byte_len(&self) -> Option<u64> {
        self.inner.size()
    }
}

/// Lowercase file suffix of a URL or path, ignoring any query string.
pub fn uri_suffix(uri: &str) -> Option<String> {
    let tail = uri.split('?').next().unwrap_or(uri);
    let file = tail.rsplit('/').next().unwrap_or(tail);
    let mut parts = file.rsplit('.');
    let ext = parts.next()?;
    if parts.next().is_some() && !ext.is_empty() {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

/// Best-effort MIME type for a file suffix.
pub fn mime_for_suffix(suffix: &str) -> Option<&'static str> {
    let mime = match suffix {
        "flac" => "audio/flac",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "aif" | "aiff" => "audio/aiff",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "l16" => "audio/L16",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn uri_suffix_handles_query_and_missing_ext() {
        assert_eq!(uri_suffix("http://example/a.flac?x=1"), Some("flac".to_string()));
        assert_eq!(uri_suffix("http://example/a"), None);
        assert_eq!(uri_suffix("/music/Track.MP3"), Some("mp3".to_string()));
        assert_eq!(uri_suffix("/music/trailing."), None);
    }

    #[test]
    fn uri_suffix_handles_multiple_dots() {
        assert_eq!(
            uri_suffix("/music/archive.track.flac"),
            Some("flac".to_string())
        );
    }

    #[test]
    fn local_opener_rejects_remote_schemes() {
        let opener = LocalInputOpener::default();
        assert!(matches!(
            opener.open("http://host/a.mp3"),
            Err(InputError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn local_opener_reports_missing_files() {
        let opener = LocalInputOpener::default();
        assert!(matches!(
            opener.open("/definitely/not/here.flac"),
            Err(InputError::NotFound(_))
        ));
    }

    #[test]
    fn local_opener_resolves_relative_to_music_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("a.wav")).unwrap();
        file.write_all(b"RIFF").unwrap();

        let opener = LocalInputOpener::new(Some(dir.path().to_path_buf()));
        let input = opener.open("a.wav").unwrap();
        assert_eq!(input.uri(), "a.wav");
        assert_eq!(input.mime(), Some("audio/wav"));
        assert_eq!(input.size(), Some(4));
    }

    #[test]
    fn memory_input_reads_and_seeks() {
        let mut input = MemoryInput::new("mem://x", vec![1, 2, 3, 4]).with_mime("audio/L16");
        input.seek(SeekFrom::Start(2)).unwrap();
        let mut buf = [0u8; 4];
        let n = input.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[3, 4]);
        assert_eq!(input.mime(), Some("audio/L16"));
        assert!(input.buffer().unwrap());
    }
}
