//! Song handles shared with the playback core.

use std::sync::Arc;

/// A playable song as seen by the playback core.
///
/// Songs are owned by the queue/database side; the core only keeps shared
/// references and never mutates them.
#[derive(Debug, PartialEq)]
pub struct Song {
    /// Location of the song: a local path, `file://` URL or stream URL.
    pub url: String,
    /// Duration from the song's tag, in seconds, when known.
    pub duration: Option<f64>,
}

/// Shared, immutable song reference.
pub type SongRef = Arc<Song>;

impl Song {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn shared(self) -> SongRef {
        Arc::new(self)
    }
}

/// Identity comparison: two handles refer to the same queued song.
pub fn same_song(a: Option<&SongRef>, b: Option<&SongRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
