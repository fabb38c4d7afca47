//! Player error taxonomy and caller-facing errors.

use thiserror::Error;

pub use player_types::PlayerErrorKind;

use crate::song::SongRef;

/// The controller's current error: a kind plus the song that caused it.
#[derive(Clone, Debug)]
pub struct PlayerError {
    pub kind: PlayerErrorKind,
    pub song: Option<SongRef>,
}

impl PlayerError {
    pub fn new(kind: PlayerErrorKind, song: Option<SongRef>) -> Self {
        Self { kind, song }
    }

    /// Human-readable message.
    ///
    /// Song-related errors embed the offending URL; device and system errors
    /// use fixed text.
    pub fn message(&self) -> String {
        let url = self.song.as_ref().map(|s| s.url.as_str()).unwrap_or("");
        match self.kind {
            PlayerErrorKind::FileNotFound => {
                format!("file \"{url}\" does not exist or is inaccessible")
            }
            PlayerErrorKind::DecodeFailure => format!("problems decoding \"{url}\""),
            PlayerErrorKind::UnsupportedType => format!("file type of \"{url}\" is unknown"),
            PlayerErrorKind::SeekFailure => format!("seeking in \"{url}\" failed"),
            PlayerErrorKind::AudioDeviceFailure => "problems opening audio device".to_string(),
            PlayerErrorKind::SystemError => "system error occurred".to_string(),
        }
    }
}

/// Errors returned directly to callers of [`crate::control::PlayerControl`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("not playing")]
    NotPlaying,
    #[error("seek failed")]
    SeekFailed,
    #[error("queue is already locked")]
    QueueAlreadyLocked,
    #[error("queue is locked")]
    QueueLocked,
    #[error("queue already holds a song")]
    QueueFull,
    #[error("decode worker has exited")]
    WorkerGone,
}
