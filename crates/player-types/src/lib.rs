use serde::{Deserialize, Serialize};

/// Coarse playback state owned by the decode worker.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No stream is open.
    #[default]
    Stopped,
    /// A stream is open and audio is being produced.
    Playing,
    /// A stream is open but output writes are suspended.
    Paused,
}

/// Whether the upcoming-song slot is occupied.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    #[default]
    Blank,
    Full,
}

/// Cooperative lock guarding the upcoming-song slot.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueLockState {
    Locked,
    #[default]
    Unlocked,
}

/// Error classes surfaced to front-ends.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerErrorKind {
    /// The song's input could not be opened.
    FileNotFound,
    /// No decoder backend accepts the stream.
    UnsupportedType,
    /// A backend accepted the stream but could not decode it.
    DecodeFailure,
    /// The output device could not be opened or rejected the format.
    AudioDeviceFailure,
    /// Any other unrecoverable failure.
    SystemError,
    /// The active backend could not reposition; playback continued.
    SeekFailure,
}

/// Resolved PCM format of the current stream.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormatInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Significant bits per sample (8, 16 or 24).
    pub bits: u8,
    /// Interleaved channel count.
    pub channels: u8,
}

/// Error slot reported alongside a status snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerErrorInfo {
    pub kind: PlayerErrorKind,
    /// Human-readable message, embedding the song URL where relevant.
    pub message: String,
}

/// Point-in-time view of the playback controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    /// URL of the song the worker is decoding, if any.
    pub song: Option<String>,
    /// Elapsed time rounded to whole seconds.
    pub elapsed_secs: u64,
    /// Total time rounded to whole seconds; `None` when unknown.
    pub total_secs: Option<u64>,
    /// Bit rate in kbps reported by the backend.
    pub bit_rate_kbps: u32,
    pub audio_format: Option<AudioFormatInfo>,
    /// Software volume (0..=1000, 1000 is unity gain).
    pub software_volume: i32,
    /// Configured cross-fade in seconds.
    pub cross_fade_secs: f32,
    pub queue_state: QueueState,
    pub queue_lock: QueueLockState,
    pub error: Option<PlayerErrorInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case_enums() {
        let status = PlayerStatus {
            state: PlaybackState::Paused,
            error: Some(PlayerErrorInfo {
                kind: PlayerErrorKind::UnsupportedType,
                message: "file type of \"a.xyz\" is unknown".to_string(),
            }),
            ..PlayerStatus::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "paused");
        assert_eq!(json["queue_state"], "blank");
        assert_eq!(json["queue_lock"], "unlocked");
        assert_eq!(json["error"]["kind"], "unsupported_type");
    }

    #[test]
    fn default_status_is_stopped_without_format() {
        let status = PlayerStatus::default();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert!(status.audio_format.is_none());
        assert!(status.total_secs.is_none());
    }
}
