use std::time::Duration;

/// Playback tuning parameters shared by the worker and the output stages.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target output queue depth in seconds.
    pub buffer_seconds: f32,
    /// Command poll period while waiting for the output to drain.
    pub drain_poll_ms: u64,
}

impl PlaybackConfig {
    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
            drain_poll_ms: 50,
        }
    }
}
