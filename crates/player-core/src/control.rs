//! Playback controller.
//!
//! Every caller shares one [`PlayerControl`] handle onto a single playback
//! context guarded by a mutex and condition variable. A blocking operation sets
//! its input fields, posts a command and waits until the decode worker resets
//! the command to `None`. Commands from concurrent callers are serialized: a
//! caller first waits for any outstanding command to be acknowledged.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use player_types::{
    PlaybackState, PlayerErrorInfo, PlayerErrorKind, PlayerStatus, QueueLockState, QueueState,
};

use crate::audio_format::AudioFormat;
use crate::error::{ControlError, PlayerError};
use crate::song::{SongRef, same_song};
use crate::volume::VOLUME_UNITY;

/// Request posted to the decode worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerCommand {
    None,
    Play,
    Stop,
    Pause,
    Seek,
    CloseAudio,
    LockQueue,
    UnlockQueue,
    Exit,
}

/// The shared playback context.
///
/// Callers only write the command-input fields (`command`, `next_song`,
/// `seek_where`, `queue_state` before Play, `software_volume`, `cross_fade`);
/// everything else belongs to the worker.
#[derive(Debug)]
pub struct PlayerContext {
    pub command: PlayerCommand,
    pub state: PlaybackState,
    pub queue_state: QueueState,
    pub queue_lock: QueueLockState,
    pub error: Option<PlayerError>,
    pub current_song: Option<SongRef>,
    pub next_song: Option<SongRef>,
    /// Seek target in seconds.
    pub seek_where: f64,
    /// Set by the worker when the last Seek could not be carried out.
    pub seek_failed: bool,
    /// Elapsed time of the current song in seconds.
    pub elapsed: f64,
    pub total_time: Option<f64>,
    pub bit_rate: u32,
    pub audio_format: Option<AudioFormat>,
    pub cross_fade: f32,
    pub software_volume: i32,
    pub worker_alive: bool,
}

impl Default for PlayerContext {
    fn default() -> Self {
        Self {
            command: PlayerCommand::None,
            state: PlaybackState::Stopped,
            queue_state: QueueState::Blank,
            queue_lock: QueueLockState::Unlocked,
            error: None,
            current_song: None,
            next_song: None,
            seek_where: 0.0,
            seek_failed: false,
            elapsed: 0.0,
            total_time: None,
            bit_rate: 0,
            audio_format: None,
            cross_fade: 0.0,
            software_volume: VOLUME_UNITY,
            worker_alive: false,
        }
    }
}

struct Shared {
    ctx: Mutex<PlayerContext>,
    cond: Condvar,
}

/// Handle onto the playback context; clone it freely across threads.
#[derive(Clone)]
pub struct PlayerControl {
    shared: Arc<Shared>,
}

impl Default for PlayerControl {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerControl {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx: Mutex::new(PlayerContext::default()),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PlayerContext> {
        self.shared.ctx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait_cond<'a>(&self, g: MutexGuard<'a, PlayerContext>) -> MutexGuard<'a, PlayerContext> {
        self.shared.cond.wait(g).unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) {
        self.shared.cond.notify_all();
    }

    /// Acknowledge the pending command and wake its issuer.
    pub(crate) fn ack(&self, mut g: MutexGuard<'_, PlayerContext>) {
        tracing::debug!(command = ?g.command, "command acknowledged");
        g.command = PlayerCommand::None;
        drop(g);
        self.notify();
    }

    pub(crate) fn set_worker_alive(&self, alive: bool) {
        self.lock().worker_alive = alive;
        self.notify();
    }

    /// Post `cmd` and block until the worker acknowledges it.
    fn command_locked<'a>(
        &'a self,
        mut g: MutexGuard<'a, PlayerContext>,
        cmd: PlayerCommand,
    ) -> Result<MutexGuard<'a, PlayerContext>, ControlError> {
        while g.command != PlayerCommand::None && g.worker_alive {
            g = self.wait_cond(g);
        }
        if !g.worker_alive {
            return Err(ControlError::WorkerGone);
        }

        g.command = cmd;
        self.notify();
        while g.command != PlayerCommand::None && g.worker_alive {
            g = self.wait_cond(g);
        }
        if g.command != PlayerCommand::None {
            g.command = PlayerCommand::None;
            return Err(ControlError::WorkerGone);
        }
        Ok(g)
    }

    fn command(&self, cmd: PlayerCommand) -> Result<(), ControlError> {
        self.command_locked(self.lock(), cmd).map(drop)
    }

    /// Start playing `song`, stopping the current song first.
    ///
    /// Returns once the worker has either started the song or recorded why it
    /// could not; check [`PlayerControl::error_kind`] afterwards.
    pub fn play(&self, song: SongRef) -> Result<(), ControlError> {
        let mut g = self.lock();
        if g.state != PlaybackState::Stopped {
            g = self.command_locked(g, PlayerCommand::Stop)?;
        }
        g.queue_state = QueueState::Blank;
        g.next_song = Some(song);
        self.command_locked(g, PlayerCommand::Play).map(drop)
    }

    /// Abort decoding; the output device stays open.
    pub fn stop(&self) -> Result<(), ControlError> {
        self.command(PlayerCommand::Stop)
    }

    /// Release the output device and clear the queued song slot.
    pub fn close_audio(&self) -> Result<(), ControlError> {
        let mut g = self.command_locked(self.lock(), PlayerCommand::CloseAudio)?;
        g.queue_state = QueueState::Blank;
        Ok(())
    }

    /// Same as [`PlayerControl::close_audio`].
    pub fn wait(&self) -> Result<(), ControlError> {
        self.close_audio()
    }

    /// Terminate the decode worker. Not reversible.
    pub fn kill(&self) -> Result<(), ControlError> {
        self.command(PlayerCommand::Exit)
    }

    /// Toggle Playing and Paused; no-op when stopped.
    pub fn pause(&self) -> Result<(), ControlError> {
        let g = self.lock();
        if g.state == PlaybackState::Stopped {
            return Ok(());
        }
        self.command_locked(g, PlayerCommand::Pause).map(drop)
    }

    pub fn set_pause(&self, pause: bool) -> Result<(), ControlError> {
        let paused = self.state() == PlaybackState::Paused;
        if paused != pause {
            self.pause()?;
        }
        Ok(())
    }

    /// Seek to `seconds` in `song`.
    ///
    /// If `song` is not the one playing, the worker switches to it first.
    pub fn seek(&self, song: SongRef, seconds: f64) -> Result<(), ControlError> {
        let mut g = self.lock();
        if g.state == PlaybackState::Stopped {
            return Err(ControlError::NotPlaying);
        }
        if !same_song(g.current_song.as_ref(), Some(&song)) {
            g.next_song = Some(song);
            g.queue_state = QueueState::Blank;
        }
        g.seek_where = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        g.seek_failed = false;

        let g = self.command_locked(g, PlayerCommand::Seek)?;
        if g.seek_failed {
            return Err(ControlError::SeekFailed);
        }
        Ok(())
    }

    pub fn lock_queue(&self) -> Result<(), ControlError> {
        let g = self.lock();
        if g.queue_lock == QueueLockState::Locked {
            return Err(ControlError::QueueAlreadyLocked);
        }
        self.command_locked(g, PlayerCommand::LockQueue).map(drop)
    }

    pub fn unlock_queue(&self) -> Result<(), ControlError> {
        let g = self.lock();
        if g.queue_lock == QueueLockState::Unlocked {
            return Ok(());
        }
        self.command_locked(g, PlayerCommand::UnlockQueue).map(drop)
    }

    /// Queue the song to continue with at end of stream. Does not block.
    pub fn queue_song(&self, song: SongRef) -> Result<(), ControlError> {
        let mut g = self.lock();
        if g.queue_lock == QueueLockState::Locked {
            return Err(ControlError::QueueLocked);
        }
        if g.queue_state != QueueState::Blank {
            return Err(ControlError::QueueFull);
        }
        tracing::debug!(url = %song.url, "song queued");
        g.next_song = Some(song);
        g.queue_state = QueueState::Full;
        drop(g);
        self.notify();
        Ok(())
    }

    pub fn set_cross_fade(&self, seconds: f32) {
        let seconds = if seconds.is_nan() { 0.0 } else { seconds.max(0.0) };
        self.lock().cross_fade = seconds;
    }

    pub fn set_software_volume(&self, volume: i32) {
        self.lock().software_volume = volume.clamp(0, VOLUME_UNITY);
    }

    pub fn clear_error(&self) {
        self.lock().error = None;
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    /// Elapsed seconds, rounded to the nearest second.
    pub fn elapsed_time(&self) -> u64 {
        round_secs(self.lock().elapsed)
    }

    /// Total seconds, rounded; `None` when unknown.
    pub fn total_time(&self) -> Option<u64> {
        self.lock().total_time.map(round_secs)
    }

    pub fn bit_rate(&self) -> u32 {
        self.lock().bit_rate
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.lock().audio_format
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio_format().map(|f| f.sample_rate).unwrap_or(0)
    }

    pub fn bits(&self) -> u8 {
        self.audio_format().map(|f| f.bits).unwrap_or(0)
    }

    pub fn channels(&self) -> u8 {
        self.audio_format().map(|f| f.channels).unwrap_or(0)
    }

    pub fn error_kind(&self) -> Option<PlayerErrorKind> {
        self.lock().error.as_ref().map(|e| e.kind)
    }

    pub fn error_message(&self) -> Option<String> {
        self.lock().error.as_ref().map(PlayerError::message)
    }

    pub fn cross_fade(&self) -> f32 {
        self.lock().cross_fade
    }

    pub fn software_volume(&self) -> i32 {
        self.lock().software_volume
    }

    pub fn queue_state(&self) -> QueueState {
        self.lock().queue_state
    }

    pub fn queue_lock_state(&self) -> QueueLockState {
        self.lock().queue_lock
    }

    pub fn current_song(&self) -> Option<SongRef> {
        self.lock().current_song.clone()
    }

    pub fn is_worker_alive(&self) -> bool {
        self.lock().worker_alive
    }

    /// Consistent snapshot of everything a front-end reports.
    pub fn status(&self) -> PlayerStatus {
        let g = self.lock();
        PlayerStatus {
            state: g.state,
            song: g.current_song.as_ref().map(|s| s.url.clone()),
            elapsed_secs: round_secs(g.elapsed),
            total_secs: g.total_time.map(round_secs),
            bit_rate_kbps: g.bit_rate,
            audio_format: g.audio_format.map(|f| f.info()),
            software_volume: g.software_volume,
            cross_fade_secs: g.cross_fade,
            queue_state: g.queue_state,
            queue_lock: g.queue_lock,
            error: g.error.as_ref().map(|e| PlayerErrorInfo {
                kind: e.kind,
                message: e.message(),
            }),
        }
    }
}

fn round_secs(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs + 0.5) as u64
    } else {
        0
    }
}
