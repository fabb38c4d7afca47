//! Decode worker.
//!
//! A single thread that owns the audio output and runs decoder backends. While
//! idle it sleeps on the playback context waiting for a command; while a song
//! plays, the backend's decode loop polls for commands between chunks through
//! [`ActiveDecoder`], which is the only point where Stop, Pause or Seek take
//! effect.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use player_types::{PlaybackState, PlayerErrorKind, QueueLockState, QueueState};

use crate::audio_format::AudioFormat;
use crate::config::PlaybackConfig;
use crate::control::{PlayerCommand, PlayerControl};
use crate::decoder::{Chunk, DecoderCommand, DecoderHandle, DecoderRegistry};
use crate::error::PlayerError;
use crate::input::{InputError, InputOpener, InputStream};
use crate::output::AudioOutput;
use crate::song::{SongRef, same_song};
use crate::volume::{Dither, apply_volume};

/// How long a transport may take to become ready before the song fails.
const INPUT_READY_TIMEOUT: Duration = Duration::from_secs(10);
const INPUT_READY_POLL: Duration = Duration::from_millis(10);

/// Start the decode worker thread.
///
/// `make_output` runs on the worker thread, so the output itself need not be
/// `Send`.
pub fn spawn_worker<F>(
    control: PlayerControl,
    registry: Arc<DecoderRegistry>,
    opener: Arc<dyn InputOpener>,
    config: PlaybackConfig,
    make_output: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() -> Box<dyn AudioOutput> + Send + 'static,
{
    control.set_worker_alive(true);
    let thread_control = control.clone();
    let spawned = thread::Builder::new()
        .name("decoder".into())
        .spawn(move || {
            let _alive = AliveGuard(thread_control.clone());
            let worker = Worker {
                control: thread_control,
                registry,
                opener,
                config,
                output: make_output(),
                dither: Dither::default(),
            };
            worker.run();
        });
    if spawned.is_err() {
        control.set_worker_alive(false);
    }
    spawned
}

/// Marks the worker gone when its thread ends, even by panic, so callers
/// waiting for an ack return instead of hanging.
struct AliveGuard(PlayerControl);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        let mut g = self.0.lock();
        g.worker_alive = false;
        g.state = PlaybackState::Stopped;
        drop(g);
        self.0.notify();
    }
}

/// How a song is being started.
#[derive(Clone, Copy, Debug, PartialEq)]
enum StartMode {
    /// Answering a Play command; ack once the song starts or fails.
    Play,
    /// Answering a Seek into a song other than the current one; seek once
    /// started, then ack.
    Seek(f64),
    /// Gapless continuation from the queue; nothing to ack.
    Continue,
}

/// Why a song stopped playing.
#[derive(Clone, Copy, Debug, PartialEq)]
enum SongEnd {
    EndOfStream,
    /// Stop is pending.
    Stop,
    /// Exit is pending.
    Exit,
    /// Play is pending for a new song.
    Replace,
    /// Seek into a different song is pending.
    Retarget,
    Failed(PlayerErrorKind),
}

struct Worker {
    control: PlayerControl,
    registry: Arc<DecoderRegistry>,
    opener: Arc<dyn InputOpener>,
    config: PlaybackConfig,
    output: Box<dyn AudioOutput>,
    dither: Dither,
}

impl Worker {
    fn run(mut self) {
        tracing::info!(output = self.output.name(), "decoder worker started");
        loop {
            let mut g = self.control.lock();
            while g.command == PlayerCommand::None {
                g = self.control.wait_cond(g);
            }

            match g.command {
                PlayerCommand::Play => {
                    drop(g);
                    self.play_queue();
                }
                PlayerCommand::Seek => {
                    tracing::warn!("seek with no active song");
                    let song = g.next_song.clone().or_else(|| g.current_song.clone());
                    g.seek_failed = true;
                    g.error = Some(PlayerError::new(PlayerErrorKind::SeekFailure, song));
                    self.control.ack(g);
                }
                PlayerCommand::Stop => {
                    drop(g);
                    self.output.cancel();
                    self.control.ack(self.control.lock());
                }
                PlayerCommand::Pause => self.control.ack(g),
                PlayerCommand::CloseAudio => {
                    drop(g);
                    self.output.close();
                    self.control.ack(self.control.lock());
                }
                PlayerCommand::LockQueue => {
                    g.queue_lock = QueueLockState::Locked;
                    self.control.ack(g);
                }
                PlayerCommand::UnlockQueue => {
                    g.queue_lock = QueueLockState::Unlocked;
                    self.control.ack(g);
                }
                PlayerCommand::Exit => {
                    drop(g);
                    self.output.close();
                    self.control.ack(self.control.lock());
                    break;
                }
                PlayerCommand::None => {}
            }
        }
        tracing::info!("decoder worker exited");
    }

    /// Play `next_song` and whatever gets queued after it.
    ///
    /// Returns with state Stopped; a command that interrupted playback is left
    /// pending for the idle loop.
    fn play_queue(&mut self) {
        let mut mode = StartMode::Play;
        loop {
            let song = {
                let mut g = self.control.lock();
                if mode == StartMode::Play {
                    g.error = None;
                }
                g.next_song.clone()
            };
            let Some(song) = song else {
                self.control.ack(self.control.lock());
                return;
            };

            let (end, started) = self.play_song(&song, mode);
            tracing::debug!(url = %song.url, end = ?end, started, "song ended");

            match end {
                SongEnd::Stop | SongEnd::Exit => {
                    self.set_stopped();
                    return;
                }
                SongEnd::Replace => {
                    self.output.cancel();
                    mode = StartMode::Play;
                }
                SongEnd::Retarget => {
                    self.output.cancel();
                    mode = StartMode::Seek(self.control.lock().seek_where);
                }
                SongEnd::Failed(kind) => {
                    let mut g = self.control.lock();
                    tracing::warn!(url = %song.url, kind = ?kind, "playback failed");
                    g.error = Some(PlayerError::new(kind, Some(song.clone())));
                    g.state = PlaybackState::Stopped;
                    g.bit_rate = 0;
                    if !started {
                        match mode {
                            StartMode::Play => self.control.ack(g),
                            StartMode::Seek(_) => {
                                g.seek_failed = true;
                                self.control.ack(g);
                            }
                            StartMode::Continue => self.control.notify(),
                        }
                    }
                    return;
                }
                SongEnd::EndOfStream => match self.after_end_of_stream() {
                    Some(()) => mode = StartMode::Continue,
                    None => return,
                },
            }
        }
    }

    /// Take the queued song if there is one, otherwise let the output drain.
    ///
    /// Pause, queue lock and CloseAudio are served while draining; Stop, Play,
    /// Seek and Exit end the drain and are left pending for the idle loop.
    /// Returns `Some` when playback continues with `next_song`.
    fn after_end_of_stream(&mut self) -> Option<()> {
        let poll = self.config.drain_poll();
        let mut paused = false;
        loop {
            let mut g = self.control.lock();
            if !paused
                && g.queue_state == QueueState::Full
                && g.queue_lock == QueueLockState::Unlocked
                && g.next_song.is_some()
            {
                g.queue_state = QueueState::Blank;
                tracing::info!("continuing with queued song");
                return Some(());
            }

            match g.command {
                PlayerCommand::None if paused => {
                    drop(self.control.wait_cond(g));
                    continue;
                }
                PlayerCommand::None => drop(g),
                PlayerCommand::Pause => {
                    paused = !paused;
                    if paused {
                        g.state = PlaybackState::Paused;
                        self.output.pause();
                    } else {
                        g.state = PlaybackState::Playing;
                        self.output.resume();
                    }
                    tracing::info!(paused, "pause toggled while draining");
                    self.control.ack(g);
                    continue;
                }
                PlayerCommand::LockQueue => {
                    g.queue_lock = QueueLockState::Locked;
                    self.control.ack(g);
                    continue;
                }
                PlayerCommand::UnlockQueue => {
                    g.queue_lock = QueueLockState::Unlocked;
                    self.control.ack(g);
                    continue;
                }
                PlayerCommand::CloseAudio => {
                    drop(g);
                    self.output.close();
                    self.control.ack(self.control.lock());
                    continue;
                }
                PlayerCommand::Play
                | PlayerCommand::Stop
                | PlayerCommand::Seek
                | PlayerCommand::Exit => break,
            }

            if self.output.drain(poll) {
                break;
            }
        }

        if paused {
            self.output.cancel();
            self.output.resume();
        }
        self.set_stopped();
        None
    }

    fn set_stopped(&self) {
        let mut g = self.control.lock();
        g.state = PlaybackState::Stopped;
        g.bit_rate = 0;
        drop(g);
        self.control.notify();
    }

    /// Decode one song; also reports whether it got as far as producing audio.
    fn play_song(&mut self, song: &SongRef, mode: StartMode) -> (SongEnd, bool) {
        tracing::info!(url = %song.url, "opening song");
        let input = match self.open_input(song) {
            Ok(input) => input,
            Err(end) => return (end, false),
        };
        let input = match self.wait_ready(input, mode) {
            Ok(input) => input,
            Err(end) => return (end, false),
        };

        let candidates = self.registry.candidates(input.as_ref());
        if candidates.is_empty() {
            tracing::warn!(url = %song.url, "no decoder backend for stream");
            return (SongEnd::Failed(PlayerErrorKind::UnsupportedType), false);
        }

        let drain_timeout = Duration::from_secs_f32(self.config.buffer_seconds.max(0.0) + 1.0);
        let mut input = Some(input);
        let mut last_kind = PlayerErrorKind::UnsupportedType;
        for plugin in candidates {
            let stream = match input.take() {
                Some(stream) => stream,
                None => match self.open_input(song) {
                    Ok(stream) => stream,
                    Err(end) => return (end, false),
                },
            };

            let mut handle = ActiveDecoder {
                control: &self.control,
                output: self.output.as_mut(),
                dither: &mut self.dither,
                song: song.clone(),
                mode,
                drain_timeout,
                started: false,
                seekable: false,
                paused: false,
                format: None,
                seek_target: 0.0,
                end: None,
                failure: None,
            };
            let result = plugin.decode(&mut handle, stream);
            let ActiveDecoder {
                started,
                paused,
                end,
                failure,
                ..
            } = handle;
            if paused {
                self.output.resume();
            }

            if let Some(kind) = failure {
                return (SongEnd::Failed(kind), started);
            }
            match result {
                Ok(()) if started => return (end.unwrap_or(SongEnd::EndOfStream), true),
                Ok(()) => {
                    tracing::debug!(backend = plugin.name(), "backend did not start");
                    last_kind = PlayerErrorKind::DecodeFailure;
                }
                Err(e) if started => {
                    tracing::warn!(backend = plugin.name(), url = %song.url, "decode aborted: {e}");
                    return (SongEnd::Failed(e.kind()), true);
                }
                Err(e) => {
                    tracing::debug!(backend = plugin.name(), url = %song.url, "backend rejected stream: {e}");
                    last_kind = e.kind();
                }
            }
        }
        (SongEnd::Failed(last_kind), false)
    }

    fn open_input(&self, song: &SongRef) -> Result<Box<dyn InputStream>, SongEnd> {
        self.opener.open(&song.url).map_err(|e| {
            tracing::warn!(url = %song.url, "cannot open input: {e}");
            match e {
                InputError::UnsupportedScheme(_) => SongEnd::Failed(PlayerErrorKind::UnsupportedType),
                InputError::NotFound(_) | InputError::Io(_) => {
                    SongEnd::Failed(PlayerErrorKind::FileNotFound)
                }
            }
        })
    }

    /// Wait for the transport's readiness gate, still honouring Stop and Exit.
    fn wait_ready(
        &self,
        mut input: Box<dyn InputStream>,
        mode: StartMode,
    ) -> Result<Box<dyn InputStream>, SongEnd> {
        let deadline = Instant::now() + INPUT_READY_TIMEOUT;
        loop {
            match input.buffer() {
                Ok(true) => return Ok(input),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(uri = input.uri(), "input failed while buffering: {e}");
                    return Err(SongEnd::Failed(PlayerErrorKind::FileNotFound));
                }
            }
            if Instant::now() >= deadline {
                tracing::warn!(uri = input.uri(), "input not ready in time");
                return Err(SongEnd::Failed(PlayerErrorKind::FileNotFound));
            }
            if mode == StartMode::Continue {
                match self.control.lock().command {
                    PlayerCommand::Stop => return Err(SongEnd::Stop),
                    PlayerCommand::Exit => return Err(SongEnd::Exit),
                    PlayerCommand::Play => return Err(SongEnd::Replace),
                    _ => {}
                }
            }
            thread::sleep(INPUT_READY_POLL);
        }
    }
}

/// Handle given to a backend for one decode attempt.
struct ActiveDecoder<'a> {
    control: &'a PlayerControl,
    output: &'a mut dyn AudioOutput,
    dither: &'a mut Dither,
    song: SongRef,
    mode: StartMode,
    drain_timeout: Duration,
    started: bool,
    seekable: bool,
    paused: bool,
    format: Option<AudioFormat>,
    seek_target: f64,
    end: Option<SongEnd>,
    failure: Option<PlayerErrorKind>,
}

impl ActiveDecoder<'_> {
    fn fail(&mut self, kind: PlayerErrorKind) -> DecoderCommand {
        self.failure = Some(kind);
        DecoderCommand::Stop
    }

    fn ensure_output(&mut self, format: &AudioFormat) -> Result<(), PlayerErrorKind> {
        match self.output.format() {
            Some(open) if open == *format => return Ok(()),
            Some(open) => {
                tracing::debug!(from = %open, to = %*format, "audio format changed; reopening output");
                self.output.drain(self.drain_timeout);
            }
            None => {}
        }
        self.output.open(format).map_err(|e| {
            tracing::error!(output = self.output.name(), format = %*format, "cannot open audio output: {e}");
            PlayerErrorKind::AudioDeviceFailure
        })
    }
}

impl DecoderHandle for ActiveDecoder<'_> {
    fn initialized(
        &mut self,
        format: AudioFormat,
        seekable: bool,
        total_time: Option<f64>,
    ) -> DecoderCommand {
        if !format.is_valid() {
            tracing::warn!(url = %self.song.url, format = %format, "backend reported invalid audio format");
            return DecoderCommand::Stop;
        }
        if let Err(kind) = self.ensure_output(&format) {
            return self.fail(kind);
        }

        self.started = true;
        self.seekable = seekable;
        self.format = Some(format);

        let total_time = total_time.or(self.song.duration);
        let mut g = self.control.lock();
        g.state = PlaybackState::Playing;
        g.current_song = Some(self.song.clone());
        g.elapsed = 0.0;
        g.total_time = total_time;
        g.audio_format = Some(format);
        g.bit_rate = 0;
        tracing::info!(
            url = %self.song.url,
            format = %format,
            total_secs = ?total_time,
            seekable,
            "playing"
        );

        match self.mode {
            StartMode::Play => {
                self.control.ack(g);
                DecoderCommand::None
            }
            StartMode::Seek(target) => {
                self.seek_target = target;
                DecoderCommand::Seek(target)
            }
            StartMode::Continue => DecoderCommand::None,
        }
    }

    fn data(&mut self, mut chunk: Chunk) -> DecoderCommand {
        let Some(format) = self.format else {
            return DecoderCommand::Stop;
        };

        let volume = self.control.lock().software_volume;
        if let Err(e) = apply_volume(&mut chunk.pcm, &format, volume, self.dither) {
            tracing::error!("volume stage failed: {e}");
            return self.fail(PlayerErrorKind::SystemError);
        }

        if !self.output.is_open() {
            if let Err(kind) = self.ensure_output(&format) {
                return self.fail(kind);
            }
        }
        if let Err(e) = self.output.play(&chunk.pcm) {
            tracing::error!(output = self.output.name(), "audio output failed: {e}");
            return self.fail(PlayerErrorKind::AudioDeviceFailure);
        }

        {
            let mut g = self.control.lock();
            g.elapsed = chunk.timestamp.unwrap_or(g.elapsed) + format.duration_of(chunk.pcm.len());
            if let Some(kbps) = chunk.bit_rate_kbps {
                g.bit_rate = kbps;
            }
        }
        self.command()
    }

    fn command(&mut self) -> DecoderCommand {
        let mut g = self.control.lock();
        loop {
            match g.command {
                PlayerCommand::None => {
                    if !self.paused {
                        return DecoderCommand::None;
                    }
                    g = self.control.wait_cond(g);
                }
                PlayerCommand::Pause => {
                    self.paused = !self.paused;
                    if self.paused {
                        g.state = PlaybackState::Paused;
                        self.output.pause();
                    } else {
                        g.state = PlaybackState::Playing;
                        self.output.resume();
                    }
                    tracing::info!(paused = self.paused, "pause toggled");
                    self.control.ack(g);
                    g = self.control.lock();
                }
                PlayerCommand::CloseAudio => {
                    drop(g);
                    self.output.close();
                    self.control.ack(self.control.lock());
                    g = self.control.lock();
                }
                PlayerCommand::LockQueue => {
                    g.queue_lock = QueueLockState::Locked;
                    self.control.ack(g);
                    g = self.control.lock();
                }
                PlayerCommand::UnlockQueue => {
                    g.queue_lock = QueueLockState::Unlocked;
                    self.control.ack(g);
                    g = self.control.lock();
                }
                PlayerCommand::Seek => {
                    let other_song = g.queue_state == QueueState::Blank
                        && !same_song(g.next_song.as_ref(), Some(&self.song));
                    if other_song {
                        self.end = Some(SongEnd::Retarget);
                        return DecoderCommand::Stop;
                    }
                    if !self.seekable {
                        tracing::warn!(url = %self.song.url, "seek on unseekable stream");
                        g.seek_failed = true;
                        g.error = Some(PlayerError::new(
                            PlayerErrorKind::SeekFailure,
                            Some(self.song.clone()),
                        ));
                        self.control.ack(g);
                        g = self.control.lock();
                        continue;
                    }
                    self.seek_target = g.seek_where;
                    return DecoderCommand::Seek(g.seek_where);
                }
                PlayerCommand::Stop => {
                    self.end = Some(SongEnd::Stop);
                    return DecoderCommand::Stop;
                }
                PlayerCommand::Exit => {
                    self.end = Some(SongEnd::Exit);
                    return DecoderCommand::Stop;
                }
                PlayerCommand::Play => {
                    self.end = Some(SongEnd::Replace);
                    return DecoderCommand::Stop;
                }
            }
        }
    }

    fn seek_finished(&mut self, ok: bool) {
        if ok {
            self.output.cancel();
        }
        let mut g = self.control.lock();
        if ok {
            g.elapsed = self.seek_target;
            if g
                .error
                .as_ref()
                .is_some_and(|e| e.kind == PlayerErrorKind::SeekFailure)
            {
                g.error = None;
            }
            tracing::info!(url = %self.song.url, target_secs = self.seek_target, "seek done");
        } else {
            g.seek_failed = true;
            g.error = Some(PlayerError::new(
                PlayerErrorKind::SeekFailure,
                Some(self.song.clone()),
            ));
        }
        self.control.ack(g);
    }
}
