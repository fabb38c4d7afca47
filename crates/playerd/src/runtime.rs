//! Daemon runtime helpers.
//!
//! Wires the decode worker to the configured output and provides the one-shot
//! `play`, `tag` and `list-devices` modes.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::Receiver;
use player_core::decoder::{DecodeError, DecoderRegistry, Tag};
use player_core::input::{InputOpener, LocalInputOpener};
use player_core::output::{AudioOutput, CpalOutput, NullOutput, device};
use player_core::{PlayerControl, Song, SongRef, spawn_worker};
use player_types::PlaybackState;

use crate::config::{DaemonConfig, OutputKind};

const PLAY_POLL: Duration = Duration::from_millis(200);

/// A running controller plus its decode worker.
pub struct Player {
    control: PlayerControl,
    registry: Arc<DecoderRegistry>,
    opener: Arc<LocalInputOpener>,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    pub fn start(config: &DaemonConfig) -> Result<Self> {
        let control = PlayerControl::new();
        control.set_software_volume(config.software_volume);
        control.set_cross_fade(config.cross_fade);

        let registry = Arc::new(DecoderRegistry::builtin());
        let opener = Arc::new(LocalInputOpener::new(config.music_dir.clone()));

        let make_output: Box<dyn FnOnce() -> Box<dyn AudioOutput> + Send> = match config.output {
            OutputKind::Cpal => {
                let device = config.device.clone();
                let playback = config.playback.clone();
                Box::new(move || -> Box<dyn AudioOutput> {
                    Box::new(CpalOutput::new(device, playback))
                })
            }
            OutputKind::Null => Box::new(|| -> Box<dyn AudioOutput> { Box::new(NullOutput::new(true)) }),
        };

        let worker = spawn_worker(
            control.clone(),
            registry.clone(),
            opener.clone(),
            config.playback.clone(),
            make_output,
        )
        .context("spawn decoder worker")?;
        tracing::info!(output = ?config.output, device = ?config.device, "player started");

        Ok(Self {
            control,
            registry,
            opener,
            worker: Some(worker),
        })
    }

    pub fn control(&self) -> &PlayerControl {
        &self.control
    }

    /// Build a song handle, carrying the tag duration when one can be read.
    pub fn song(&self, url: &str) -> SongRef {
        let song = Song::new(url);
        let song = match read_tag(&self.registry, self.opener.as_ref(), url) {
            Ok(Some(Tag {
                duration: Some(secs),
                ..
            })) => song.with_duration(secs),
            Ok(_) => song,
            Err(e) => {
                tracing::debug!(url, "no tag: {e:#}");
                song
            }
        };
        song.shared()
    }

    /// Stop the worker and wait for its thread.
    pub fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.control.kill() {
            tracing::debug!("kill: {e}");
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("decoder worker panicked"))?;
        }
        tracing::info!("player stopped");
        Ok(())
    }
}

/// Print output device names to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for name in device::list_devices(&host)? {
        println!("{name}");
    }
    Ok(())
}

/// Play one song until it ends or an interrupt arrives.
pub fn run_play(config: &DaemonConfig, url: &str, interrupts: Receiver<()>) -> Result<()> {
    let player = Player::start(config)?;
    let result = play_to_end(&player, url, &interrupts);
    player.shutdown()?;
    result
}

fn play_to_end(player: &Player, url: &str, interrupts: &Receiver<()>) -> Result<()> {
    let control = player.control();
    control.play(player.song(url))?;

    loop {
        if let Some(message) = control.error_message() {
            return Err(anyhow!(message));
        }
        if control.state() == PlaybackState::Stopped {
            return Ok(());
        }
        if interrupts.recv_timeout(PLAY_POLL).is_ok() {
            tracing::info!("interrupted");
            control.stop()?;
            return Ok(());
        }
    }
}

/// Print a song's tags as JSON.
pub fn print_tag(config: &DaemonConfig, url: &str) -> Result<()> {
    let registry = DecoderRegistry::builtin();
    let opener = LocalInputOpener::new(config.music_dir.clone());
    let tag = read_tag(&registry, &opener, url)?
        .ok_or_else(|| anyhow!("no tags found in {url}"))?;
    let json = serde_json::json!({
        "url": url,
        "duration_secs": tag.duration,
        "title": tag.title,
        "artist": tag.artist,
        "album": tag.album,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn read_tag(registry: &DecoderRegistry, opener: &dyn InputOpener, url: &str) -> Result<Option<Tag>> {
    let input = opener.open(url).with_context(|| format!("open {url}"))?;
    let tag = registry
        .tag(input, || {
            opener
                .open(url)
                .map_err(|e| DecodeError::Open(e.to_string()))
        })
        .with_context(|| format!("read tags of {url}"))?;
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_config() -> DaemonConfig {
        DaemonConfig {
            output: OutputKind::Null,
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn start_applies_initial_settings_through_setters() {
        let player = Player::start(&DaemonConfig {
            software_volume: 4_000,
            cross_fade: -1.0,
            ..null_config()
        })
        .unwrap();
        assert_eq!(player.control().software_volume(), 1000);
        assert_eq!(player.control().cross_fade(), 0.0);
        assert!(player.control().is_worker_alive());
        player.shutdown().unwrap();
    }

    #[test]
    fn play_reports_missing_file() {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let err = run_play(&null_config(), "/definitely/not/here.flac", rx).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
    }

    #[test]
    fn song_without_tags_has_no_duration() {
        let player = Player::start(&null_config()).unwrap();
        let song = player.song("/definitely/not/here.flac");
        assert_eq!(song.duration, None);
        player.shutdown().unwrap();
    }
}
