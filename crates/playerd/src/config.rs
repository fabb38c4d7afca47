//! Daemon configuration: optional TOML file merged with command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

pub use player_core::config::PlaybackConfig;

use crate::cli::Args;

/// Which sink the worker writes to.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Cpal,
    /// Discard audio in real time.
    Null,
}

/// Contents of the config file. Every field is optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub device: Option<String>,
    pub output: Option<OutputKind>,
    pub software_volume: Option<i32>,
    pub cross_fade: Option<f32>,
    pub music_dir: Option<PathBuf>,
    pub playback: PlaybackSection,
}

/// `[playback]` table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybackSection {
    pub chunk_frames: Option<usize>,
    pub refill_max_frames: Option<usize>,
    pub buffer_seconds: Option<f32>,
    pub drain_poll_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<FileConfig>(raw)?)
    }
}

/// Effective settings after merging file and flags.
#[derive(Clone, Debug, PartialEq)]
pub struct DaemonConfig {
    pub device: Option<String>,
    pub output: OutputKind,
    pub software_volume: i32,
    pub cross_fade: f32,
    pub music_dir: Option<PathBuf>,
    pub playback: PlaybackConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device: None,
            output: OutputKind::default(),
            software_volume: 1000,
            cross_fade: 0.0,
            music_dir: None,
            playback: PlaybackConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Flags win over file values; anything unset keeps its default.
    pub fn resolve(file: FileConfig, args: &Args) -> Self {
        let defaults = Self::default();
        let section = file.playback;
        let playback = PlaybackConfig {
            chunk_frames: section
                .chunk_frames
                .unwrap_or(defaults.playback.chunk_frames),
            refill_max_frames: section
                .refill_max_frames
                .unwrap_or(defaults.playback.refill_max_frames),
            buffer_seconds: args
                .buffer_seconds
                .or(section.buffer_seconds)
                .unwrap_or(defaults.playback.buffer_seconds),
            drain_poll_ms: section
                .drain_poll_ms
                .unwrap_or(defaults.playback.drain_poll_ms),
        };

        Self {
            device: normalize_device_name(args.device.clone().or(file.device)),
            output: args.output.or(file.output).unwrap_or(defaults.output),
            software_volume: args
                .volume
                .or(file.software_volume)
                .unwrap_or(defaults.software_volume),
            cross_fade: args
                .crossfade
                .or(file.cross_fade)
                .unwrap_or(defaults.cross_fade),
            music_dir: args.music_dir.clone().or(file.music_dir),
            playback,
        }
    }
}

fn normalize_device_name(name: Option<String>) -> Option<String> {
    name.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["playerd", "console"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn parses_full_file() {
        let file = FileConfig::parse(
            r#"
            device = "USB DAC"
            output = "null"
            software_volume = 700
            cross_fade = 2.5
            music_dir = "/srv/music"

            [playback]
            chunk_frames = 512
            buffer_seconds = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(file.device.as_deref(), Some("USB DAC"));
        assert_eq!(file.output, Some(OutputKind::Null));
        assert_eq!(file.software_volume, Some(700));
        assert_eq!(file.playback.chunk_frames, Some(512));
        assert_eq!(file.playback.refill_max_frames, None);
    }

    #[test]
    fn empty_file_is_valid() {
        assert_eq!(FileConfig::parse("").unwrap(), FileConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::parse("volume = 3").is_err());
        assert!(FileConfig::parse("output = \"alsa\"").is_err());
    }

    #[test]
    fn flags_override_file() {
        let file = FileConfig {
            device: Some("speakers".into()),
            software_volume: Some(200),
            playback: PlaybackSection {
                buffer_seconds: Some(4.0),
                drain_poll_ms: Some(10),
                ..PlaybackSection::default()
            },
            ..FileConfig::default()
        };
        let config = DaemonConfig::resolve(
            file,
            &args(&["--volume", "900", "--buffer-seconds", "1.5", "--output", "null"]),
        );

        assert_eq!(config.device.as_deref(), Some("speakers"));
        assert_eq!(config.software_volume, 900);
        assert_eq!(config.output, OutputKind::Null);
        assert_eq!(config.playback.buffer_seconds, 1.5);
        assert_eq!(config.playback.drain_poll_ms, 10);
        assert_eq!(config.playback.chunk_frames, 1024);
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = DaemonConfig::resolve(FileConfig::default(), &args(&[]));
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn blank_device_name_means_default_device() {
        let config = DaemonConfig::resolve(FileConfig::default(), &args(&["--device", "  "]));
        assert_eq!(config.device, None);
    }
}
