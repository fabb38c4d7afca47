use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::OutputKind;

#[derive(Parser, Debug)]
#[command(name = "playerd", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file; command-line flags override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Audio output sink
    #[arg(long, global = true, value_enum)]
    pub output: Option<OutputKind>,

    /// Initial software volume, 0..=1000
    #[arg(long, global = true)]
    pub volume: Option<i32>,

    /// Cross-fade length in seconds
    #[arg(long, global = true)]
    pub crossfade: Option<f32>,

    /// Base directory for relative song paths
    #[arg(long, global = true)]
    pub music_dir: Option<PathBuf>,

    /// Output queue buffer target in seconds
    #[arg(long, global = true)]
    pub buffer_seconds: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play one song to completion
    Play {
        /// Path or file:// URL
        song: String,
    },

    /// Drive the player from stdin, one command per line
    Console,

    /// Print a song's tags as JSON
    Tag {
        /// Path or file:// URL
        song: String,
    },

    /// List output devices and exit
    ListDevices,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let args = Args::try_parse_from([
            "playerd",
            "console",
            "--output",
            "null",
            "--volume",
            "500",
        ])
        .unwrap();
        assert!(matches!(args.cmd, Command::Console));
        assert_eq!(args.output, Some(OutputKind::Null));
        assert_eq!(args.volume, Some(500));
    }

    #[test]
    fn play_requires_song() {
        assert!(Args::try_parse_from(["playerd", "play"]).is_err());
        let args = Args::try_parse_from(["playerd", "play", "a.flac"]).unwrap();
        assert!(matches!(args.cmd, Command::Play { song } if song == "a.flac"));
    }
}
