//! playerd: a music player daemon driven from the command line.
//!
//! ## Modes
//! - `play`: play one song and exit when it ends.
//! - `console`: read control commands from stdin.
//! - `tag`: print a song's metadata.
//! - `list-devices`: show output devices.
//!
//! Settings come from an optional TOML file (`--config`), overridden by flags.

mod cli;
mod config;
mod console;
mod runtime;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,playerd=info,player_core=info")
        }))
        .init();

    let file = match &args.config {
        Some(path) => config::FileConfig::load(path)?,
        None => config::FileConfig::default(),
    };
    let config = config::DaemonConfig::resolve(file, &args);

    match &args.cmd {
        cli::Command::Play { song } => runtime::run_play(&config, song, interrupts()?),
        cli::Command::Console => {
            let interrupts = interrupts()?;
            let player = runtime::Player::start(&config)?;
            let lines = console::spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
            let result = console::run_console(&player, lines, interrupts, &mut std::io::stdout());
            player.shutdown()?;
            result
        }
        cli::Command::Tag { song } => runtime::print_tag(&config, song),
        cli::Command::ListDevices => runtime::list_devices(),
    }
}

/// Forward Ctrl-C into a channel so the front-ends can shut down cleanly.
fn interrupts() -> Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("install Ctrl-C handler")?;
    Ok(rx)
}
