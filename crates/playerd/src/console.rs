//! Line-oriented stdin front-end.
//!
//! Each line is one command; the reply is `ok`, `error: <reason>` or, for
//! `status`, a JSON snapshot.

use std::io::{BufRead, Write};
use std::thread;

use anyhow::Result;
use crossbeam_channel::{Receiver, select};
use player_core::error::ControlError;

use crate::runtime::Player;

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleCommand {
    Play(String),
    Queue(String),
    Stop,
    Close,
    /// `None` toggles.
    Pause(Option<bool>),
    Seek(f64),
    Volume(i32),
    CrossFade(f32),
    Lock,
    Unlock,
    Status,
    ClearError,
    Quit,
}

/// Parse one console line; blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "play" => ConsoleCommand::Play(required(rest, "play")?),
        "queue" => ConsoleCommand::Queue(required(rest, "queue")?),
        "stop" => ConsoleCommand::Stop,
        "close" => ConsoleCommand::Close,
        "pause" => ConsoleCommand::Pause(match rest {
            "" => None,
            "on" | "1" => Some(true),
            "off" | "0" => Some(false),
            other => return Err(format!("pause expects on|off, got {other:?}")),
        }),
        "seek" => ConsoleCommand::Seek(number(rest, "seek")?),
        "volume" => ConsoleCommand::Volume(number(rest, "volume")?),
        "crossfade" => ConsoleCommand::CrossFade(number(rest, "crossfade")?),
        "lock" => ConsoleCommand::Lock,
        "unlock" => ConsoleCommand::Unlock,
        "status" => ConsoleCommand::Status,
        "clearerror" => ConsoleCommand::ClearError,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command {other:?}")),
    };
    Ok(Some(cmd))
}

fn required(rest: &str, cmd: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("{cmd} needs an argument"))
    } else {
        Ok(rest.to_string())
    }
}

fn number<T: std::str::FromStr>(rest: &str, cmd: &str) -> Result<T, String> {
    rest.parse()
        .map_err(|_| format!("{cmd} expects a number, got {rest:?}"))
}

/// Read lines on a helper thread so the console loop can also watch for
/// interrupts.
pub fn spawn_line_reader<R>(reader: R) -> Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(16);
    thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("stdin read error: {e}");
                    break;
                }
            }
        }
    });
    rx
}

/// Run until `quit`, end of input or an interrupt.
pub fn run_console<W: Write>(
    player: &Player,
    lines: Receiver<String>,
    interrupts: Receiver<()>,
    out: &mut W,
) -> Result<()> {
    loop {
        select! {
            recv(lines) -> line => {
                let Ok(line) = line else {
                    tracing::info!("console input closed");
                    return Ok(());
                };
                match parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
                    Ok(Some(cmd)) => match execute(player, cmd) {
                        Ok(Some(reply)) => writeln!(out, "{reply}")?,
                        Ok(None) => writeln!(out, "ok")?,
                        Err(e) => writeln!(out, "error: {e}")?,
                    },
                    Err(e) => writeln!(out, "error: {e}")?,
                }
                out.flush()?;
            }
            recv(interrupts) -> _ => {
                tracing::info!("interrupted");
                return Ok(());
            }
        }
    }
}

fn execute(player: &Player, cmd: ConsoleCommand) -> Result<Option<String>> {
    let control = player.control();
    match cmd {
        ConsoleCommand::Play(url) => {
            control.play(player.song(&url))?;
            if let Some(message) = control.error_message() {
                anyhow::bail!(message);
            }
        }
        ConsoleCommand::Queue(url) => control.queue_song(player.song(&url))?,
        ConsoleCommand::Stop => control.stop()?,
        ConsoleCommand::Close => control.close_audio()?,
        ConsoleCommand::Pause(None) => control.pause()?,
        ConsoleCommand::Pause(Some(on)) => control.set_pause(on)?,
        ConsoleCommand::Seek(secs) => {
            let song = control.current_song().ok_or(ControlError::NotPlaying)?;
            control.seek(song, secs)?;
        }
        ConsoleCommand::Volume(v) => control.set_software_volume(v),
        ConsoleCommand::CrossFade(secs) => control.set_cross_fade(secs),
        ConsoleCommand::Lock => control.lock_queue()?,
        ConsoleCommand::Unlock => control.unlock_queue()?,
        ConsoleCommand::Status => return Ok(Some(serde_json::to_string(&control.status())?)),
        ConsoleCommand::ClearError => control.clear_error(),
        ConsoleCommand::Quit => {}
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DaemonConfig, OutputKind};

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            parse_command("play /music/a b.flac").unwrap(),
            Some(ConsoleCommand::Play("/music/a b.flac".into()))
        );
        assert_eq!(parse_command("  SEEK 12.5 ").unwrap(), Some(ConsoleCommand::Seek(12.5)));
        assert_eq!(parse_command("volume 300").unwrap(), Some(ConsoleCommand::Volume(300)));
        assert_eq!(parse_command("pause").unwrap(), Some(ConsoleCommand::Pause(None)));
        assert_eq!(parse_command("pause off").unwrap(), Some(ConsoleCommand::Pause(Some(false))));
        assert_eq!(parse_command("clearerror").unwrap(), Some(ConsoleCommand::ClearError));
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("play").is_err());
        assert!(parse_command("seek soon").is_err());
        assert!(parse_command("pause maybe").is_err());
        assert!(parse_command("shuffle").is_err());
    }

    #[test]
    fn console_session_reports_status_and_errors() {
        let player = Player::start(&DaemonConfig {
            output: OutputKind::Null,
            ..DaemonConfig::default()
        })
        .unwrap();
        let input = "volume 250\nseek 3\nlock\nlock\nstatus\nquit\nstop\n";
        let lines = spawn_line_reader(std::io::Cursor::new(input.as_bytes().to_vec()));
        let (_tx, interrupts) = crossbeam_channel::bounded(1);
        let mut out = Vec::new();

        run_console(&player, lines, interrupts, &mut out).unwrap();
        player.shutdown().unwrap();

        let out = String::from_utf8(out).unwrap();
        let replies: Vec<&str> = out.lines().collect();
        assert_eq!(replies[0], "ok");
        assert_eq!(replies[1], "error: not playing");
        assert_eq!(replies[2], "ok");
        assert_eq!(replies[3], "error: queue is already locked");
        let status: serde_json::Value = serde_json::from_str(replies[4]).unwrap();
        assert_eq!(status["software_volume"], 250);
        assert_eq!(status["state"], "stopped");
        assert_eq!(status["queue_lock"], "locked");
        assert_eq!(replies.len(), 5);
    }

    #[test]
    fn interrupt_ends_console() {
        let player = Player::start(&DaemonConfig {
            output: OutputKind::Null,
            ..DaemonConfig::default()
        })
        .unwrap();
        let (_line_tx, lines) = crossbeam_channel::bounded::<String>(1);
        let (tx, interrupts) = crossbeam_channel::bounded(1);
        tx.send(()).unwrap();
        let mut out = Vec::new();

        run_console(&player, lines, interrupts, &mut out).unwrap();
        player.shutdown().unwrap();
        assert!(out.is_empty());
    }
}
