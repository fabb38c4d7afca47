pub mod audio_format;
pub mod config;
pub mod control;
pub mod decoder;
pub mod error;
pub mod input;
pub mod output;
pub mod song;
pub mod volume;
pub mod worker;

pub use control::PlayerControl;
pub use song::{Song, SongRef};
pub use worker::spawn_worker;
