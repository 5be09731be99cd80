use std::path::PathBuf;

use clap::Parser;
use output_player::PlayerConfig;
use output_player::config::DEFAULT_CHUNK_FRAMES;

#[derive(Parser, Debug)]
#[command(name = "output-switch", version)]
pub struct Args {
    /// Audio file to load and play
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Switch to a specific output device by substring match after startup
    #[arg(long)]
    pub device: Option<String>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = DEFAULT_CHUNK_FRAMES)]
    pub chunk_frames: usize,

    /// Preferred output callback size in frames (device default when omitted)
    #[arg(long)]
    pub buffer_frames: Option<u32>,

    /// Initial gain (0.0 - 2.0)
    #[arg(long, default_value_t = 1.0)]
    pub gain: f32,
}

impl Args {
    pub fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            chunk_frames: self.chunk_frames.max(1),
            buffer_frames: self.buffer_frames,
            initial_gain: self.gain,
            ..PlayerConfig::default()
        }
    }
}
