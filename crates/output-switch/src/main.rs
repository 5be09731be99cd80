//! `output-switch` - play one audio file and move it between output devices while it plays.
//!
//! Features:
//! - decode the file once, play it on the default output
//! - pick another output from the device list; playback continues there, resampled
//!   when the new device runs at a different rate
//! - play/pause/stop, keyboard seek and a mouse scrub bar

mod cli;
mod logging;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use output_player::{
    CpalBackend, DeviceManager, FileLoader, OutputBackend, TransportController,
};

fn main() -> Result<()> {
    let args = cli::Args::parse();

    if args.list_devices {
        logging::init_stderr();
        return list_devices(args.buffer_frames);
    }

    let path = args.path.clone().context("missing <PATH>")?;
    let log_rx = logging::init_channel();

    let backend = CpalBackend::with_default_host(args.buffer_frames);
    let loader = FileLoader::new(&path, args.player_config().chunk_frames);
    let mut controller = TransportController::new(backend, loader, args.player_config());

    let mut status = match controller.setup() {
        Ok(state) => format!("Ready ({})", state.label()),
        Err(e) => {
            tracing::error!("setup failed: {e}");
            format!("Setup failed: {e}")
        }
    };

    if let Some(needle) = args.device.as_deref() {
        match controller.switch_to_name(needle) {
            Ok(_) => status = format!("Switched to output matching {needle:?}"),
            Err(e) => status = format!("Switch to {needle:?} failed: {e}"),
        }
    }

    ui::run_tui(controller, status, log_rx)
}

/// Print available output devices to stdout, marking the default.
fn list_devices(buffer_frames: Option<u32>) -> Result<()> {
    let mut manager = DeviceManager::new(CpalBackend::with_default_host(buffer_frames));
    let default_id = manager.backend().default_output().ok().map(|d| d.id);
    let devices = manager
        .list_output_devices()
        .context("enumerate output devices")?;
    for device in devices {
        let marker = if Some(&device.id) == default_id.as_ref() {
            " (default)"
        } else {
            ""
        };
        println!("#{}: {device}{marker}", device.index);
    }
    Ok(())
}
