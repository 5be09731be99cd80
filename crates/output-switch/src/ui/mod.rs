//! Ratatui UI loop.
//!
//! Keys:
//! - Space: play/pause
//! - p / x: play / pause
//! - s: stop (rewind to start)
//! - Left/Right: seek -1s / +1s
//! - Up/Down: move device selection
//! - Enter: switch output to the selected device
//! - r: rescan devices
//! - + / -: gain up / down
//! - l: toggle logs
//! - q / Esc: quit
//!
//! Mouse: click or drag on the position bar to seek.

mod app;
mod render;
mod widgets;

pub(crate) use app::run_tui;
