//! Single-buffer player core with runtime output-device hot-swap.
//!
//! The crate decodes one asset into memory, plays it through a
//! source -> gain -> sink graph on one output device, and can move that graph to
//! another device while playing, reloading the buffer when the new device runs at
//! a different sample rate.

pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod graph;
pub mod output;
pub mod resample;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::PlayerConfig;
pub use decode::{BufferLoader, DecodedBuffer, FileLoader};
pub use device::{AudioDevice, CpalBackend, DeviceId, DeviceManager, OutputBackend};
pub use error::{PlayerError, Result};
pub use graph::{GainStage, OutputSink, PlaybackGraph};
pub use status::TransportSnapshot;
pub use transport::{TransportController, TransportState};
