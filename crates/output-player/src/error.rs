//! Error types for the player core.

use thiserror::Error;

/// Errors surfaced by device selection, buffer loading and transport commands.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The requested output cannot be used (bad index, unknown id, zero sample rate).
    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The asset could not be read or decoded to at least one frame.
    #[error("decode error: {0}")]
    Decode(String),

    /// A transport command was issued before any playback graph exists.
    #[error("no buffer loaded")]
    NoBufferLoaded,

    /// A buffer was offered to a sink running at a different rate.
    #[error("buffer rate {buffer} Hz does not match sink rate {sink} Hz")]
    RateMismatch { buffer: u32, sink: u32 },

    /// The platform failed to build, start or pause an output stream.
    #[error("audio output error: {0}")]
    Output(String),
}

/// Result type for player operations.
pub type Result<T> = std::result::Result<T, PlayerError>;
