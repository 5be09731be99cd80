/// Default resampler chunk size in frames.
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

/// Devices reporting a native rate at or below this are not auto-played on setup.
pub const AUTOPLAY_MIN_RATE_HZ: u32 = 10_000;

/// Upper bound for the gain stage level.
pub const MAX_GAIN: f32 = 2.0;

/// Tuning parameters shared by the loader, the output sink and the transport.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Preferred fixed output callback size in frames; `None` keeps the device default.
    pub buffer_frames: Option<u32>,
    /// Gain stage level applied when the controller is created.
    pub initial_gain: f32,
    /// Setup only starts playback when the default output runs above this rate.
    pub autoplay_min_rate: u32,
    /// Step used by keyboard seeks, in seconds.
    pub seek_step_secs: f64,
}

impl Default for PlayerConfig {
    /// Defaults tuned for interactive scrubbing on common devices.
    fn default() -> Self {
        Self {
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            buffer_frames: None,
            initial_gain: 1.0,
            autoplay_min_rate: AUTOPLAY_MIN_RATE_HZ,
            seek_step_secs: 1.0,
        }
    }
}
