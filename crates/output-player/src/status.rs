use crate::device::DeviceId;
use crate::transport::TransportState;

/// Point-in-time view of the transport, rendered by the UI.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransportSnapshot {
    /// Derived transport state.
    pub state: TransportState,
    /// Read cursor in frames of the connected buffer.
    pub position_frames: u64,
    /// Length of the connected buffer in frames.
    pub total_frames: u64,
    pub position_secs: f64,
    pub duration_secs: f64,
    /// Output device the graph is bound to.
    pub device_name: Option<String>,
    /// Identity of that device.
    pub device_id: Option<DeviceId>,
    /// Rate the output sink runs at.
    pub output_rate: Option<u32>,
    /// Rate of the buffer held by the controller (kept across failed switches).
    pub buffer_rate: Option<u32>,
    /// Output channel count.
    pub channels: Option<usize>,
    /// Gain stage level.
    pub gain: f32,
}

impl TransportSnapshot {
    /// Position as a fraction of the duration, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.position_frames as f64 / self.total_frames as f64).clamp(0.0, 1.0)
    }

    /// Whether a graph is connected.
    pub fn has_graph(&self) -> bool {
        self.output_rate.is_some()
    }
}
