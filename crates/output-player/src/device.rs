//! Output device discovery and selection.
//!
//! - [`AudioDevice`] describes one output endpoint as seen by a single enumeration
//! - [`OutputBackend`] is the platform seam (CPAL in production, fakes in tests)
//! - [`DeviceManager`] resolves user selections by index or by [`DeviceId`]

use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{PlayerError, Result};
use crate::graph::OutputSink;
use crate::output::CpalSink;

/// Opaque, comparable identity of an output device.
///
/// Stable across re-enumerations, unlike [`AudioDevice::index`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One hardware output endpoint from a single enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioDevice {
    /// Identity used to re-find the device after a re-scan.
    pub id: DeviceId,
    /// Human-readable device name.
    pub name: String,
    /// Native sample rate in Hz; `0` when the device is not ready.
    pub sample_rate: u32,
    /// Default channel count (`0` when unknown).
    pub channels: u16,
    /// Position in the enumeration that produced this value.
    pub index: usize,
}

impl AudioDevice {
    /// Whether the device reports a usable sample rate.
    pub fn is_usable(&self) -> bool {
        self.sample_rate != 0
    }
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_usable() {
            write!(f, "{} ({} Hz)", self.name, self.sample_rate)
        } else {
            write!(f, "{} (unavailable)", self.name)
        }
    }
}

/// Reject devices that cannot host a playback graph.
pub fn ensure_usable(device: &AudioDevice) -> Result<()> {
    if device.is_usable() {
        Ok(())
    } else {
        Err(PlayerError::DeviceUnavailable(format!(
            "{} reports sample rate 0",
            device.name
        )))
    }
}

/// Platform audio subsystem as seen by the player.
pub trait OutputBackend {
    /// Query the currently available output endpoints.
    fn output_devices(&self) -> Result<Vec<AudioDevice>>;

    /// The platform's current default sink.
    fn default_output(&self) -> Result<AudioDevice>;

    /// Open a sink bound to `device`. The sink is idle until a chain is attached and started.
    fn open_sink(&self, device: &AudioDevice) -> Result<Box<dyn OutputSink>>;
}

/// Enumerates devices and resolves selections against them.
pub struct DeviceManager<B> {
    backend: B,
    last: Vec<AudioDevice>,
}

impl<B: OutputBackend> DeviceManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            last: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Re-enumerate output devices and remember the result for index-based selection.
    pub fn list_output_devices(&mut self) -> Result<&[AudioDevice]> {
        self.last = self.backend.output_devices()?;
        tracing::debug!(count = self.last.len(), "output devices enumerated");
        Ok(&self.last)
    }

    /// Devices from the most recent [`list_output_devices`](Self::list_output_devices) call.
    pub fn last_enumeration(&self) -> &[AudioDevice] {
        &self.last
    }

    pub fn default_output(&self) -> Result<AudioDevice> {
        self.backend.default_output()
    }

    /// Pick a device by position in the last enumeration.
    pub fn select(&self, index: usize) -> Result<AudioDevice> {
        let device = self.last.get(index).ok_or_else(|| {
            PlayerError::DeviceUnavailable(format!(
                "index {index} out of range ({} devices)",
                self.last.len()
            ))
        })?;
        ensure_usable(device)?;
        Ok(device.clone())
    }

    /// Find a device by identity in a fresh enumeration.
    pub fn resolve(&mut self, id: &DeviceId) -> Result<AudioDevice> {
        let devices = self.list_output_devices()?;
        let device = devices
            .iter()
            .find(|d| &d.id == id)
            .ok_or_else(|| PlayerError::DeviceUnavailable(format!("no output device with id {id}")))?;
        ensure_usable(device)?;
        Ok(device.clone())
    }

    /// First device whose name contains `needle` (case-insensitive) in a fresh enumeration.
    pub fn find_by_name(&mut self, needle: &str) -> Result<AudioDevice> {
        let devices = self.list_output_devices()?;
        let device = devices
            .iter()
            .find(|d| matches_device_name(&d.name, needle))
            .ok_or_else(|| {
                PlayerError::DeviceUnavailable(format!("no output device matched: {needle}"))
            })?;
        ensure_usable(device)?;
        Ok(device.clone())
    }

    pub fn open_sink(&self, device: &AudioDevice) -> Result<Box<dyn OutputSink>> {
        self.backend.open_sink(device)
    }
}

/// CPAL-backed [`OutputBackend`].
pub struct CpalBackend {
    host: cpal::Host,
    buffer_frames: Option<u32>,
}

impl CpalBackend {
    /// Wrap `host`; `buffer_frames` is the preferred fixed callback size for opened sinks.
    pub fn new(host: cpal::Host, buffer_frames: Option<u32>) -> Self {
        Self {
            host,
            buffer_frames,
        }
    }

    pub fn with_default_host(buffer_frames: Option<u32>) -> Self {
        Self::new(cpal::default_host(), buffer_frames)
    }

    fn find_device(&self, id: &DeviceId) -> Result<cpal::Device> {
        let devices = self.host.output_devices().map_err(|e| {
            PlayerError::DeviceUnavailable(format!("enumerate output devices: {e}"))
        })?;
        for (index, device) in devices.enumerate() {
            if &describe_device(&device, index).id == id {
                return Ok(device);
            }
        }
        Err(PlayerError::DeviceUnavailable(format!(
            "output device {id} disappeared"
        )))
    }
}

impl OutputBackend for CpalBackend {
    fn output_devices(&self) -> Result<Vec<AudioDevice>> {
        let devices = self.host.output_devices().map_err(|e| {
            PlayerError::DeviceUnavailable(format!("enumerate output devices: {e}"))
        })?;
        Ok(devices
            .enumerate()
            .map(|(index, device)| describe_device(&device, index))
            .collect())
    }

    fn default_output(&self) -> Result<AudioDevice> {
        let device = self
            .host
            .default_output_device()
            .ok_or_else(|| PlayerError::DeviceUnavailable("no default output device".into()))?;
        let mut info = describe_device(&device, 0);
        if let Ok(all) = self.output_devices() {
            if let Some(listed) = all.iter().find(|d| d.id == info.id) {
                info.index = listed.index;
            }
        }
        Ok(info)
    }

    fn open_sink(&self, device: &AudioDevice) -> Result<Box<dyn OutputSink>> {
        ensure_usable(device)?;
        let cpal_device = self.find_device(&device.id)?;
        let sink = CpalSink::open(device.clone(), cpal_device, self.buffer_frames)?;
        Ok(Box::new(sink))
    }
}

/// Build an [`AudioDevice`] from a CPAL device.
///
/// Devices whose default config cannot be read are kept with rate `0`.
fn describe_device(device: &cpal::Device, index: usize) -> AudioDevice {
    let name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| format!("output #{index}"));
    let (sample_rate, channels) = match device.default_output_config() {
        Ok(cfg) => (cfg.sample_rate(), cfg.channels()),
        Err(e) => {
            tracing::debug!(device = %name, "default output config unavailable: {e}");
            (0, 0)
        }
    };
    AudioDevice {
        id: device_id_for(device, &name),
        name,
        sample_rate,
        channels,
        index,
    }
}

fn device_id_for(device: &cpal::Device, name: &str) -> DeviceId {
    if let Ok(id) = device.id() {
        return DeviceId::new(id.to_string());
    }
    DeviceId::new(hash_device_id(name))
}

/// Pick the best supported output config for the device.
///
/// If `target_rate` is `Some`, prefer the highest supported sample rate that is
/// **<= target_rate**; if none are <=, choose the lowest supported rate above it.
/// If `None`, choose the highest supported rate. Ties prefer `f32`.
pub(crate) fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| PlayerError::Output(format!("query output configs: {e}")))?
        .collect();

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let min = range.min_sample_rate();
        let max = range.max_sample_rate();
        let rate = pick_rate_for_range(min, max, target_rate);
        let below = target_rate.map(|t| rate <= t).unwrap_or(true);
        let format_rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, format_rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, format_rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| PlayerError::Output("no supported output configs".into()))
}

/// Fixed callback size to request, if any.
///
/// With a `preferred` size, clamp it into the device's advertised range. Without one, keep
/// the device default so seeks stay responsive.
pub(crate) fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    preferred: Option<u32>,
) -> Option<cpal::BufferSize> {
    let preferred = preferred?;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(preferred, *min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => Some(cpal::BufferSize::Fixed(preferred.max(1))),
    }
}

fn clamp_buffer_frames(preferred: u32, min: u32, max: u32) -> u32 {
    if max < min {
        return min;
    }
    preferred.clamp(min, max)
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) if target >= min && target <= max => target,
        Some(target) if target < min => min,
        Some(_) => max,
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below && !best_below
    } else if rate != best_rate {
        rate > best_rate
    } else {
        format_rank < best_rank
    }
}

/// FNV-1a over the device name, used when the host has no stable device id.
fn hash_device_id(name: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in name.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
