//! Transport controller: the state machine that owns the graph and performs device hot-swaps.
//!
//! A switch always runs in this order:
//! 1. validate the target device (nothing is touched on failure)
//! 2. disable and tear down the current graph, releasing its sink
//! 3. open a sink on the target device
//! 4. reuse the buffer when its rate matches the sink, otherwise reload it
//! 5. connect source -> gain -> sink and resume playback at the carried position

use std::sync::Arc;

use crate::config::PlayerConfig;
use crate::decode::{BufferLoader, DecodedBuffer};
use crate::device::{AudioDevice, DeviceId, DeviceManager, OutputBackend, ensure_usable};
use crate::error::{PlayerError, Result};
use crate::graph::{GainStage, PlaybackGraph};
use crate::status::TransportSnapshot;

/// Transport state derived from the graph's enabled flag and read position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl TransportState {
    pub fn derive(enabled: bool, position_frames: u64) -> Self {
        if enabled {
            Self::Playing
        } else if position_frames > 0 {
            Self::Paused
        } else {
            Self::Stopped
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

/// Owns the device manager, the loader, the current buffer and the single playback graph.
pub struct TransportController<B, L> {
    devices: DeviceManager<B>,
    loader: L,
    config: PlayerConfig,
    gain: GainStage,
    buffer: Option<Arc<DecodedBuffer>>,
    graph: Option<PlaybackGraph>,
    selected: Option<AudioDevice>,
}

impl<B: OutputBackend, L: BufferLoader> TransportController<B, L> {
    pub fn new(backend: B, loader: L, config: PlayerConfig) -> Self {
        let gain = GainStage::new(config.initial_gain);
        Self {
            devices: DeviceManager::new(backend),
            loader,
            config,
            gain,
            buffer: None,
            graph: None,
            selected: None,
        }
    }

    /// Bind to the default output and start playing when its rate is plausible.
    pub fn setup(&mut self) -> Result<TransportState> {
        if let Err(e) = self.devices.list_output_devices() {
            tracing::warn!("initial device scan failed: {e}");
        }
        let device = self.devices.default_output()?;
        tracing::info!(
            device = %device.name,
            rate_hz = device.sample_rate,
            "default output"
        );
        if device.sample_rate <= self.config.autoplay_min_rate {
            tracing::warn!(
                device = %device.name,
                rate_hz = device.sample_rate,
                min_rate_hz = self.config.autoplay_min_rate,
                "default output rate too low; not starting playback"
            );
            return Ok(TransportState::Stopped);
        }

        let buffer = self
            .load_buffer_for(&device)
            .inspect_err(|e| tracing::error!("initial load failed: {e}"))?;
        self.rebuild_graph(buffer, &device)?;
        self.play()?;
        Ok(self.state())
    }

    /// Decode the asset at the device's native rate and make it the current buffer.
    pub fn load_buffer_for(&mut self, device: &AudioDevice) -> Result<Arc<DecodedBuffer>> {
        ensure_usable(device)?;
        self.load_buffer_at(device.sample_rate)
    }

    fn load_buffer_at(&mut self, sample_rate: u32) -> Result<Arc<DecodedBuffer>> {
        let buffer = self.loader.load(sample_rate)?;
        if buffer.is_empty() {
            return Err(PlayerError::Decode(format!(
                "{} produced zero frames",
                self.loader.describe()
            )));
        }
        if buffer.sample_rate() != sample_rate {
            return Err(PlayerError::RateMismatch {
                buffer: buffer.sample_rate(),
                sink: sample_rate,
            });
        }
        tracing::info!(
            asset = %self.loader.describe(),
            rate_hz = sample_rate,
            frames = buffer.frames(),
            "buffer loaded"
        );
        let buffer = Arc::new(buffer);
        self.buffer = Some(buffer.clone());
        Ok(buffer)
    }

    /// Tear down the current graph, then connect `buffer` to a fresh sink on `device`.
    ///
    /// The new graph starts disabled at frame 0. A `buffer` at a rate the sink does not
    /// run at is replaced by a reload.
    pub fn rebuild_graph(&mut self, buffer: Arc<DecodedBuffer>, device: &AudioDevice) -> Result<()> {
        self.wire(device, Some(buffer))
    }

    fn wire(&mut self, device: &AudioDevice, buffer: Option<Arc<DecodedBuffer>>) -> Result<()> {
        self.teardown_graph();

        let sink = self.devices.open_sink(device)?;
        let rate = sink.sample_rate();
        let buffer = match buffer.filter(|b| b.sample_rate() == rate) {
            Some(buffer) => {
                tracing::debug!(rate_hz = rate, "reusing buffer");
                buffer
            }
            None => self.load_buffer_at(rate)?,
        };

        let graph = PlaybackGraph::connect(buffer, &self.gain, sink)?;
        tracing::info!(
            device = %device.name,
            rate_hz = graph.sample_rate(),
            channels = graph.output_channels(),
            "graph attached"
        );
        self.graph = Some(graph);
        self.selected = Some(device.clone());
        Ok(())
    }

    /// Disable the graph and release its sink. Safe to call without a graph.
    fn teardown_graph(&mut self) {
        if let Some(graph) = self.graph.take() {
            graph.teardown();
        }
        self.selected = None;
    }

    /// Move playback to `device`, resuming at the current position.
    ///
    /// A device reporting rate 0 is rejected before the current graph is touched.
    pub fn switch_output_device(&mut self, device: &AudioDevice) -> Result<TransportState> {
        ensure_usable(device)
            .inspect_err(|e| tracing::warn!("switch rejected: {e}"))?;

        let resume_at = self.graph.as_ref().map(|g| g.position_secs()).unwrap_or(0.0);
        tracing::info!(
            from = self.selected.as_ref().map(|d| d.name.as_str()).unwrap_or("-"),
            to = %device.name,
            rate_hz = device.sample_rate,
            resume_at_secs = resume_at,
            "switching output device"
        );

        let buffer = self.buffer.clone();
        self.wire(device, buffer)
            .inspect_err(|e| tracing::error!(device = %device.name, "switch failed: {e}"))?;

        let graph = self.graph.as_mut().ok_or(PlayerError::NoBufferLoaded)?;
        graph.seek_to_secs(resume_at);
        graph.play()?;
        Ok(self.state())
    }

    /// Switch to the device with identity `id` in a fresh enumeration.
    pub fn switch_to(&mut self, id: &DeviceId) -> Result<TransportState> {
        let device = self
            .devices
            .resolve(id)
            .inspect_err(|e| tracing::warn!("switch rejected: {e}"))?;
        self.switch_output_device(&device)
    }

    /// Switch to the device at `index` of the last enumeration.
    pub fn switch_to_index(&mut self, index: usize) -> Result<TransportState> {
        let device = self
            .devices
            .select(index)
            .inspect_err(|e| tracing::warn!("switch rejected: {e}"))?;
        self.switch_output_device(&device)
    }

    /// Switch to the first device whose name contains `needle`.
    pub fn switch_to_name(&mut self, needle: &str) -> Result<TransportState> {
        let device = self
            .devices
            .find_by_name(needle)
            .inspect_err(|e| tracing::warn!("switch rejected: {e}"))?;
        self.switch_output_device(&device)
    }

    fn graph(&self) -> Result<&PlaybackGraph> {
        self.graph.as_ref().ok_or(PlayerError::NoBufferLoaded)
    }

    /// Start the output and enable the source. No-op while already playing.
    pub fn play(&mut self) -> Result<()> {
        let graph = self.graph.as_mut().ok_or(PlayerError::NoBufferLoaded)?;
        if graph.is_enabled() {
            tracing::debug!("play ignored: already playing");
            return Ok(());
        }
        graph.play()?;
        tracing::debug!(position_frames = graph.position_frames(), "play");
        Ok(())
    }

    /// Disable the source, keeping the read position.
    pub fn pause(&mut self) -> Result<()> {
        let graph = self.graph()?;
        graph.pause();
        tracing::debug!(position_frames = graph.position_frames(), "pause");
        Ok(())
    }

    /// Disable the source and rewind to 0.
    pub fn stop(&mut self) -> Result<()> {
        self.graph()?.stop();
        tracing::debug!("stop");
        Ok(())
    }

    pub fn toggle_play_pause(&mut self) -> Result<TransportState> {
        if self.graph()?.is_enabled() {
            self.pause()?;
        } else {
            self.play()?;
        }
        Ok(self.state())
    }

    /// Move to `secs`, clamped to `[0, duration]`. Returns the new position in seconds.
    pub fn seek(&mut self, secs: f64) -> Result<f64> {
        let graph = self.graph()?;
        graph.seek_to_secs(secs);
        let position = graph.position_secs();
        tracing::debug!(requested_secs = secs, position_secs = position, "seek");
        Ok(position)
    }

    /// Seek by `delta_secs` from the current position, with the same clamp as [`seek`](Self::seek).
    pub fn seek_relative(&mut self, delta_secs: f64) -> Result<f64> {
        let current = self.graph()?.position_secs();
        self.seek(current + delta_secs)
    }

    /// Move to `frame`, clamped to `[0, total_frames]`. Returns the stored frame.
    pub fn seek_to_frame(&mut self, frame: u64) -> Result<u64> {
        let stored = self.graph()?.seek_to_frame(frame);
        tracing::debug!(requested = frame, position_frames = stored, "seek to frame");
        Ok(stored)
    }

    pub fn state(&self) -> TransportState {
        match &self.graph {
            Some(graph) => TransportState::derive(graph.is_enabled(), graph.position_frames()),
            None => TransportState::Stopped,
        }
    }

    pub fn position_secs(&self) -> f64 {
        self.graph.as_ref().map(|g| g.position_secs()).unwrap_or(0.0)
    }

    pub fn position_frames(&self) -> u64 {
        self.graph.as_ref().map(|g| g.position_frames()).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        self.graph.as_ref().map(|g| g.duration_secs()).unwrap_or(0.0)
    }

    pub fn total_frames(&self) -> u64 {
        self.graph.as_ref().map(|g| g.total_frames()).unwrap_or(0)
    }

    /// Set the gain level, clamped to `[0, MAX_GAIN]`. Survives graph rebuilds.
    pub fn set_gain(&mut self, level: f32) -> f32 {
        let level = self.gain.set_level(level);
        tracing::debug!(gain = level, "gain");
        level
    }

    pub fn gain(&self) -> f32 {
        self.gain.level()
    }

    /// Device the current graph is bound to.
    pub fn selected_device(&self) -> Option<&AudioDevice> {
        self.selected.as_ref()
    }

    /// Last successfully loaded buffer, kept across failed switches.
    pub fn buffer(&self) -> Option<&Arc<DecodedBuffer>> {
        self.buffer.as_ref()
    }

    /// Re-enumerate output devices.
    pub fn output_devices(&mut self) -> Result<Vec<AudioDevice>> {
        Ok(self.devices.list_output_devices()?.to_vec())
    }

    pub fn last_enumeration(&self) -> &[AudioDevice] {
        self.devices.last_enumeration()
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            state: self.state(),
            position_frames: self.position_frames(),
            total_frames: self.total_frames(),
            position_secs: self.position_secs(),
            duration_secs: self.duration_secs(),
            device_name: self.selected.as_ref().map(|d| d.name.clone()),
            device_id: self.selected.as_ref().map(|d| d.id.clone()),
            output_rate: self.graph.as_ref().map(|g| g.sample_rate()),
            buffer_rate: self.buffer.as_ref().map(|b| b.sample_rate()),
            channels: self.graph.as_ref().map(|g| g.output_channels()),
            gain: self.gain.level(),
        }
    }

    /// Release the output. The buffer is kept.
    pub fn shutdown(&mut self) {
        self.teardown_graph();
        tracing::info!("output released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeLoader, SinkEvent};

    type Controller = TransportController<FakeBackend, FakeLoader>;

    fn controller(specs: &[(&str, u32)], seconds: f64) -> (Controller, FakeBackend, FakeLoader) {
        let backend = FakeBackend::new(specs, 0);
        let loader = FakeLoader::new(seconds, 2);
        let controller =
            TransportController::new(backend.clone(), loader.clone(), PlayerConfig::default());
        (controller, backend, loader)
    }

    fn scenario() -> (Controller, FakeBackend, FakeLoader) {
        controller(&[("A", 44_100), ("B", 0), ("C", 48_000)], 30.0)
    }

    #[test]
    fn derive_state_from_flag_and_position() {
        assert_eq!(TransportState::derive(true, 0), TransportState::Playing);
        assert_eq!(TransportState::derive(false, 10), TransportState::Paused);
        assert_eq!(TransportState::derive(false, 0), TransportState::Stopped);
    }

    #[test]
    fn setup_autoplays_on_default_output() {
        let (mut c, backend, loader) = scenario();
        assert_eq!(c.state(), TransportState::Stopped);
        assert_eq!(c.setup().unwrap(), TransportState::Playing);
        assert_eq!(loader.calls(), vec![44_100]);
        assert_eq!(c.selected_device().map(|d| d.name.as_str()), Some("A"));
        assert_eq!(c.last_enumeration().len(), 3);
        assert!(backend.render(16).is_some());
    }

    #[test]
    fn setup_does_not_autoplay_low_rate_default() {
        let (mut c, backend, loader) = controller(&[("Phone", 8_000)], 1.0);
        assert_eq!(c.setup().unwrap(), TransportState::Stopped);
        assert!(loader.calls().is_empty());
        assert!(backend.log().events().is_empty());
        assert!(matches!(c.play(), Err(PlayerError::NoBufferLoaded)));
    }

    #[test]
    fn setup_decode_failure_leaves_no_graph() {
        let (mut c, backend, loader) = scenario();
        loader.set_failing(true);
        assert!(matches!(c.setup(), Err(PlayerError::Decode(_))));
        assert_eq!(c.state(), TransportState::Stopped);
        assert!(c.buffer().is_none());
        assert!(backend.log().events().is_empty());
        assert!(!c.snapshot().has_graph());
    }

    #[test]
    fn transport_commands_require_a_graph() {
        let (mut c, _backend, _loader) = scenario();
        assert!(matches!(c.play(), Err(PlayerError::NoBufferLoaded)));
        assert!(matches!(c.pause(), Err(PlayerError::NoBufferLoaded)));
        assert!(matches!(c.stop(), Err(PlayerError::NoBufferLoaded)));
        assert!(matches!(c.seek(1.0), Err(PlayerError::NoBufferLoaded)));
        assert!(matches!(c.seek_relative(1.0), Err(PlayerError::NoBufferLoaded)));
        assert!(matches!(c.seek_to_frame(1), Err(PlayerError::NoBufferLoaded)));
        assert!(matches!(
            c.toggle_play_pause(),
            Err(PlayerError::NoBufferLoaded)
        ));
    }

    #[test]
    fn hot_swap_scenario() {
        let (mut c, backend, loader) = scenario();
        c.setup().unwrap();
        c.seek(12.0).unwrap();

        let b = c.output_devices().unwrap()[1].clone();
        assert!(matches!(
            c.switch_output_device(&b),
            Err(PlayerError::DeviceUnavailable(_))
        ));
        assert_eq!(c.state(), TransportState::Playing);
        assert_eq!(c.selected_device().map(|d| d.name.as_str()), Some("A"));
        assert!((c.position_secs() - 12.0).abs() < 1e-6);
        assert!(backend.render(4).is_some(), "A keeps playing");

        let state = c.switch_to_index(2).unwrap();
        assert_eq!(state, TransportState::Playing);
        assert_eq!(loader.calls(), vec![44_100, 48_000]);
        assert_eq!(c.buffer().map(|b| b.sample_rate()), Some(48_000));
        let snap = c.snapshot();
        assert_eq!(snap.device_name.as_deref(), Some("C"));
        assert_eq!(snap.output_rate, Some(48_000));
        assert_eq!(snap.total_frames, 30 * 48_000);
        assert!((snap.position_secs - 12.0).abs() < 1e-3);
        assert_eq!(backend.attached_sinks(), 1);
    }

    #[test]
    fn same_rate_switch_reuses_buffer() {
        let (mut c, _backend, loader) =
            controller(&[("A", 48_000), ("Headphones", 48_000)], 2.0);
        c.setup().unwrap();
        let before = c.buffer().cloned().unwrap();
        c.switch_to_index(1).unwrap();
        assert_eq!(loader.calls(), vec![48_000]);
        assert!(Arc::ptr_eq(&before, c.buffer().unwrap()));
    }

    #[test]
    fn switch_releases_old_sink_before_opening_new() {
        let (mut c, backend, _loader) = scenario();
        c.setup().unwrap();
        c.switch_to_index(2).unwrap();

        let log = backend.log();
        let detached_a = log.position(&SinkEvent::Detached("A".into())).unwrap();
        let opened_c = log.position(&SinkEvent::Opened("C".into())).unwrap();
        assert!(detached_a < opened_c);
        assert_eq!(
            log.events()[detached_a - 1],
            SinkEvent::Suspended("A".into())
        );
    }

    #[test]
    fn invalid_switch_keeps_paused_graph_untouched() {
        let (mut c, backend, _loader) = scenario();
        c.setup().unwrap();
        c.seek(5.0).unwrap();
        c.pause().unwrap();
        backend.log().clear();

        assert!(c.switch_to_index(1).is_err());
        assert!(c.switch_to_index(99).is_err());
        assert!(c.switch_to(&DeviceId::new("nope")).is_err());

        assert_eq!(c.state(), TransportState::Paused);
        assert!((c.position_secs() - 5.0).abs() < 1e-6);
        assert!(backend.log().events().is_empty());
    }

    #[test]
    fn switch_binds_to_identity_after_reorder() {
        let (mut c, backend, _loader) = scenario();
        c.setup().unwrap();
        let c_id = c.output_devices().unwrap()[2].id.clone();

        backend.set_devices(&[("C", 48_000), ("A", 44_100)]);
        c.switch_to(&c_id).unwrap();
        assert_eq!(c.selected_device().map(|d| d.name.as_str()), Some("C"));
        assert_eq!(c.selected_device().map(|d| d.index), Some(0));
    }

    #[test]
    fn switch_by_name() {
        let (mut c, _backend, _loader) = scenario();
        c.setup().unwrap();
        c.switch_to_name("c").unwrap();
        assert_eq!(c.snapshot().output_rate, Some(48_000));
    }

    #[test]
    fn switch_without_prior_graph_loads_and_plays() {
        let (mut c, _backend, loader) = scenario();
        let state = c.switch_to_name("C").unwrap();
        assert_eq!(state, TransportState::Playing);
        assert_eq!(loader.calls(), vec![48_000]);
        assert_eq!(c.position_frames(), 0);
    }

    #[test]
    fn failure_after_teardown_leaves_stopped_with_buffer() {
        let (mut c, backend, loader) = scenario();
        c.setup().unwrap();
        loader.set_failing(true);

        assert!(matches!(
            c.switch_to_index(2),
            Err(PlayerError::Decode(_))
        ));
        assert_eq!(c.state(), TransportState::Stopped);
        assert!(c.selected_device().is_none());
        assert_eq!(c.buffer().map(|b| b.sample_rate()), Some(44_100));
        assert_eq!(backend.attached_sinks(), 0);

        backend.fail_open("A");
        assert!(matches!(
            c.switch_to_index(0),
            Err(PlayerError::Output(_))
        ));
        assert!(matches!(c.play(), Err(PlayerError::NoBufferLoaded)));
    }

    #[test]
    fn pause_play_resumes_and_stop_rewinds() {
        let (mut c, backend, _loader) = scenario();
        c.setup().unwrap();
        backend.render(441).unwrap();
        c.pause().unwrap();
        let paused_at = c.position_frames();
        assert_eq!(paused_at, 441);
        assert_eq!(c.state(), TransportState::Paused);

        let silent = backend.render(100).unwrap();
        assert!(silent.iter().all(|s| *s == 0.0));
        c.play().unwrap();
        assert_eq!(c.position_frames(), paused_at);
        assert_eq!(c.state(), TransportState::Playing);

        c.stop().unwrap();
        assert_eq!(c.state(), TransportState::Stopped);
        c.play().unwrap();
        assert_eq!(c.position_frames(), 0);
    }

    #[test]
    fn play_is_noop_when_playing() {
        let (mut c, backend, _loader) = scenario();
        c.setup().unwrap();
        let events = backend.log().events().len();
        c.play().unwrap();
        assert_eq!(backend.log().events().len(), events);
    }

    #[test]
    fn toggle_alternates() {
        let (mut c, _backend, _loader) = scenario();
        c.setup().unwrap();
        c.seek(1.0).unwrap();
        assert_eq!(c.toggle_play_pause().unwrap(), TransportState::Paused);
        assert_eq!(c.toggle_play_pause().unwrap(), TransportState::Playing);
    }

    #[test]
    fn seek_clamps_to_buffer() {
        let (mut c, _backend, _loader) = scenario();
        c.setup().unwrap();
        assert_eq!(c.seek(-5.0).unwrap(), 0.0);
        assert_eq!(c.seek(35.0).unwrap(), 30.0);
        assert_eq!(c.seek(f64::NAN).unwrap(), 0.0);
        assert_eq!(c.state(), TransportState::Playing);
    }

    #[test]
    fn seek_relative_matches_absolute_seek() {
        let (mut c, _backend, _loader) = scenario();
        c.setup().unwrap();
        c.seek(10.0).unwrap();
        assert!((c.seek_relative(2.5).unwrap() - 12.5).abs() < 1e-6);
        assert_eq!(c.seek_relative(-100.0).unwrap(), 0.0);
        assert_eq!(c.seek_relative(100.0).unwrap(), 30.0);
    }

    #[test]
    fn seek_to_frame_clamps_and_keeps_enabled_state() {
        let (mut c, _backend, _loader) = scenario();
        c.setup().unwrap();
        c.pause().unwrap();
        assert_eq!(c.seek_to_frame(44_100).unwrap(), 44_100);
        assert_eq!(c.seek_to_frame(u64::MAX).unwrap(), 30 * 44_100);
        assert_eq!(c.state(), TransportState::Paused);
    }

    #[test]
    fn gain_persists_across_switch_and_scales_output() {
        let (mut c, backend, _loader) = scenario();
        c.setup().unwrap();
        assert_eq!(c.set_gain(0.5), 0.5);
        c.switch_to_index(2).unwrap();
        assert_eq!(c.gain(), 0.5);
        let out = backend.render(4).unwrap();
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));
        assert_eq!(c.set_gain(9.0), 2.0);
    }

    #[test]
    fn end_of_buffer_stops_and_rewinds() {
        let (mut c, backend, _loader) = controller(&[("A", 44_100)], 0.01);
        c.setup().unwrap();
        let out = backend.render(1_000).unwrap();
        assert!(out[..441 * 2].iter().all(|s| *s == 0.5));
        assert!(out[441 * 2..].iter().all(|s| *s == 0.0));
        assert_eq!(c.state(), TransportState::Stopped);
        assert_eq!(c.position_frames(), 0);
    }

    #[test]
    fn shutdown_releases_output_and_keeps_buffer() {
        let (mut c, backend, _loader) = scenario();
        c.setup().unwrap();
        c.shutdown();
        assert_eq!(backend.attached_sinks(), 0);
        assert!(c.buffer().is_some());
        assert_eq!(c.state(), TransportState::Stopped);
    }
}
