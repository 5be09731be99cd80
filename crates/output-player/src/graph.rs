//! Playback graph: buffer source -> gain stage -> output sink.
//!
//! The chain has exactly one shape. [`SignalChain`] owns one [`BufferSource`] and one
//! [`GainStage`]; an [`OutputSink`] receives the whole chain and pulls from it on the
//! platform audio thread. State shared with that thread is atomic:
//! - the enabled flag and read cursor live in [`SourceState`]
//! - the gain level is an `f32` stored as bits in an `AtomicU32`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::config::MAX_GAIN;
use crate::decode::DecodedBuffer;
use crate::device::AudioDevice;
use crate::error::{PlayerError, Result};

/// Enabled flag and read cursor shared between the controller and the audio callback.
#[derive(Debug)]
pub struct SourceState {
    enabled: AtomicBool,
    position: AtomicU64,
    frames: u64,
}

impl SourceState {
    fn new(frames: u64) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            position: AtomicU64::new(0),
            frames,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Current read cursor in frames.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Move the cursor, clamped to `[0, frames]`. Returns the stored position.
    fn seek(&self, frame: u64) -> u64 {
        let frame = frame.min(self.frames);
        self.position.store(frame, Ordering::Release);
        frame
    }

    /// Advance from `from` to `to` unless a seek landed in between.
    fn advance(&self, from: u64, to: u64) -> bool {
        self.position
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Reads frames from a decoded buffer at the shared cursor.
pub struct BufferSource {
    buffer: Arc<DecodedBuffer>,
    state: Arc<SourceState>,
}

impl BufferSource {
    fn new(buffer: Arc<DecodedBuffer>, state: Arc<SourceState>) -> Self {
        Self { buffer, state }
    }

    /// Fill `out` (interleaved, `out_channels` wide) from the cursor and advance it.
    ///
    /// Outputs silence while disabled. On reaching the end of the buffer the source
    /// disables itself and rewinds to 0.
    pub fn render(&self, out: &mut [f32], out_channels: usize) {
        let out_channels = out_channels.max(1);
        if !self.state.is_enabled() {
            out.fill(0.0);
            return;
        }

        let total = self.buffer.frames();
        let start = self.state.position();
        let available = total.saturating_sub(start) as usize;
        let frames = (out.len() / out_channels).min(available);

        for frame in 0..frames {
            let src = self.buffer.frame(start as usize + frame);
            let dst = &mut out[frame * out_channels..(frame + 1) * out_channels];
            for (ch, sample) in dst.iter_mut().enumerate() {
                *sample = map_channel(src, out_channels, ch);
            }
        }
        out[frames * out_channels..].fill(0.0);

        let end = start + frames as u64;
        if end >= total {
            if self.state.advance(start, 0) {
                self.state.set_enabled(false);
            }
        } else {
            self.state.advance(start, end);
        }
    }
}

/// Map one source frame onto destination channel `dst_ch`.
///
/// - mono -> stereo: duplicate channel 0
/// - stereo -> mono: average L/R
/// - other layouts: clamp to the last available source channel
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    let get = |ch: usize| src.get(ch).copied().unwrap_or(0.0);
    match (src.len(), dst_channels) {
        (1, 1) => get(0),
        (2, 2) => get(dst_ch.min(1)),
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, 2) => get(0),
        (n, _) => get(dst_ch.min(n.saturating_sub(1))),
    }
}

/// Linear gain applied after the source. Clones share the same level.
#[derive(Clone, Debug)]
pub struct GainStage {
    level: Arc<AtomicU32>,
}

impl GainStage {
    pub fn new(level: f32) -> Self {
        Self {
            level: Arc::new(AtomicU32::new(clamp_gain(level).to_bits())),
        }
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Set the level, clamped to `[0, MAX_GAIN]`. Returns the stored value.
    pub fn set_level(&self, level: f32) -> f32 {
        let level = clamp_gain(level);
        self.level.store(level.to_bits(), Ordering::Relaxed);
        level
    }

    pub fn process(&self, samples: &mut [f32]) {
        let gain = self.level();
        if gain == 1.0 {
            return;
        }
        for s in samples.iter_mut() {
            *s *= gain;
        }
    }
}

impl Default for GainStage {
    fn default() -> Self {
        Self::new(1.0)
    }
}

fn clamp_gain(level: f32) -> f32 {
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, MAX_GAIN)
}

/// The source -> gain chain handed to a sink.
pub struct SignalChain {
    source: BufferSource,
    gain: GainStage,
}

impl SignalChain {
    fn new(source: BufferSource, gain: GainStage) -> Self {
        Self { source, gain }
    }

    /// Render one block of interleaved output.
    pub fn render(&self, out: &mut [f32], out_channels: usize) {
        self.source.render(out, out_channels);
        self.gain.process(out);
    }
}

/// Terminal node bound to one hardware output.
///
/// Lifecycle: opened idle, [`attach`](Self::attach) installs the chain,
/// [`start`](Self::start)/[`suspend`](Self::suspend) run and pause the callback,
/// [`detach`](Self::detach) releases the hardware and must be idempotent.
pub trait OutputSink {
    fn device(&self) -> &AudioDevice;

    /// Rate the sink actually runs at; may differ from the device's native rate.
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    fn attach(&mut self, chain: SignalChain) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn suspend(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    fn detach(&mut self);
}

/// One connected source -> gain -> sink chain.
pub struct PlaybackGraph {
    buffer: Arc<DecodedBuffer>,
    state: Arc<SourceState>,
    sink: Box<dyn OutputSink>,
}

impl PlaybackGraph {
    /// Connect `buffer` through `gain` into `sink`. The graph starts disabled at frame 0.
    pub fn connect(
        buffer: Arc<DecodedBuffer>,
        gain: &GainStage,
        mut sink: Box<dyn OutputSink>,
    ) -> Result<Self> {
        if buffer.sample_rate() != sink.sample_rate() {
            return Err(PlayerError::RateMismatch {
                buffer: buffer.sample_rate(),
                sink: sink.sample_rate(),
            });
        }
        let state = Arc::new(SourceState::new(buffer.frames()));
        let source = BufferSource::new(buffer.clone(), state.clone());
        sink.attach(SignalChain::new(source, gain.clone()))?;
        tracing::debug!(
            device = %sink.device().name,
            rate_hz = sink.sample_rate(),
            frames = buffer.frames(),
            "graph connected"
        );
        Ok(Self {
            buffer,
            state,
            sink,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sink.sample_rate()
    }

    pub fn output_channels(&self) -> usize {
        self.sink.channels()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// Start the output callback if needed, then enable the source.
    pub fn play(&mut self) -> Result<()> {
        if !self.sink.is_running() {
            self.sink.start()?;
        }
        self.state.set_enabled(true);
        Ok(())
    }

    /// Disable the source; the cursor stays where it is.
    pub fn pause(&self) {
        self.state.set_enabled(false);
    }

    /// Disable the source and rewind to 0.
    pub fn stop(&self) {
        self.state.set_enabled(false);
        self.state.seek(0);
    }

    pub fn total_frames(&self) -> u64 {
        self.buffer.frames()
    }

    pub fn position_frames(&self) -> u64 {
        self.state.position()
    }

    pub fn position_secs(&self) -> f64 {
        frames_to_secs(self.position_frames(), self.buffer.sample_rate())
    }

    pub fn duration_secs(&self) -> f64 {
        self.buffer.duration_secs()
    }

    /// Move the cursor to `frame`, clamped to `[0, total_frames]`.
    pub fn seek_to_frame(&self, frame: u64) -> u64 {
        self.state.seek(frame)
    }

    /// Move the cursor to `secs`, clamped to `[0, duration]`. NaN seeks to 0.
    pub fn seek_to_secs(&self, secs: f64) -> u64 {
        let secs = if secs.is_nan() {
            0.0
        } else {
            secs.clamp(0.0, self.duration_secs())
        };
        let frame = (secs * f64::from(self.buffer.sample_rate())).round() as u64;
        self.state.seek(frame)
    }

    /// Disable, stop the callback and release the sink, consuming the graph.
    pub fn teardown(mut self) {
        tracing::debug!(device = %self.sink.device().name, "graph teardown");
        self.shutdown();
    }

    /// Idempotent; runs again from `Drop` after an explicit teardown.
    fn shutdown(&mut self) {
        self.state.set_enabled(false);
        if self.sink.is_running() {
            if let Err(e) = self.sink.suspend() {
                tracing::warn!(device = %self.sink.device().name, "suspend failed: {e}");
            }
        }
        self.sink.detach();
    }
}

impl Drop for PlaybackGraph {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn frames_to_secs(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / f64::from(sample_rate)
}
