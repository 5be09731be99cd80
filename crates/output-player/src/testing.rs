//! In-memory backend, sink and loader used by the unit tests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::decode::{BufferLoader, DecodedBuffer};
use crate::device::{AudioDevice, DeviceId, OutputBackend, ensure_usable};
use crate::error::{PlayerError, Result};
use crate::graph::{OutputSink, SignalChain};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Opened(String),
    Attached(String),
    Started(String),
    Suspended(String),
    Detached(String),
}

/// Ordered record of sink lifecycle calls, shared by every sink of one backend.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<SinkEvent>>>);

impl EventLog {
    fn push(&self, event: SinkEvent) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &SinkEvent) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub fn device(index: usize, name: &str, sample_rate: u32) -> AudioDevice {
    AudioDevice {
        id: DeviceId::new(format!("id-{name}")),
        name: name.to_string(),
        sample_rate,
        channels: 2,
        index,
    }
}

fn devices_from(specs: &[(&str, u32)]) -> Vec<AudioDevice> {
    specs
        .iter()
        .enumerate()
        .map(|(index, (name, rate))| device(index, name, *rate))
        .collect()
}

#[derive(Default)]
struct SinkSlot {
    chain: Option<SignalChain>,
    running: bool,
}

/// Scriptable [`OutputBackend`]. Clones share the same device list and log.
#[derive(Clone)]
pub struct FakeBackend {
    devices: Arc<Mutex<Vec<AudioDevice>>>,
    default_index: Arc<Mutex<usize>>,
    failing: Arc<Mutex<HashSet<String>>>,
    slots: Arc<Mutex<Vec<Arc<Mutex<SinkSlot>>>>>,
    log: EventLog,
}

impl FakeBackend {
    pub fn new(specs: &[(&str, u32)], default_index: usize) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices_from(specs))),
            default_index: Arc::new(Mutex::new(default_index)),
            failing: Arc::default(),
            slots: Arc::default(),
            log: EventLog::default(),
        }
    }

    /// Replace the device list, as if hardware was plugged or unplugged.
    pub fn set_devices(&self, specs: &[(&str, u32)]) {
        *self.devices.lock().unwrap() = devices_from(specs);
    }

    /// Make `open_sink` fail for the named device.
    pub fn fail_open(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Number of sinks currently holding an attached chain.
    pub fn attached_sinks(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.lock().unwrap().chain.is_some())
            .count()
    }

    /// Pull `frames` stereo frames from the running sink, like one audio callback.
    pub fn render(&self, frames: usize) -> Option<Vec<f32>> {
        let slots = self.slots.lock().unwrap();
        for slot in slots.iter().rev() {
            let slot = slot.lock().unwrap();
            if let (true, Some(chain)) = (slot.running, slot.chain.as_ref()) {
                let mut out = vec![0.0; frames * 2];
                chain.render(&mut out, 2);
                return Some(out);
            }
        }
        None
    }
}

impl OutputBackend for FakeBackend {
    fn output_devices(&self) -> Result<Vec<AudioDevice>> {
        Ok(self.devices.lock().unwrap().clone())
    }

    fn default_output(&self) -> Result<AudioDevice> {
        let index = *self.default_index.lock().unwrap();
        self.devices
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .ok_or_else(|| PlayerError::DeviceUnavailable("no default output device".into()))
    }

    fn open_sink(&self, device: &AudioDevice) -> Result<Box<dyn OutputSink>> {
        ensure_usable(device)?;
        if self.failing.lock().unwrap().contains(&device.name) {
            return Err(PlayerError::Output(format!("cannot open {}", device.name)));
        }
        self.log.push(SinkEvent::Opened(device.name.clone()));
        let slot = Arc::new(Mutex::new(SinkSlot::default()));
        self.slots.lock().unwrap().push(slot.clone());
        Ok(Box::new(FakeSink {
            device: device.clone(),
            slot,
            log: self.log.clone(),
        }))
    }
}

pub struct FakeSink {
    device: AudioDevice,
    slot: Arc<Mutex<SinkSlot>>,
    log: EventLog,
}

impl OutputSink for FakeSink {
    fn device(&self) -> &AudioDevice {
        &self.device
    }

    fn sample_rate(&self) -> u32 {
        self.device.sample_rate
    }

    fn channels(&self) -> usize {
        2
    }

    fn attach(&mut self, chain: SignalChain) -> Result<()> {
        self.slot.lock().unwrap().chain = Some(chain);
        self.log.push(SinkEvent::Attached(self.device.name.clone()));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let mut slot = self.slot.lock().unwrap();
        if slot.chain.is_none() {
            return Err(PlayerError::Output("no stream attached".into()));
        }
        slot.running = true;
        self.log.push(SinkEvent::Started(self.device.name.clone()));
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.slot.lock().unwrap().running = false;
        self.log.push(SinkEvent::Suspended(self.device.name.clone()));
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.slot.lock().unwrap().running
    }

    fn detach(&mut self) {
        let mut slot = self.slot.lock().unwrap();
        slot.running = false;
        if slot.chain.take().is_some() {
            self.log.push(SinkEvent::Detached(self.device.name.clone()));
        }
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.detach();
    }
}

/// [`BufferLoader`] producing a constant 0.5 signal of fixed length at any rate.
#[derive(Clone)]
pub struct FakeLoader {
    seconds: f64,
    channels: usize,
    fail: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<u32>>>,
}

impl FakeLoader {
    pub fn new(seconds: f64, channels: usize) -> Self {
        Self {
            seconds,
            channels,
            fail: Arc::default(),
            calls: Arc::default(),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Rates requested so far, in call order.
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

impl BufferLoader for FakeLoader {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    fn load(&mut self, sample_rate: u32) -> Result<DecodedBuffer> {
        self.calls.lock().unwrap().push(sample_rate);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlayerError::Decode("fake asset is unreadable".into()));
        }
        Ok(constant_buffer(sample_rate, self.seconds, self.channels))
    }
}

pub fn constant_buffer(sample_rate: u32, seconds: f64, channels: usize) -> DecodedBuffer {
    let frames = (f64::from(sample_rate) * seconds).round() as usize;
    DecodedBuffer::new(vec![0.5; frames * channels], channels, sample_rate)
}

/// Write a 16-bit PCM WAV file into the temp dir and return its path.
pub fn write_wav(name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "output-player-{name}-{}.wav",
        std::process::id()
    ));
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    std::fs::write(&path, bytes).unwrap();
    path
}
