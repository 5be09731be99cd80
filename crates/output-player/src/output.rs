//! Hardware sink (CPAL output stream).
//!
//! Builds the CPAL output stream for one device and runs the attached
//! [`SignalChain`] from the real-time callback. The callback:
//! - renders one block of interleaved `f32` from the chain without locking
//! - converts `f32` samples to the device sample format

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device::{AudioDevice, pick_buffer_size, pick_output_config};
use crate::error::{PlayerError, Result};
use crate::graph::{OutputSink, SignalChain};

/// [`OutputSink`] bound to one CPAL device.
pub struct CpalSink {
    info: AudioDevice,
    device: cpal::Device,
    sample_format: cpal::SampleFormat,
    stream_config: cpal::StreamConfig,
    stream: Option<cpal::Stream>,
    running: bool,
}

impl CpalSink {
    /// Choose an output config close to the device's native rate. No stream is built yet.
    pub fn open(info: AudioDevice, device: cpal::Device, buffer_frames: Option<u32>) -> Result<Self> {
        let config = pick_output_config(&device, Some(info.sample_rate))?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = pick_buffer_size(&config, buffer_frames) {
            stream_config.buffer_size = buf;
        }
        tracing::info!(
            device = %info.name,
            native_rate_hz = info.sample_rate,
            output_rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            sample_format = ?config.sample_format(),
            buffer_size = ?stream_config.buffer_size,
            "output sink opened"
        );
        Ok(Self {
            info,
            device,
            sample_format: config.sample_format(),
            stream_config,
            stream: None,
            running: false,
        })
    }
}

impl OutputSink for CpalSink {
    fn device(&self) -> &AudioDevice {
        &self.info
    }

    fn sample_rate(&self) -> u32 {
        self.stream_config.sample_rate
    }

    fn channels(&self) -> usize {
        self.stream_config.channels as usize
    }

    fn attach(&mut self, chain: SignalChain) -> Result<()> {
        self.detach();
        let stream =
            build_output_stream(&self.device, &self.stream_config, self.sample_format, chain)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| PlayerError::Output("no stream attached".into()))?;
        stream
            .play()
            .map_err(|e| PlayerError::Output(format!("start stream on {}: {e}", self.info.name)))?;
        self.running = true;
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| PlayerError::Output(format!("pause stream on {}: {e}", self.info.name)))?;
        }
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn detach(&mut self) {
        if let Some(stream) = self.stream.take() {
            if self.running {
                let _ = stream.pause();
            }
            drop(stream);
            tracing::debug!(device = %self.info.name, "output stream released");
        }
        self.running = false;
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Build a CPAL output stream that pulls from `chain`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    chain: SignalChain,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, chain),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, chain),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, chain),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, chain),
        other => Err(PlayerError::Output(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
///
/// The scratch block grows to the callback size once and is reused afterwards.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    chain: SignalChain,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                if scratch.len() != data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                chain.render(&mut scratch, channels_out);
                for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::Output(format!("build output stream: {e}")))?;

    Ok(stream)
}
