//! Whole-file decode into an in-memory PCM buffer.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode every packet of the default track into interleaved `f32`
//!
//! [`FileLoader`] keeps the source-rate decode around so a device switch only pays for
//! the resample, never for a second decode.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{PlayerError, Result};
use crate::graph::frames_to_secs;
use crate::resample;

/// Fixed-length interleaved PCM decoded for one sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedBuffer {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Wrap interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        samples.truncate(samples.len() - samples.len() % channels);
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        frames_to_secs(self.frames(), self.sample_rate)
    }

    /// Samples of one frame; `index` must be below [`frames`](Self::frames).
    pub fn frame(&self, index: usize) -> &[f32] {
        let start = index * self.channels;
        &self.samples[start..start + self.channels]
    }
}

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Rate the asset was encoded at.
    pub sample_rate: u32,
    pub channels: usize,
}

/// Produces a decoded buffer at a requested sample rate.
pub trait BufferLoader {
    /// Label used in logs and error messages.
    fn describe(&self) -> String;

    fn load(&mut self, sample_rate: u32) -> Result<DecodedBuffer>;
}

/// Loads one audio file, decoding it once and resampling per requested rate.
pub struct FileLoader {
    path: PathBuf,
    chunk_frames: usize,
    source: Option<(DecodedBuffer, SourceInfo)>,
}

impl FileLoader {
    pub fn new(path: impl Into<PathBuf>, chunk_frames: usize) -> Self {
        Self {
            path: path.into(),
            chunk_frames,
            source: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Probe results, available after the first successful load.
    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.source.as_ref().map(|(_, info)| info)
    }

    fn source(&mut self) -> Result<&DecodedBuffer> {
        if self.source.is_none() {
            let decoded = decode_file(&self.path)?;
            tracing::info!(
                path = %self.path.display(),
                codec = decoded.1.codec.as_deref().unwrap_or("?"),
                rate_hz = decoded.1.sample_rate,
                channels = decoded.1.channels,
                frames = decoded.0.frames(),
                "asset decoded"
            );
            self.source = Some(decoded);
        }
        match &self.source {
            Some((buffer, _)) => Ok(buffer),
            None => Err(PlayerError::Decode(format!(
                "{} has no decoded audio",
                self.path.display()
            ))),
        }
    }
}

impl BufferLoader for FileLoader {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&mut self, sample_rate: u32) -> Result<DecodedBuffer> {
        let chunk_frames = self.chunk_frames;
        let source = self.source()?;
        if source.sample_rate() == sample_rate {
            tracing::info!(rate_hz = sample_rate, "resample skipped");
            return Ok(source.clone());
        }
        tracing::info!(
            from_hz = source.sample_rate(),
            to_hz = sample_rate,
            "resampling"
        );
        resample::resample_buffer(source, sample_rate, chunk_frames)
    }
}

/// Decode the whole default track of `path` at its native rate.
pub fn decode_file(path: &Path) -> Result<(DecodedBuffer, SourceInfo)> {
    let file =
        File::open(path).map_err(|e| PlayerError::Decode(format!("open {}: {e}", path.display())))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    decode_stream(mss, &hint, &path.display().to_string())
}

/// Decode every packet of the default track in `mss`.
///
/// Only a clean end of stream finishes the read; any other read error fails the whole
/// decode so a truncated asset is never returned.
fn decode_stream(
    mss: MediaSourceStream,
    hint: &Hint,
    label: &str,
) -> Result<(DecodedBuffer, SourceInfo)> {
    let probed = symphonia::default::get_probe()
        .format(
            hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PlayerError::Decode(format!("probe {label}: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| PlayerError::Decode("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params: CodecParameters = track.codec_params.clone();
    let rate = codec_params
        .sample_rate
        .ok_or_else(|| PlayerError::Decode("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| PlayerError::Decode(format!("codec: {e}")))?;

    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(PlayerError::Decode(format!("read packet: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(PlayerError::Decode(format!("decode: {e}"))),
        };

        channels = decoded.spec().channels.count();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() || channels == 0 {
        return Err(PlayerError::Decode(format!(
            "{label} produced no audio frames"
        )));
    }

    let info = SourceInfo {
        codec: codec_name_from_params(&codec_params),
        bit_depth: codec_params
            .bits_per_sample
            .or(codec_params.bits_per_coded_sample)
            .and_then(|v| u16::try_from(v).ok()),
        sample_rate: rate,
        channels,
    };
    Ok((DecodedBuffer::new(samples, channels, rate), info))
}

/// Best-effort codec label for the UI header.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
