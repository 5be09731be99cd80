//! Whole-buffer resample stage.
//!
//! Uses Rubato's sinc resampler to convert a decoded buffer to the rate an output
//! device runs at. The input is fed in fixed chunks, the tail as a partial chunk, and
//! silence is pushed through until the filter delay plus the expected output length has
//! come out. The leading delay frames are then dropped so frame `n` of the source lands
//! at `round(n * ratio)`.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::decode::DecodedBuffer;
use crate::error::{PlayerError, Result};

/// Upper bound on silent chunks pushed to drain the resampler.
const MAX_FLUSH_CHUNKS: usize = 8;

/// Convert `src` to `dst_rate`. Returns a copy when the rates already match.
///
/// The output has exactly `round(frames * dst_rate / src_rate)` frames.
pub fn resample_buffer(
    src: &DecodedBuffer,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<DecodedBuffer> {
    let src_rate = src.sample_rate();
    if src_rate == dst_rate {
        return Ok(src.clone());
    }
    if src_rate == 0 || dst_rate == 0 {
        return Err(PlayerError::Decode(format!(
            "cannot resample {src_rate} Hz -> {dst_rate} Hz"
        )));
    }

    let channels = src.channels();
    let f_ratio = f64::from(dst_rate) / f64::from(src_rate);

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let chunk_in_frames = chunk_frames.max(1);
    let mut resampler: Box<dyn Resampler<f32>> = Box::new(
        Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_in_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| PlayerError::Decode(format!("resampler init: {e}")))?,
    );

    let delay_frames = resampler.output_delay();
    let total_frames = src.frames() as usize;
    let expected_frames = (total_frames as f64 * f_ratio).round() as usize;
    let wanted_samples = (delay_frames + expected_frames) * channels;
    let scratch_frames = (chunk_in_frames as f64 * f_ratio * 1.1).ceil() as usize + 256;
    let mut stage = ChunkStage {
        channels,
        scratch: vec![0.0f32; scratch_frames * channels],
        out: Vec::with_capacity(wanted_samples + scratch_frames * channels),
    };

    let samples = src.samples();
    let mut pos = 0usize;
    while pos + chunk_in_frames <= total_frames {
        let input = &samples[pos * channels..(pos + chunk_in_frames) * channels];
        stage.process(resampler.as_mut(), input, chunk_in_frames, None)?;
        pos += chunk_in_frames;
    }
    if pos < total_frames {
        let tail_frames = total_frames - pos;
        stage.process(
            resampler.as_mut(),
            &samples[pos * channels..],
            tail_frames,
            Some(tail_frames),
        )?;
    }

    let silence = vec![0.0f32; chunk_in_frames * channels];
    let mut flushes = 0;
    while stage.out.len() < wanted_samples && flushes < MAX_FLUSH_CHUNKS {
        stage.process(resampler.as_mut(), &silence, chunk_in_frames, None)?;
        flushes += 1;
    }

    let mut out = stage.out;
    out.drain(..(delay_frames * channels).min(out.len()));
    out.resize(expected_frames * channels, 0.0);
    Ok(DecodedBuffer::new(out, channels, dst_rate))
}

/// Scratch output plus the growing result.
struct ChunkStage {
    channels: usize,
    scratch: Vec<f32>,
    out: Vec<f32>,
}

impl ChunkStage {
    fn process(
        &mut self,
        resampler: &mut dyn Resampler<f32>,
        input: &[f32],
        frames: usize,
        partial_len: Option<usize>,
    ) -> Result<()> {
        let channels = self.channels;
        let input_adapter = InterleavedSlice::new(input, channels, frames)
            .map_err(|e| PlayerError::Decode(format!("interleaved slice (input): {e}")))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };

        let nbr_out = {
            let out_capacity_frames = self.scratch.len() / channels;
            let mut output_adapter =
                InterleavedSlice::new_mut(&mut self.scratch, channels, out_capacity_frames)
                    .map_err(|e| PlayerError::Decode(format!("interleaved slice (output): {e}")))?;
            let (_nbr_in, nbr_out) = resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
                .map_err(|e| PlayerError::Decode(format!("resampler process: {e}")))?;
            nbr_out
        };

        self.out.extend_from_slice(&self.scratch[..nbr_out * channels]);
        Ok(())
    }
}
