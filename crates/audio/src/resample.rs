//! Audio resampling.

use audio_core::{AudioBuffer, AudioError, AudioResult};
use rubato::{FftFixedInOut, Resampler as RubatoResampler};
use tracing::debug;

/// Input block size fed to the FFT resampler.
const CHUNK_SIZE: usize = 1024;

/// Audio resampler for converting sample rates.
pub struct Resampler {
    target_sample_rate: usize,
}

impl Resampler {
    /// Create a new resampler with target sample rate.
    pub fn new(target_sample_rate: usize) -> Self {
        Self { target_sample_rate }
    }

    /// Target sample rate in Hz.
    pub fn target_sample_rate(&self) -> usize {
        self.target_sample_rate
    }

    /// Resample a mono buffer to the target sample rate.
    pub fn resample(&self, buffer: &AudioBuffer) -> AudioResult<AudioBuffer> {
        if buffer.sample_rate == self.target_sample_rate {
            return Ok(buffer.clone());
        }

        if buffer.channels != 1 {
            return Err(AudioError::Audio(
                "Resampling requires mono audio. Use to_mono() first.".to_string(),
            ));
        }

        let mut resampler = FftFixedInOut::<f32>::new(
            buffer.sample_rate,
            self.target_sample_rate,
            CHUNK_SIZE,
            1,
        )
        .map_err(|e| AudioError::Audio(format!("Failed to create resampler: {}", e)))?;

        let input_frames = resampler.input_frames_next();
        let delay = resampler.output_delay();
        let ratio = self.target_sample_rate as f64 / buffer.sample_rate as f64;
        let expected_len = (buffer.samples.len() as f64 * ratio).round() as usize;
        let mut output = Vec::with_capacity(delay + expected_len + input_frames);

        // Подаём нули после конца сигнала, пока задержка фильтра не выдаст хвост.
        let mut pos = 0;
        while output.len() < delay + expected_len {
            let start = pos.min(buffer.samples.len());
            let end = (pos + input_frames).min(buffer.samples.len());
            let mut block = buffer.samples[start..end].to_vec();
            block.resize(input_frames, 0.0);
            let out = resampler
                .process(&[block], None)
                .map_err(|e| AudioError::Audio(format!("Resampling failed: {}", e)))?;
            output.extend_from_slice(&out[0]);
            pos += input_frames;
        }

        output.drain(..delay);
        output.truncate(expected_len);
        debug!(
            "Resampled {} Hz -> {} Hz ({} -> {} samples)",
            buffer.sample_rate,
            self.target_sample_rate,
            buffer.samples.len(),
            output.len()
        );

        Ok(AudioBuffer::new(output, self.target_sample_rate, 1))
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new(16000)
    }
}
