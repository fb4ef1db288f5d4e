//! WAV file loading.

use audio_core::{AudioBuffer, AudioError, AudioResult};
use hound::WavReader;
use std::path::Path;
use tracing::debug;

/// Load a WAV file and return an AudioBuffer with samples in [-1.0, 1.0].
pub fn load_wav(path: impl AsRef<Path>) -> AudioResult<AudioBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .map_err(|e| AudioError::Audio(format!("Failed to open WAV {}: {}", path.display(), e)))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate as usize;
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::Audio(format!("Failed to read samples: {}", e)))?,
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AudioError::Audio(format!("Failed to read samples: {}", e)))?
        }
    };

    debug!(
        "WAV {}: {} Hz, {} ch, {} samples",
        path.display(),
        sample_rate,
        channels,
        samples.len()
    );

    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

/// Convert multi-channel audio to mono by averaging channels.
pub fn to_mono(buffer: &AudioBuffer) -> AudioBuffer {
    if buffer.channels == 1 {
        return buffer.clone();
    }

    let mono_samples: Vec<f32> = buffer
        .samples
        .chunks(buffer.channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    AudioBuffer::new(mono_samples, buffer.sample_rate, 1)
}
