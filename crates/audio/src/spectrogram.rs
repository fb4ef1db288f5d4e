//! Линейная log-magnitude спектрограмма.
//!
//! Пайплайн: STFT (center=True, reflect-паддинг) → |X| → ln(1 + |X|) →
//! per-utterance нормализация. Результат: тензор `[1, 1, n_fft/2 + 1, frames]`,
//! то есть «картинка» с одним каналом, как ожидает свёрточный фронтенд.

use audio_core::{AudioError, AudioResult, Spectrogram, SpectrogramConfig, WindowType};
use candle_core::{Device, Tensor};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f32::consts::PI;
use tracing::debug;

/// Экстрактор спектрограммы.
#[derive(Debug)]
pub struct SpectrogramExtractor {
    config: SpectrogramConfig,
    window: Vec<f32>,
}

impl SpectrogramExtractor {
    /// Создать экстрактор с окном, заданным конфигурацией.
    pub fn new(config: SpectrogramConfig) -> Self {
        let n_fft = config.n_fft();
        let window = match config.window {
            WindowType::Hamming => hamming_window(n_fft),
            WindowType::Hann => hann_window(n_fft),
        };
        Self { config, window }
    }

    /// Конфигурация экстрактора.
    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Количество фреймов для сигнала длиной `num_samples`.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        num_samples / self.config.hop_length() + 1
    }

    /// Извлечь спектрограмму.
    ///
    /// # Аргументы
    /// * `samples`: моно аудио в диапазоне [-1.0, 1.0]
    /// * `device`: устройство для выходного тензора
    pub fn extract(&self, samples: &[f32], device: &Device) -> AudioResult<Spectrogram> {
        if samples.is_empty() {
            return Err(AudioError::InvalidInput(
                "Пустой аудиосигнал: спектрограмма не определена".to_string(),
            ));
        }

        let mut frames = self.magnitude_stft(samples);
        for frame in frames.iter_mut() {
            for v in frame.iter_mut() {
                *v = v.ln_1p();
            }
        }

        if self.config.normalize {
            normalize_in_place(&mut frames);
        }

        let num_frames = frames.len();
        let num_bins = self.config.num_bins();

        // [frames, bins] → [bins, frames]: частота по высоте, время по ширине.
        let flat: Vec<f32> = frames.into_iter().flatten().collect();
        let tensor = Tensor::from_vec(flat, (num_frames, num_bins), device)?
            .t()?
            .contiguous()?
            .reshape((1, 1, num_bins, num_frames))?;

        debug!(
            "Spectrogram: {} сэмплов -> {} бинов x {} фреймов",
            samples.len(),
            num_bins,
            num_frames
        );

        Ok(Spectrogram::new(tensor, num_frames, num_bins))
    }

    /// STFT с амплитудным спектром (|X|), только положительные частоты.
    fn magnitude_stft(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft();
        let hop_length = self.config.hop_length();
        let num_frames = self.num_frames(samples.len());
        let pad = (n_fft / 2) as isize;
        let n = samples.len() as isize;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        let mut spectrogram = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];

        for frame_idx in 0..num_frames {
            let start = frame_idx as isize * hop_length as isize - pad;

            for (i, slot) in buffer.iter_mut().enumerate() {
                let idx = reflect_index(start + i as isize, n);
                let sample = idx.map(|j| samples[j] * self.window[i]).unwrap_or(0.0);
                *slot = Complex::new(sample, 0.0);
            }

            fft.process(&mut buffer);

            spectrogram.push(buffer.iter().take(n_fft / 2 + 1).map(|c| c.norm()).collect());
        }

        spectrogram
    }
}

impl Default for SpectrogramExtractor {
    fn default() -> Self {
        Self::new(SpectrogramConfig::default())
    }
}

/// Отражение индекса за границами сигнала (pad_mode="reflect").
///
/// Для очень коротких сигналов отражение может снова выйти за границы:
/// тогда сэмпл считается нулевым.
fn reflect_index(idx: isize, n: isize) -> Option<usize> {
    if n == 1 {
        return (idx == 0).then_some(0);
    }
    let mut idx = idx;
    if idx < 0 {
        idx = -idx;
    }
    if idx >= n {
        idx = 2 * n - idx - 2;
    }
    (0..n).contains(&idx).then_some(idx as usize)
}

/// Вычесть среднее и поделить на несмещённое стандартное отклонение.
fn normalize_in_place(frames: &mut [Vec<f32>]) {
    let count: usize = frames.iter().map(Vec::len).sum();
    if count == 0 {
        return;
    }
    let n = count as f64;
    let mean = frames.iter().flatten().map(|&v| v as f64).sum::<f64>() / n;
    let denom = if count > 1 { n - 1.0 } else { 1.0 };
    let var = frames
        .iter()
        .flatten()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / denom;
    let std = var.sqrt().max(1e-10);

    for frame in frames.iter_mut() {
        for v in frame.iter_mut() {
            *v = ((*v as f64 - mean) / std) as f32;
        }
    }
}

/// Симметричное окно Хэмминга.
fn hamming_window(length: usize) -> Vec<f32> {
    if length <= 1 {
        return vec![1.0; length];
    }
    let denom = (length - 1) as f32;
    (0..length)
        .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f32 / denom).cos())
        .collect()
}

/// Периодическое окно Ханна.
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / length as f32).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_window() {
        let w = hamming_window(320);
        assert_eq!(w.len(), 320);
        assert!((w[0] - 0.08).abs() < 1e-5);
        assert!((w[319] - 0.08).abs() < 1e-5);
        assert!(w[160] > 0.99);
    }

    #[test]
    fn test_hann_window() {
        let window = hann_window(400);
        assert!(window[0].abs() < 1e-6);
        assert!((window[200] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-2, 10), Some(2));
        assert_eq!(reflect_index(10, 10), Some(8));
        assert_eq!(reflect_index(5, 10), Some(5));
        assert_eq!(reflect_index(-30, 10), None);
        assert_eq!(reflect_index(0, 1), Some(0));
        assert_eq!(reflect_index(1, 1), None);
    }

    #[test]
    fn test_normalize_zero_mean_unit_std() {
        let mut frames = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        normalize_in_place(&mut frames);
        let flat: Vec<f32> = frames.into_iter().flatten().collect();
        let mean: f32 = flat.iter().sum::<f32>() / 4.0;
        let var: f32 = flat.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 3.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_extract_shape() {
        let extractor = SpectrogramExtractor::default();
        let samples = vec![0.0f32; 16000];
        let spec = extractor.extract(&samples, &Device::Cpu).unwrap();
        assert_eq!(spec.num_bins, 161);
        assert_eq!(spec.num_frames, 101);
        assert_eq!(spec.tensor.dims(), &[1, 1, 161, 101]);
    }

    #[test]
    fn test_extract_empty_is_error() {
        let extractor = SpectrogramExtractor::default();
        assert!(extractor.extract(&[], &Device::Cpu).is_err());
    }
}
