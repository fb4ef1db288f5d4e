//! Конфигурация спектрограммы, подаваемой на вход классификатора.

use serde::{Deserialize, Serialize};

/// Оконная функция STFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    /// Симметричное окно Хэмминга (по умолчанию).
    Hamming,
    /// Периодическое окно Ханна.
    Hann,
}

/// Конфигурация линейной (не mel) спектрограммы.
///
/// Размер окна и шаг задаются в секундах, а не в сэмплах, поэтому
/// одна и та же конфигурация работает для любой частоты дискретизации.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrogramConfig {
    /// Целевая частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Длина окна STFT в секундах.
    pub window_size_secs: f32,

    /// Шаг между фреймами в секундах.
    pub window_stride_secs: f32,

    /// Оконная функция.
    pub window: WindowType,

    /// Per-utterance нормализация (вычитание среднего, деление на σ).
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

fn default_normalize() -> bool {
    true
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            window_size_secs: 0.02,
            window_stride_secs: 0.01,
            window: WindowType::Hamming,
            normalize: true,
        }
    }
}

impl SpectrogramConfig {
    /// Размер FFT в сэмплах.
    pub fn n_fft(&self) -> usize {
        (self.sample_rate as f64 * self.window_size_secs as f64).round() as usize
    }

    /// Шаг между фреймами в сэмплах.
    pub fn hop_length(&self) -> usize {
        ((self.sample_rate as f64 * self.window_stride_secs as f64).round() as usize).max(1)
    }

    /// Количество частотных бинов (n_fft / 2 + 1): это `input_size` модели.
    pub fn num_bins(&self) -> usize {
        self.n_fft() / 2 + 1
    }

    /// Частота фреймов в Гц.
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.hop_length() as f32
    }
}
