//! Общие типы для классификации аудио.
//!
//! Буферы аудио, спектрограммы, результаты классификации и опции.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Аудио-буфер
// ---------------------------------------------------------------------------

/// Буфер необработанного аудио.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Аудио-сэмплы (нормализованы к [-1.0, 1.0]), каналы чередуются.
    pub samples: Vec<f32>,

    /// Частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Количество каналов.
    pub channels: usize,
}

impl AudioBuffer {
    /// Создать новый буфер аудио.
    pub fn new(samples: Vec<f32>, sample_rate: usize, channels: usize) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Длительность в секундах.
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / (self.sample_rate * self.channels) as f32
    }

    /// Количество сэмплов на канал.
    pub fn num_samples(&self) -> usize {
        self.samples.len() / self.channels
    }
}

// ---------------------------------------------------------------------------
// Спектрограмма
// ---------------------------------------------------------------------------

/// Линейная спектрограмма, готовая для подачи в модель.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Тензор формы [batch=1, channels=1, num_bins, num_frames].
    pub tensor: Tensor,

    /// Количество временных фреймов.
    pub num_frames: usize,

    /// Количество частотных бинов.
    pub num_bins: usize,
}

impl Spectrogram {
    /// Создать спектрограмму.
    pub fn new(tensor: Tensor, num_frames: usize, num_bins: usize) -> Self {
        Self {
            tensor,
            num_frames,
            num_bins,
        }
    }
}

// ---------------------------------------------------------------------------
// Результат классификации
// ---------------------------------------------------------------------------

/// Вероятность одного класса.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    /// Индекс класса.
    pub class_index: usize,
    /// Имя класса из `labels.json`, если есть.
    pub label: Option<String>,
    /// Вероятность (softmax).
    pub probability: f32,
}

impl ClassScore {
    /// Выбрать `k` наиболее вероятных классов.
    ///
    /// При равных вероятностях меньший индекс идёт первым. NaN считается
    /// наименьшим значением.
    pub fn top_k(probabilities: &[f32], k: usize, labels: Option<&[String]>) -> Vec<ClassScore> {
        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        order.sort_by(|&a, &b| {
            let (pa, pb) = (probabilities[a], probabilities[b]);
            pb.partial_cmp(&pa)
                .unwrap_or_else(|| pa.is_nan().cmp(&pb.is_nan()))
                .then(a.cmp(&b))
        });

        order
            .into_iter()
            .take(k)
            .map(|class_index| ClassScore {
                class_index,
                label: labels.and_then(|l| l.get(class_index).cloned()),
                probability: probabilities[class_index],
            })
            .collect()
    }
}

/// Результат классификации одного аудиофрагмента.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Сырые логиты классификатора.
    pub logits: Vec<f32>,

    /// Softmax по логитам.
    pub probabilities: Vec<f32>,

    /// Top-k классов по убыванию вероятности.
    pub top: Vec<ClassScore>,

    /// Время инференса в секундах.
    pub inference_time_secs: f64,

    /// Длительность аудио в секундах.
    pub audio_duration_secs: f64,

    /// Real-Time Factor (inference_time / audio_duration).
    pub rtf: f64,

    /// Название использованной модели.
    pub model_name: String,
}

impl ClassificationResult {
    /// Создать результат из логитов, вероятностей и метрик.
    pub fn new(
        logits: Vec<f32>,
        probabilities: Vec<f32>,
        top: Vec<ClassScore>,
        model_name: String,
        inference_time_secs: f64,
        audio_duration_secs: f64,
    ) -> Self {
        let rtf = if audio_duration_secs > 0.0 {
            inference_time_secs / audio_duration_secs
        } else {
            0.0
        };
        Self {
            logits,
            probabilities,
            top,
            inference_time_secs,
            audio_duration_secs,
            rtf,
            model_name,
        }
    }

    /// Самый вероятный класс.
    pub fn best(&self) -> Option<&ClassScore> {
        self.top.first()
    }
}

/// Опции классификации: передаются в
/// [`AudioClassifier::classify`](crate::traits::AudioClassifier::classify).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyOptions {
    /// Сколько лучших классов вернуть.
    pub top_k: usize,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

impl ClassifyOptions {
    /// Задать top-k.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// Метаданные загруженной модели.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Человекочитаемое название.
    pub display_name: String,
    /// Количество параметров (если известно).
    pub parameters: Option<u64>,
    /// Количество классов.
    pub num_classes: usize,
    /// Количество частотных бинов на входе.
    pub input_size: usize,
    /// Бэкенд инференса.
    pub backend: String,
}

impl ModelInfo {
    /// Создать метаданные модели.
    pub fn new(display_name: impl Into<String>, num_classes: usize, input_size: usize) -> Self {
        Self {
            display_name: display_name.into(),
            parameters: None,
            num_classes,
            input_size,
            backend: "candle".to_string(),
        }
    }

    /// Задать количество параметров.
    pub fn with_parameters(mut self, params: u64) -> Self {
        self.parameters = Some(params);
        self
    }
}
