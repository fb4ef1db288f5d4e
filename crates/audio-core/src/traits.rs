//! Унифицированный trait для аудио-классификаторов.

use crate::error::AudioResult;
use crate::types::{ClassificationResult, ClassifyOptions, ModelInfo};

/// Единый интерфейс классификатора аудио.
///
/// # Пример
/// ```ignore
/// let mut model = AudioOnlyModel::load("models/audio-only", &device)?;
/// let result = model.classify(&samples, &ClassifyOptions::default())?;
/// println!("{:?}", result.top);
/// ```
pub trait AudioClassifier: Send {
    /// Имя загруженной модели.
    fn name(&self) -> &str;

    /// Ожидаемая частота дискретизации входного аудио.
    fn sample_rate(&self) -> u32 {
        16_000
    }

    /// Количество классов на выходе.
    fn num_classes(&self) -> usize;

    /// Информация о загруженной модели.
    fn model_info(&self) -> ModelInfo;

    /// Классифицировать аудио.
    ///
    /// # Аргументы
    /// * `samples`: моно аудио, `f32` в диапазоне [-1.0, 1.0],
    ///   с частотой дискретизации [`Self::sample_rate()`].
    /// * `options`: параметры (top-k).
    fn classify(
        &mut self,
        samples: &[f32],
        options: &ClassifyOptions,
    ) -> AudioResult<ClassificationResult>;
}
