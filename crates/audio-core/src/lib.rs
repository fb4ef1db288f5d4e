//! # audio-core
//!
//! Базовые типы, трейты и определения ошибок для audionet.
//!
//! Крейт предоставляет общие абстракции для остальных крейтов workspace:
//!
//! - Общие типы данных (`AudioBuffer`, `Spectrogram`, `ClassificationResult`)
//! - Конфигурация спектрограммы ([`SpectrogramConfig`])
//! - Унифицированная обработка ошибок через [`AudioError`]
//! - Trait [`AudioClassifier`]: единый интерфейс классификатора

pub mod config;
pub mod debug;
pub mod error;
pub mod model_files;
pub mod traits;
pub mod types;

pub use config::{SpectrogramConfig, WindowType};
pub use error::{AudioError, AudioResult};
pub use traits::AudioClassifier;
pub use types::{
    AudioBuffer, ClassScore, ClassificationResult, ClassifyOptions, ModelInfo, Spectrogram,
};
