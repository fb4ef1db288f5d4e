//! AudioOnlyModel: загружаемая с диска модель, реализующая [`AudioClassifier`].
//!
//! Объединяет спектрограмму → AudioStream → статистический пулинг → Linear.

use std::path::{Path, PathBuf};
use std::time::Instant;

use audio::SpectrogramExtractor;
use audio_core::{
    AudioClassifier, AudioError, AudioResult, ClassificationResult, ClassifyOptions, ModelInfo,
    model_files,
};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use tracing::{debug, info};

use crate::classifier::{AudioOnly, Prediction};
use crate::config::AudioOnlyConfig;
use crate::weights;

/// Классификатор аудио: conv-фронтенд + (Bi)GRU/LSTM + статистический пулинг.
pub struct AudioOnlyModel {
    classifier: AudioOnly,
    extractor: SpectrogramExtractor,
    device: Device,
    config: AudioOnlyConfig,
    labels: Option<Vec<String>>,
    model_dir: Option<PathBuf>,
}

impl AudioOnlyModel {
    /// Загрузить модель из директории.
    ///
    /// Ожидаемые файлы:
    /// - `config.json`: архитектура и число классов
    /// - `model.safetensors` (или шарды): веса
    /// - `labels.json`: имена классов (необязательно)
    pub fn load(model_dir: impl AsRef<Path>, device: &Device) -> AudioResult<Self> {
        let model_dir = model_dir.as_ref();
        let config_path = model_dir.join("config.json");
        if !config_path.exists() {
            return Err(AudioError::Config(format!(
                "config.json не найден в {:?}: число классов неизвестно, используйте load_with_config",
                model_dir
            )));
        }
        let config = AudioOnlyConfig::from_file(&config_path)?;
        Self::load_with_config(model_dir, config, device)
    }

    /// Загрузить веса из директории с явно заданной конфигурацией.
    pub fn load_with_config(
        model_dir: impl AsRef<Path>,
        config: AudioOnlyConfig,
        device: &Device,
    ) -> AudioResult<Self> {
        let model_dir = model_dir.as_ref().to_path_buf();
        info!("AudioOnly: загрузка модели из {:?}", model_dir);

        let start = Instant::now();
        let files = model_files::resolve_safetensors_files(&model_dir)?;
        debug!("AudioOnly: safetensors файлы: {:?}", files);

        // Свёртки и GRU считаются в F32 на всех устройствах.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, DType::F32, device)? };

        let mut model = Self::from_var_builder(config, vb, device)?;
        model.labels = model_files::load_labels(&model_dir)?;
        if let Some(labels) = &model.labels {
            if labels.len() != model.config.num_classes {
                return Err(AudioError::Config(format!(
                    "labels.json содержит {} имён, а модель выдаёт {} классов",
                    labels.len(),
                    model.config.num_classes
                )));
            }
        }
        model.model_dir = Some(model_dir);

        info!(
            "AudioOnly: модель загружена за {:.2}с",
            start.elapsed().as_secs_f64()
        );
        Ok(model)
    }

    /// Собрать модель из готового `VarBuilder` (веса в памяти, тесты).
    pub fn from_var_builder(
        config: AudioOnlyConfig,
        vb: VarBuilder,
        device: &Device,
    ) -> AudioResult<Self> {
        config.validate()?;
        info!(
            "AudioOnly: {} ({} классов, {} {}x{}, bidirectional={})",
            config.model_name,
            config.num_classes,
            config.stream.rnn_cell,
            config.stream.n_layers,
            config.stream.hidden_size,
            config.stream.bidirectional,
        );

        let classifier = AudioOnly::load(&config, vb)?;
        let extractor = SpectrogramExtractor::new(config.spectrogram.clone());

        Ok(Self {
            classifier,
            extractor,
            device: device.clone(),
            config,
            labels: None,
            model_dir: None,
        })
    }

    /// Задать имена классов.
    pub fn with_labels(mut self, labels: Vec<String>) -> AudioResult<Self> {
        if labels.len() != self.config.num_classes {
            return Err(AudioError::Config(format!(
                "{} имён для {} классов",
                labels.len(),
                self.config.num_classes
            )));
        }
        self.labels = Some(labels);
        Ok(self)
    }

    pub fn config(&self) -> &AudioOnlyConfig {
        &self.config
    }

    pub fn classifier(&self) -> &AudioOnly {
        &self.classifier
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn model_dir(&self) -> Option<&Path> {
        self.model_dir.as_deref()
    }

    /// Классифицировать один фрагмент аудио.
    fn classify_samples(&self, samples: &[f32], top_k: usize) -> AudioResult<Prediction> {
        let spec = self.extractor.extract(samples, &self.device)?;
        debug!(
            "AudioOnly: спектрограмма {} бинов x {} фреймов",
            spec.num_bins, spec.num_frames
        );

        let mut predictions =
            self.classifier
                .predict(&spec.tensor, &[spec.num_frames], top_k, self.labels())?;
        predictions
            .pop()
            .ok_or_else(|| AudioError::Inference("пустой батч на выходе".to_string()))
    }
}

impl AudioClassifier for AudioOnlyModel {
    fn name(&self) -> &str {
        &self.config.model_name
    }

    fn sample_rate(&self) -> u32 {
        self.config.spectrogram.sample_rate as u32
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn model_info(&self) -> ModelInfo {
        let info = ModelInfo::new(
            format!("AudioOnly {}", self.config.model_name),
            self.config.num_classes,
            self.config.stream.input_size,
        );
        match weights::parameter_count(&self.config) {
            Ok(n) => info.with_parameters(n),
            Err(_) => info,
        }
    }

    fn classify(
        &mut self,
        samples: &[f32],
        options: &ClassifyOptions,
    ) -> AudioResult<ClassificationResult> {
        let start = Instant::now();
        let audio_duration = samples.len() as f64 / self.config.spectrogram.sample_rate as f64;

        info!(
            "AudioOnly: классификация {:.2}с аудио ({} сэмплов)",
            audio_duration,
            samples.len()
        );

        let prediction = self.classify_samples(samples, options.top_k)?;
        let result = ClassificationResult::new(
            prediction.logits,
            prediction.probabilities,
            prediction.top,
            self.config.model_name.clone(),
            start.elapsed().as_secs_f64(),
            audio_duration,
        );

        if let Some(best) = result.best() {
            info!(
                "AudioOnly: класс {} ({}) p={:.3}, RTF={:.3}",
                best.class_index,
                best.label.as_deref().unwrap_or("-"),
                best.probability,
                result.rtf
            );
        }
        Ok(result)
    }
}
