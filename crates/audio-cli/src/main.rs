//!
//! CLI для классификации аудио (AudioOnly: conv + GRU/LSTM + статистический пулинг).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use audio::{Resampler, load_wav, to_mono};
use audio_core::{AudioClassifier, ClassificationResult, ClassifyOptions, model_files};
use audio_stream::weights::{expected_tensors, parameter_count};
use audio_stream::{AudioOnlyConfig, AudioOnlyModel, AudioStreamConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audionet")]
#[command(author, version, about = "audionet: spectrogram classifier (conv + RNN)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an audio file
    Classify {
        /// Path to the model directory (config.json + safetensors)
        #[arg(long)]
        model: PathBuf,

        /// Path to the audio file (WAV format)
        #[arg(long)]
        audio: PathBuf,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Сколько лучших классов печатать
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Печатать результат в JSON (stdout) вместо таблицы
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Показать архитектуру модели, число параметров и таблицу весов
    Inspect {
        /// Path to the model directory
        #[arg(long)]
        model: PathBuf,

        /// Печатать полный список тензоров
        #[arg(long, default_value_t = false)]
        tensors: bool,
    },

    /// Длины последовательностей после свёрточного фронтенда
    Lengths {
        /// config.json модели (по умолчанию: стандартный стек на 161 бин)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Число входных фреймов спектрограммы
        #[arg(required = true)]
        frames: Vec<usize>,
    },

    /// Run a simple test to verify the setup
    Test {
        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Classify {
            model,
            audio,
            device,
            top_k,
            json,
        } => run_classify(&model, &audio, &device, top_k, json),
        Commands::Inspect { model, tensors } => run_inspect(&model, tensors),
        Commands::Lengths { config, frames } => run_lengths(config.as_deref(), &frames),
        Commands::Test { device } => run_test(&device),
    }
}

// ---------------------------------------------------------------------------
// Классификация
// ---------------------------------------------------------------------------

fn run_classify(
    model_dir: &Path,
    audio_path: &Path,
    device: &str,
    top_k: usize,
    json: bool,
) -> Result<()> {
    let start = Instant::now();
    let device = create_device(device)?;

    let mut model = AudioOnlyModel::load(model_dir, &device)
        .with_context(|| format!("Не удалось загрузить модель из {}", model_dir.display()))?;
    info!(
        "Модель {} загружена за {:.2}s ({} классов)",
        model.name(),
        start.elapsed().as_secs_f32(),
        model.num_classes()
    );

    let audio_buffer = load_wav(audio_path)?;
    let mono = to_mono(&audio_buffer);
    let resampler = Resampler::new(model.sample_rate() as usize);
    let resampled = resampler.resample(&mono)?;

    if !json {
        println!("🎧 audionet - Audio Classification");
        println!("==================================");
        println!("Model: {} ({})", model.name(), model_dir.display());
        println!("Audio file: {}", audio_path.display());
        println!(
            "   Sample rate: {} Hz -> {} Hz, Duration: {:.2}s",
            audio_buffer.sample_rate,
            resampled.sample_rate,
            audio_buffer.duration()
        );
        println!(
            "   Модель загружена за {:.2}s",
            start.elapsed().as_secs_f32()
        );
        println!();
    }

    let options = ClassifyOptions::default().with_top_k(top_k);
    let result = model.classify(&resampled.samples, &options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
        println!(
            "⏱️  Общее время: {:.2}s",
            start.elapsed().as_secs_f32()
        );
    }
    Ok(())
}

fn print_result(result: &ClassificationResult) {
    println!("═══════════════════════════════════════════");
    println!("📊 Top-{}:", result.top.len());
    for (rank, score) in result.top.iter().enumerate() {
        let label = score
            .label
            .clone()
            .unwrap_or_else(|| format!("class {}", score.class_index));
        println!(
            "   {:>2}. {:<24} {:6.2}%",
            rank + 1,
            label,
            score.probability * 100.0
        );
    }
    println!("═══════════════════════════════════════════");
    println!(
        "⏱️  Время инференса: {:.3}s (RTF: {:.3})",
        result.inference_time_secs, result.rtf
    );
}

// ---------------------------------------------------------------------------
// Инспекция модели
// ---------------------------------------------------------------------------

fn run_inspect(model_dir: &Path, show_tensors: bool) -> Result<()> {
    if !model_dir.is_dir() {
        anyhow::bail!("Директория модели не найдена: {}", model_dir.display());
    }

    let config_path = model_dir.join("config.json");
    let config = AudioOnlyConfig::from_file(&config_path)
        .with_context(|| format!("Не удалось прочитать {}", config_path.display()))?;
    let stream = &config.stream;

    println!("Модель: {} ({})", config.model_name, model_dir.display());
    println!("Файлы:");
    match model_files::resolve_safetensors_files(model_dir) {
        Ok(files) => {
            for f in files {
                let size = std::fs::metadata(&f).map(|m| m.len()).unwrap_or(0);
                println!("- {}: {}", f.display(), fmt_mib(size));
            }
        }
        Err(e) => println!("- safetensors: MISSING ({e})"),
    }
    match model_files::load_labels(model_dir) {
        Ok(Some(labels)) => println!("- labels.json: {} имён", labels.len()),
        Ok(None) => println!("- labels.json: -"),
        Err(e) => println!("- labels.json: ERROR ({e})"),
    }

    println!();
    println!("Архитектура:");
    println!(
        "- спектрограмма: {} Hz, окно {} (n_fft={}, hop={}), {} бинов",
        config.spectrogram.sample_rate,
        match config.spectrogram.window {
            audio_core::WindowType::Hamming => "hamming",
            audio_core::WindowType::Hann => "hann",
        },
        config.spectrogram.n_fft(),
        config.spectrogram.hop_length(),
        config.spectrogram.num_bins()
    );
    for (i, conv) in stream.conv_layers.iter().enumerate() {
        println!(
            "- conv{}: {} -> {} каналов, kernel {:?}, stride {:?}, padding {:?}",
            i, conv.in_channels, conv.out_channels, conv.kernel_size, conv.stride, conv.padding
        );
    }
    println!(
        "- rnn: {} x{} hidden={} bidirectional={} (input={})",
        stream.rnn_cell,
        stream.n_layers,
        stream.hidden_size,
        stream.bidirectional,
        stream.rnn_input_size()?
    );
    println!(
        "- fc: {} -> {} классов (pooling: {:?})",
        config.classifier_input_size(),
        config.num_classes,
        config.pooling
    );
    println!("- параметры: {}", parameter_count(&config)?);

    if show_tensors {
        println!();
        println!("Тензоры:");
        for spec in expected_tensors(&config)? {
            let marker = if spec.trainable { "" } else { " (buffer)" };
            println!("- {} {:?}{}", spec.name, spec.shape, marker);
        }
    }

    if let Err(e) = config.validate() {
        println!();
        println!("⚠️  Конфигурация некорректна: {e}");
    }
    Ok(())
}

fn fmt_mib(bytes: u64) -> String {
    format!("{:.1} MiB", (bytes as f64) / (1024.0 * 1024.0))
}

// ---------------------------------------------------------------------------
// Длины последовательностей
// ---------------------------------------------------------------------------

fn run_lengths(config: Option<&Path>, frames: &[usize]) -> Result<()> {
    let stream = match config {
        Some(path) => AudioOnlyConfig::from_file(path)?.stream,
        None => AudioStreamConfig::new(161),
    };
    info!("get_seq_lens: {} conv слоёв", stream.conv_layers.len());
    let lengths = stream.output_lengths(frames)?;
    for (input, output) in frames.iter().zip(lengths) {
        println!("{input} -> {output}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Smoke test
// ---------------------------------------------------------------------------

fn run_test(device: &str) -> Result<()> {
    println!("🧪 audionet - Setup Test");
    println!("========================");

    println!("Testing {} device...", device);
    let device = create_device(device)?;

    let config = AudioOnlyConfig::new(161, 4);
    let vb = candle_nn::VarBuilder::zeros(candle_core::DType::F32, &device);
    let mut model = AudioOnlyModel::from_var_builder(config, vb, &device)?;

    // 1 s, 440 Hz.
    let samples: Vec<f32> = (0..16000)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin() * 0.5)
        .collect();
    let result = model.classify(&samples, &ClassifyOptions::default())?;

    println!(
        "✅ Test passed. {} classes, p(class 0) = {:.3}, RTF: {:.3}",
        result.probabilities.len(),
        result.probabilities.first().copied().unwrap_or_default(),
        result.rtf
    );
    Ok(())
}

fn create_device(device: &str) -> Result<candle_core::Device> {
    match device {
        "metal" => {
            // candle может panic при инициализации Metal, если устройство недоступно.
            let prev_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(|_| {}));
            let res = std::panic::catch_unwind(|| candle_core::Device::new_metal(0));
            std::panic::set_hook(prev_hook);

            match res {
                Ok(Ok(dev)) => Ok(dev),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!(
                    "Инициализация Metal недоступна в этом окружении. Попробуйте --device cpu."
                )),
            }
        }
        "cuda" => Ok(candle_core::Device::new_cuda(0)?),
        "cpu" => Ok(candle_core::Device::Cpu),
        other => anyhow::bail!("Неизвестное устройство: {other} (cpu, metal, cuda)"),
    }
}
