//! Integration tests for the AudioOnly classifier on small in-memory models.

use std::collections::HashMap;
use std::path::PathBuf;

use audio_core::{AudioClassifier, AudioError, ClassifyOptions, SpectrogramConfig};
use audio_stream::config::default_conv_layers;
use audio_stream::weights::random_tensors;
use audio_stream::{
    AudioOnly, AudioOnlyConfig, AudioOnlyModel, AudioStream, RnnCellType, StatPooling,
};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

/// 33 bins (n_fft=64), 4 conv channels, 2x8 BiGRU, 3 classes.
fn small_config() -> AudioOnlyConfig {
    let mut config = AudioOnlyConfig::new(33, 3);
    config.model_name = "audio-only-tiny".to_string();
    config.stream.conv_layers = default_conv_layers(4);
    config.stream.hidden_size = 8;
    config.spectrogram = SpectrogramConfig {
        sample_rate: 16000,
        window_size_secs: 0.004,
        window_stride_secs: 0.002,
        ..SpectrogramConfig::default()
    };
    config
}

fn random_vb(config: &AudioOnlyConfig) -> (HashMap<String, Tensor>, VarBuilder<'static>) {
    let tensors = random_tensors(config, 0.2, &Device::Cpu).expect("random weights");
    let vb = VarBuilder::from_tensors(tensors.clone(), DType::F32, &Device::Cpu);
    (tensors, vb)
}

fn to_vec(t: &Tensor) -> Vec<f32> {
    t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tol, "index {i}: {x} vs {y}");
    }
}

/// Batch of two: item 0 uses all 40 frames, item 1 only 25 (rest zero-padded).
fn padded_batch(dev: &Device) -> (Tensor, Tensor) {
    let full = Tensor::randn(0f32, 1.0, (1, 1, 33, 40), dev).unwrap();
    let short = Tensor::randn(0f32, 1.0, (1, 1, 33, 25), dev).unwrap();
    let short_padded = short.pad_with_zeros(3, 0, 15).unwrap();
    let batch = Tensor::cat(&[&full, &short_padded], 0).unwrap();
    (batch, short)
}

#[test]
fn test_forward_shapes() {
    let config = small_config();
    config.validate().unwrap();
    assert_eq!(config.stream.rnn_input_size().unwrap(), 9 * 4);

    let (_, vb) = random_vb(&config);
    let model = AudioOnly::load(&config, vb).unwrap();
    let (batch, _) = padded_batch(&Device::Cpu);

    let out = model
        .audio_stream()
        .forward_with_lengths(&batch, &[40, 25])
        .unwrap();
    assert_eq!(out.lengths, vec![20, 13]);
    assert_eq!(out.features.dims(), &[2, 20, 16]);
    assert_eq!(out.state.h_n().dims(), &[4, 2, 8]);

    let logits = model.forward(&batch, &[40, 25]).unwrap();
    assert_eq!(logits.dims(), &[2, 3]);
}

#[test]
fn test_padding_does_not_leak_into_valid_frames() {
    let mut config = small_config();
    config.pooling = StatPooling::Masked;
    let (_, vb) = random_vb(&config);
    let model = AudioOnly::load(&config, vb).unwrap();
    let dev = Device::Cpu;
    let (batch, short) = padded_batch(&dev);

    let batched = model.audio_stream().forward_with_lengths(&batch, &[40, 25]).unwrap();
    let alone = model.audio_stream().forward_with_lengths(&short, &[25]).unwrap();

    assert_eq!(alone.features.dims(), &[1, 13, 16]);
    let batched_item = batched.features.narrow(0, 1, 1).unwrap().narrow(1, 0, 13).unwrap();
    assert_close(&to_vec(&batched_item), &to_vec(&alone.features), 1e-4);

    // Frames past the item's length are exactly zero.
    let tail = batched.features.narrow(0, 1, 1).unwrap().narrow(1, 13, 7).unwrap();
    assert!(to_vec(&tail).iter().all(|v| *v == 0.0));

    // Final states of both directions agree as well.
    let h_batched = batched.state.h_n().narrow(1, 1, 1).unwrap();
    assert_close(&to_vec(&h_batched), &to_vec(alone.state.h_n()), 1e-4);

    // With masked pooling the logits do not depend on the batch padding.
    let logits_batched = model.forward(&batch, &[40, 25]).unwrap().narrow(0, 1, 1).unwrap();
    let logits_alone = model.forward(&short, &[25]).unwrap();
    assert_close(&to_vec(&logits_batched), &to_vec(&logits_alone), 1e-3);
}

#[test]
fn test_padded_pooling_counts_padding_frames() {
    let config = small_config();
    let (tensors, vb) = random_vb(&config);
    let padded_model = AudioOnly::load(&config, vb).unwrap();

    let mut masked_config = config.clone();
    masked_config.pooling = StatPooling::Masked;
    let masked_model = AudioOnly::load(
        &masked_config,
        VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu),
    )
    .unwrap();

    let (batch, _) = padded_batch(&Device::Cpu);
    let a = to_vec(&padded_model.forward(&batch, &[40, 25]).unwrap());
    let b = to_vec(&masked_model.forward(&batch, &[40, 25]).unwrap());

    // Item 0 spans the whole batch, so both poolings agree on it.
    assert_close(&a[..3], &b[..3], 1e-4);
    // Item 1 is padded: its padded statistics include the zero frames.
    assert!(a[3..].iter().zip(&b[3..]).any(|(x, y)| (x - y).abs() > 1e-6));
}

#[test]
fn test_lstm_unidirectional() {
    let mut config = small_config();
    config.stream.rnn_cell = RnnCellType::Lstm;
    config.stream.bidirectional = false;
    config.stream.n_layers = 3;
    let (_, vb) = random_vb(&config);
    let stream = AudioStream::load(&config.stream, vb.pp("audio_stream")).unwrap();

    let (batch, _) = padded_batch(&Device::Cpu);
    let (features, state) = stream.forward(&batch, &[40, 25]).unwrap();
    assert_eq!(features.dims(), &[2, 20, 8]);
    assert_eq!(state.h_n().dims(), &[3, 2, 8]);
    assert_eq!(state.c_n().map(|c| c.dims().to_vec()), Some(vec![3, 2, 8]));
}

#[test]
fn test_bilstm_padding_keeps_cell_state() {
    let mut config = small_config();
    config.stream.rnn_cell = RnnCellType::Lstm;
    let (_, vb) = random_vb(&config);
    let stream = AudioStream::load(&config.stream, vb.pp("audio_stream")).unwrap();
    let (batch, short) = padded_batch(&Device::Cpu);

    let batched = stream.forward_with_lengths(&batch, &[40, 25]).unwrap();
    let alone = stream.forward_with_lengths(&short, &[25]).unwrap();

    let batched_item = batched.features.narrow(0, 1, 1).unwrap().narrow(1, 0, 13).unwrap();
    assert_close(&to_vec(&batched_item), &to_vec(&alone.features), 1e-4);
    let tail = batched.features.narrow(0, 1, 1).unwrap().narrow(1, 13, 7).unwrap();
    assert!(to_vec(&tail).iter().all(|v| *v == 0.0));

    // [layers * directions, batch, hidden]: both h_n and c_n stop at the last valid step.
    let c_batched = batched.state.c_n().unwrap();
    let c_alone = alone.state.c_n().unwrap();
    assert_eq!(c_batched.dims(), &[4, 2, 8]);
    assert_close(
        &to_vec(&c_batched.narrow(1, 1, 1).unwrap()),
        &to_vec(c_alone),
        1e-4,
    );
    assert_close(
        &to_vec(&batched.state.h_n().narrow(1, 1, 1).unwrap()),
        &to_vec(alone.state.h_n()),
        1e-4,
    );
}

#[test]
fn test_input_validation() {
    let config = small_config();
    let (_, vb) = random_vb(&config);
    let model = AudioOnly::load(&config, vb).unwrap();
    let dev = Device::Cpu;

    let two_channels = Tensor::zeros((1, 2, 33, 10), DType::F32, &dev).unwrap();
    let wrong_bins = Tensor::zeros((1, 1, 32, 10), DType::F32, &dev).unwrap();
    let rank3 = Tensor::zeros((1, 33, 10), DType::F32, &dev).unwrap();
    let ok = Tensor::zeros((2, 1, 33, 10), DType::F32, &dev).unwrap();

    for (x, lens) in [
        (&two_channels, vec![10]),
        (&wrong_bins, vec![10]),
        (&rank3, vec![10]),
        (&ok, vec![10]),
        (&ok, vec![10, 0]),
        (&ok, vec![10, 11]),
    ] {
        let err = model.forward(x, &lens).unwrap_err();
        assert!(matches!(err, AudioError::InvalidInput(_)), "{err}");
    }

    // Two input frames collapse to a single encoder frame: no variance.
    let err = model.forward(&ok, &[2, 2]).unwrap_err();
    assert!(matches!(err, AudioError::InvalidInput(_)), "{err}");
}

#[test]
fn test_zero_weights_give_uniform_probabilities() {
    let config = small_config();
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let model = AudioOnly::load(&config, vb).unwrap();
    let x = Tensor::randn(0f32, 1.0, (1, 1, 33, 30), &Device::Cpu).unwrap();

    let preds = model.predict(&x, &[30], 2, None).unwrap();
    assert_eq!(preds.len(), 1);
    assert!(preds[0].logits.iter().all(|v| *v == 0.0));
    assert_close(&preds[0].probabilities, &[1.0 / 3.0; 3], 1e-6);
    assert_eq!(preds[0].top.len(), 2);
    assert_eq!(preds[0].top[0].class_index, 0);
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("audionet-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_load_model_dir_and_classify() {
    let config = small_config();
    let dir = scratch_dir("model-dir");

    let tensors = random_tensors(&config, 0.2, &Device::Cpu).unwrap();
    candle_core::safetensors::save(&tensors, dir.join("model.safetensors")).unwrap();
    std::fs::write(dir.join("config.json"), serde_json::to_string_pretty(&config).unwrap())
        .unwrap();
    std::fs::write(dir.join("labels.json"), r#"["speech", "music", "noise"]"#).unwrap();

    let mut model = AudioOnlyModel::load(&dir, &Device::Cpu).expect("model should load");
    assert_eq!(model.name(), "audio-only-tiny");
    assert_eq!(model.num_classes(), 3);
    assert_eq!(model.labels().map(|l| l.len()), Some(3));

    let info = model.model_info();
    assert_eq!(info.input_size, 33);
    assert!(info.parameters.unwrap_or(0) > 0);

    // 0.25 s of a 440 Hz tone.
    let samples: Vec<f32> = (0..4000)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin() * 0.3)
        .collect();
    let result = model
        .classify(&samples, &ClassifyOptions::default().with_top_k(2))
        .expect("classification should succeed");

    assert_eq!(result.logits.len(), 3);
    let total: f32 = result.probabilities.iter().sum();
    assert!((total - 1.0).abs() < 1e-5);
    assert_eq!(result.top.len(), 2);
    assert!(result.top[0].probability >= result.top[1].probability);
    assert!(result.best().and_then(|b| b.label.as_ref()).is_some());
    assert!((result.audio_duration_secs - 0.25).abs() < 1e-9);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_missing_config_is_error() {
    let dir = scratch_dir("no-config");
    let err = AudioOnlyModel::load(&dir, &Device::Cpu)
        .err()
        .expect("load must fail without config.json");
    assert!(matches!(err, AudioError::Config(_)));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_labels_count_must_match() {
    let config = small_config();
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let model = AudioOnlyModel::from_var_builder(config, vb, &Device::Cpu).unwrap();
    assert!(model.with_labels(vec!["only-one".to_string()]).is_err());
}
