//! Manifest of the tensors an [`AudioOnly`](crate::AudioOnly) checkpoint must provide.
//!
//! Used to count parameters, to print the weight table in the CLI and to build
//! in-memory checkpoints.

use std::collections::HashMap;

use audio_core::AudioResult;
use candle_core::{DType, Device, Tensor};

use crate::config::AudioOnlyConfig;
use crate::conv::conv_block_parameters;
use crate::rnn::rnn_parameters;

/// One named tensor of the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    /// `false` for batch-norm running statistics.
    pub trainable: bool,
}

impl TensorSpec {
    fn new(name: String, shape: Vec<usize>, trainable: bool) -> Self {
        Self {
            name,
            shape,
            trainable,
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// All tensors in load order.
pub fn expected_tensors(config: &AudioOnlyConfig) -> AudioResult<Vec<TensorSpec>> {
    let stream = &config.stream;
    let mut out = Vec::new();

    for (i, conv) in stream.conv_layers.iter().enumerate() {
        let conv_prefix = format!("audio_stream.conv.seq_module.{}", i * 3);
        let bn_prefix = format!("audio_stream.conv.seq_module.{}", i * 3 + 1);
        let (kh, kw) = conv.kernel_size;
        let c = conv.out_channels;

        out.push(TensorSpec::new(
            format!("{conv_prefix}.weight"),
            vec![c, conv.in_channels, kh, kw],
            true,
        ));
        out.push(TensorSpec::new(format!("{conv_prefix}.bias"), vec![c], true));
        out.push(TensorSpec::new(format!("{bn_prefix}.weight"), vec![c], true));
        out.push(TensorSpec::new(format!("{bn_prefix}.bias"), vec![c], true));
        out.push(TensorSpec::new(format!("{bn_prefix}.running_mean"), vec![c], false));
        out.push(TensorSpec::new(format!("{bn_prefix}.running_var"), vec![c], false));
    }

    let gates = stream.rnn_cell.num_gates() * stream.hidden_size;
    let rnn_input = stream.rnn_input_size()?;
    for k in 0..stream.n_layers {
        let input = if k == 0 {
            rnn_input
        } else {
            stream.encoder_output_size()
        };
        let suffixes: &[&str] = if stream.bidirectional {
            &["", "_reverse"]
        } else {
            &[""]
        };
        for s in suffixes {
            let p = "audio_stream.rnn";
            out.push(TensorSpec::new(format!("{p}.weight_ih_l{k}{s}"), vec![gates, input], true));
            out.push(TensorSpec::new(
                format!("{p}.weight_hh_l{k}{s}"),
                vec![gates, stream.hidden_size],
                true,
            ));
            out.push(TensorSpec::new(format!("{p}.bias_ih_l{k}{s}"), vec![gates], true));
            out.push(TensorSpec::new(format!("{p}.bias_hh_l{k}{s}"), vec![gates], true));
        }
    }

    out.push(TensorSpec::new(
        "fc.weight".to_string(),
        vec![config.num_classes, config.classifier_input_size()],
        true,
    ));
    out.push(TensorSpec::new("fc.bias".to_string(), vec![config.num_classes], true));

    Ok(out)
}

/// Trainable parameter count.
pub fn parameter_count(config: &AudioOnlyConfig) -> AudioResult<u64> {
    let stream = &config.stream;
    let conv: u64 = stream.conv_layers.iter().map(conv_block_parameters).sum();
    let rnn = rnn_parameters(
        stream.rnn_cell,
        stream.rnn_input_size()?,
        stream.hidden_size,
        stream.n_layers,
        stream.bidirectional,
    );
    let fc = (config.classifier_input_size() * config.num_classes + config.num_classes) as u64;
    Ok(conv + rnn + fc)
}

/// Random checkpoint (normal, σ = `stdev`) with unit running variance.
///
/// Handy for smoke tests and shape checks without real weights.
pub fn random_tensors(
    config: &AudioOnlyConfig,
    stdev: f32,
    device: &Device,
) -> AudioResult<HashMap<String, Tensor>> {
    let mut map = HashMap::new();
    for spec in expected_tensors(config)? {
        let t = if spec.name.ends_with("running_var") {
            Tensor::ones(spec.shape.as_slice(), DType::F32, device)?
        } else if spec.name.ends_with("running_mean") {
            Tensor::zeros(spec.shape.as_slice(), DType::F32, device)?
        } else {
            Tensor::randn(0f32, stdev, spec.shape.as_slice(), device)?
        };
        map.insert(spec.name, t);
    }
    Ok(map)
}
