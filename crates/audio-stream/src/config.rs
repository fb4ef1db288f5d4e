//! Configuration for the audio stream encoder and the classifier head.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use audio_core::{AudioError, AudioResult, SpectrogramConfig};
use serde::{Deserialize, Serialize};

/// Axis of a `[batch, channels, freq, time]` feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Frequency (height) axis.
    Freq,
    /// Time (width) axis.
    Time,
}

/// Recurrent cell used by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RnnCellType {
    /// Gated recurrent unit (3 gates: r, z, n).
    #[default]
    Gru,
    /// Long short-term memory (4 gates: i, f, g, o).
    Lstm,
}

impl RnnCellType {
    /// Number of stacked gate blocks in the weight matrices.
    pub fn num_gates(self) -> usize {
        match self {
            RnnCellType::Gru => 3,
            RnnCellType::Lstm => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RnnCellType::Gru => "gru",
            RnnCellType::Lstm => "lstm",
        }
    }
}

impl FromStr for RnnCellType {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gru" => Ok(RnnCellType::Gru),
            "lstm" => Ok(RnnCellType::Lstm),
            _ => Err(AudioError::Config(format!("Unsupported RNN Cell: {s}"))),
        }
    }
}

impl TryFrom<String> for RnnCellType {
    type Error = AudioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RnnCellType> for String {
    fn from(value: RnnCellType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RnnCellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the classifier pools encoder frames into utterance statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatPooling {
    /// Mean/variance over all `max(lengths)` frames, zero padding included.
    #[default]
    Padded,
    /// Mean/variance over each item's valid frames only.
    Masked,
}

/// One Conv2d layer of the front-end. Pairs are `(freq, time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvLayerConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    #[serde(default = "unit_dilation")]
    pub dilation: (usize, usize),
}

fn unit_dilation() -> (usize, usize) {
    (1, 1)
}

impl ConvLayerConfig {
    fn pick(pair: (usize, usize), axis: Axis) -> usize {
        match axis {
            Axis::Freq => pair.0,
            Axis::Time => pair.1,
        }
    }

    /// Output length along `axis` for an input of length `len`.
    ///
    /// `(len + 2*pad - dil*(kernel-1) - 1) / stride + 1`, evaluated as a true
    /// division and truncated toward zero. May return zero or a negative value
    /// when the input is shorter than the receptive field.
    pub fn output_len(&self, len: i64, axis: Axis) -> i64 {
        let kernel = Self::pick(self.kernel_size, axis) as i64;
        let stride = Self::pick(self.stride, axis) as f64;
        let pad = Self::pick(self.padding, axis) as i64;
        let dil = Self::pick(self.dilation, axis) as i64;
        let numerator = len + 2 * pad - dil * (kernel - 1) - 1;
        (numerator as f64 / stride + 1.0).trunc() as i64
    }
}

/// Two-layer DeepSpeech-style front-end with `channels` feature maps.
pub fn default_conv_layers(channels: usize) -> Vec<ConvLayerConfig> {
    vec![
        ConvLayerConfig {
            in_channels: 1,
            out_channels: channels,
            kernel_size: (41, 11),
            stride: (2, 2),
            padding: (20, 5),
            dilation: (1, 1),
        },
        ConvLayerConfig {
            in_channels: channels,
            out_channels: channels,
            kernel_size: (21, 11),
            stride: (2, 1),
            padding: (10, 5),
            dilation: (1, 1),
        },
    ]
}

/// Configuration of the conv + recurrent audio encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStreamConfig {
    /// Number of frequency bins of the input spectrogram.
    pub input_size: usize,

    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    #[serde(default = "default_n_layers")]
    pub n_layers: usize,

    #[serde(default = "default_true")]
    pub bidirectional: bool,

    #[serde(default)]
    pub rnn_cell: RnnCellType,

    /// Inter-layer dropout; kept for checkpoint compatibility, inactive at inference.
    #[serde(default = "default_dropout")]
    pub dropout: f32,

    #[serde(default = "default_conv_stack")]
    pub conv_layers: Vec<ConvLayerConfig>,

    /// Hardtanh bounds applied after every batch norm.
    #[serde(default = "default_hardtanh")]
    pub hardtanh: (f64, f64),

    #[serde(default = "default_bn_eps")]
    pub batch_norm_eps: f64,
}

fn default_hidden_size() -> usize {
    128
}
fn default_n_layers() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_dropout() -> f32 {
    0.5
}
fn default_conv_stack() -> Vec<ConvLayerConfig> {
    default_conv_layers(64)
}
fn default_hardtanh() -> (f64, f64) {
    (0.0, 20.0)
}
fn default_bn_eps() -> f64 {
    1e-5
}

impl AudioStreamConfig {
    /// Default encoder for `input_size` frequency bins.
    pub fn new(input_size: usize) -> Self {
        Self {
            input_size,
            hidden_size: default_hidden_size(),
            n_layers: default_n_layers(),
            bidirectional: true,
            rnn_cell: RnnCellType::Gru,
            dropout: default_dropout(),
            conv_layers: default_conv_stack(),
            hardtanh: default_hardtanh(),
            batch_norm_eps: default_bn_eps(),
        }
    }

    pub fn num_directions(&self) -> usize {
        if self.bidirectional { 2 } else { 1 }
    }

    /// Width of each encoder output frame.
    pub fn encoder_output_size(&self) -> usize {
        self.num_directions() * self.hidden_size
    }

    /// Channels of the last conv layer.
    pub fn conv_channels(&self) -> usize {
        self.conv_layers.last().map(|c| c.out_channels).unwrap_or(1)
    }

    /// Frequency bins left after the conv stack.
    pub fn conv_output_freq(&self) -> AudioResult<usize> {
        let mut dim = self.input_size as i64;
        for (i, conv) in self.conv_layers.iter().enumerate() {
            dim = conv.output_len(dim, Axis::Freq);
            if dim <= 0 {
                return Err(AudioError::Config(format!(
                    "input_size={} collapses to {} frequency bins after conv layer {}",
                    self.input_size, dim, i
                )));
            }
        }
        Ok(dim as usize)
    }

    /// Feature width fed to the recurrent encoder (`channels * freq`).
    pub fn rnn_input_size(&self) -> AudioResult<usize> {
        Ok(self.conv_output_freq()? * self.conv_channels())
    }

    /// Convert input frame counts to encoder frame counts.
    pub fn output_lengths(&self, lengths: &[usize]) -> AudioResult<Vec<usize>> {
        lengths
            .iter()
            .map(|&len| {
                let mut out = len as i64;
                for conv in &self.conv_layers {
                    out = conv.output_len(out, Axis::Time);
                }
                if out <= 0 {
                    Err(AudioError::InvalidInput(format!(
                        "sequence of {len} frames is too short for the conv front-end"
                    )))
                } else {
                    Ok(out as usize)
                }
            })
            .collect()
    }

    /// Check structural consistency of the encoder.
    pub fn validate(&self) -> AudioResult<()> {
        if self.hidden_size == 0 || self.n_layers == 0 {
            return Err(AudioError::Config(
                "hidden_size and n_layers must be positive".to_string(),
            ));
        }
        if self.hardtanh.0 > self.hardtanh.1 {
            return Err(AudioError::Config(format!(
                "hardtanh min {} exceeds max {}",
                self.hardtanh.0, self.hardtanh.1
            )));
        }
        let mut channels = 1;
        for (i, conv) in self.conv_layers.iter().enumerate() {
            if conv.in_channels != channels {
                return Err(AudioError::Config(format!(
                    "conv layer {i} expects {} input channels, previous layer yields {channels}",
                    conv.in_channels
                )));
            }
            let (kh, kw) = conv.kernel_size;
            let (sh, sw) = conv.stride;
            if kh == 0 || kw == 0 || sh == 0 || sw == 0 || conv.out_channels == 0 {
                return Err(AudioError::Config(format!(
                    "conv layer {i}: kernel, stride and channels must be positive"
                )));
            }
            if conv.dilation.0 != conv.dilation.1 || conv.dilation.0 == 0 {
                return Err(AudioError::Config(format!(
                    "conv layer {i}: only equal, positive dilation is supported"
                )));
            }
            channels = conv.out_channels;
        }
        self.rnn_input_size().map(|_| ())
    }
}

/// Full classifier configuration (`config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioOnlyConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,

    pub num_classes: usize,

    pub stream: AudioStreamConfig,

    #[serde(default)]
    pub spectrogram: SpectrogramConfig,

    #[serde(default)]
    pub pooling: StatPooling,
}

fn default_model_name() -> String {
    "audio-only".to_string()
}

impl AudioOnlyConfig {
    /// Default architecture for `input_size` bins and `num_classes` outputs.
    pub fn new(input_size: usize, num_classes: usize) -> Self {
        Self {
            model_name: default_model_name(),
            num_classes,
            stream: AudioStreamConfig::new(input_size),
            spectrogram: SpectrogramConfig::default(),
            pooling: StatPooling::Padded,
        }
    }

    /// Width of the pooled statistics vector (`mean ++ var`).
    pub fn classifier_input_size(&self) -> usize {
        2 * self.stream.encoder_output_size()
    }

    /// Load and validate `config.json`.
    pub fn from_file(path: impl AsRef<Path>) -> AudioResult<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AudioResult<()> {
        if self.num_classes == 0 {
            return Err(AudioError::Config("num_classes must be positive".to_string()));
        }
        self.stream.validate()?;
        if self.spectrogram.num_bins() != self.stream.input_size {
            return Err(AudioError::Config(format!(
                "spectrogram yields {} bins but the encoder expects input_size={}",
                self.spectrogram.num_bins(),
                self.stream.input_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rnn_input_size_default() {
        let config = AudioStreamConfig::new(161);
        assert_eq!(config.conv_output_freq().unwrap(), 41);
        assert_eq!(config.rnn_input_size().unwrap(), 41 * 64);
    }

    #[test]
    fn test_output_lengths() {
        let config = AudioStreamConfig::new(161);
        let lens = config.output_lengths(&[100, 101, 1, 7]).unwrap();
        assert_eq!(lens, vec![50, 51, 1, 4]);
    }

    #[test]
    fn test_output_len_truncates_toward_zero() {
        let conv = ConvLayerConfig {
            in_channels: 1,
            out_channels: 1,
            kernel_size: (5, 5),
            stride: (2, 2),
            padding: (0, 0),
            dilation: (1, 1),
        };
        // (2 - 4 - 1) / 2 + 1 = -0.5 -> 0
        assert_eq!(conv.output_len(2, Axis::Time), 0);
        // (4 - 4 - 1) / 2 + 1 = 0.5 -> 0
        assert_eq!(conv.output_len(4, Axis::Time), 0);
        assert_eq!(conv.output_len(5, Axis::Time), 1);
    }

    #[test]
    fn test_too_short_sequence_is_error() {
        let mut config = AudioStreamConfig::new(161);
        config.conv_layers[0].padding = (20, 0);
        assert!(matches!(
            config.output_lengths(&[3]),
            Err(AudioError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rnn_cell_parsing() {
        assert_eq!("GRU".parse::<RnnCellType>().unwrap(), RnnCellType::Gru);
        assert_eq!("lstm".parse::<RnnCellType>().unwrap(), RnnCellType::Lstm);
        let err = "rnn_tanh".parse::<RnnCellType>().unwrap_err();
        assert!(err.to_string().contains("Unsupported RNN Cell: rnn_tanh"));
    }

    #[test]
    fn test_classifier_input_size() {
        let config = AudioOnlyConfig::new(161, 4);
        assert_eq!(config.classifier_input_size(), 512);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_channel_chain() {
        let mut config = AudioStreamConfig::new(161);
        config.conv_layers[1].in_channels = 32;
        assert!(matches!(config.validate(), Err(AudioError::Config(_))));
    }

    #[test]
    fn test_validate_spectrogram_mismatch() {
        let config = AudioOnlyConfig::new(128, 4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let json = r#"{"num_classes": 7, "stream": {"input_size": 161, "rnn_cell": "LSTM"}}"#;
        let config: AudioOnlyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model_name, "audio-only");
        assert_eq!(config.stream.rnn_cell, RnnCellType::Lstm);
        assert_eq!(config.stream.hidden_size, 128);
        assert_eq!(config.stream.conv_layers.len(), 2);
        assert_eq!(config.pooling, StatPooling::Padded);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_json_bad_cell() {
        let json = r#"{"num_classes": 7, "stream": {"input_size": 161, "rnn_cell": "transformer"}}"#;
        assert!(serde_json::from_str::<AudioOnlyConfig>(json).is_err());
    }
}
