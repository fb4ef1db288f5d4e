//! AudioStream: masked conv front-end followed by the recurrent encoder.

use audio_core::{AudioError, AudioResult};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use tracing::debug;

use crate::config::AudioStreamConfig;
use crate::conv::MaskConv;
use crate::rnn::{Rnn, RnnState};

/// Encoder output together with the per-item frame counts it was computed for.
#[derive(Debug, Clone)]
pub struct StreamOutput {
    /// `[batch, max(lengths), num_directions * hidden]`, zero past each item's length.
    pub features: Tensor,
    /// Valid encoder frames per item.
    pub lengths: Vec<usize>,
    pub state: RnnState,
}

/// Conv + RNN audio encoder.
///
/// Input is a spectrogram image `[batch, 1, input_size, time]`.
#[derive(Debug, Clone)]
pub struct AudioStream {
    config: AudioStreamConfig,
    conv: MaskConv,
    rnn: Rnn,
}

impl AudioStream {
    /// Load weights under `conv.seq_module.*` and `rnn.*`.
    pub fn load(config: &AudioStreamConfig, vb: VarBuilder) -> AudioResult<Self> {
        config.validate()?;
        let rnn_input = config.rnn_input_size()?;

        let conv = MaskConv::load(config, vb.pp("conv"))?;
        let rnn = Rnn::load(
            config.rnn_cell,
            rnn_input,
            config.hidden_size,
            config.n_layers,
            config.bidirectional,
            vb.pp("rnn"),
        )?;

        debug!(
            "AudioStream: {} conv блоков, rnn_input={}, выход={}",
            config.conv_layers.len(),
            rnn_input,
            config.encoder_output_size()
        );

        Ok(Self {
            config: config.clone(),
            conv,
            rnn,
        })
    }

    pub fn config(&self) -> &AudioStreamConfig {
        &self.config
    }

    /// Encoder frame count for each input frame count.
    pub fn get_seq_lens(&self, input_lengths: &[usize]) -> AudioResult<Vec<usize>> {
        self.config.output_lengths(input_lengths)
    }

    /// Forward pass returning the encoder frames and the final recurrent state.
    ///
    /// * `input`: `[batch, 1, input_size, time]`
    /// * `input_lengths`: valid frames per item, without zero padding
    pub fn forward(&self, input: &Tensor, input_lengths: &[usize]) -> AudioResult<(Tensor, RnnState)> {
        let out = self.forward_with_lengths(input, input_lengths)?;
        Ok((out.features, out.state))
    }

    /// Same as [`Self::forward`], also returning the encoder frame counts.
    pub fn forward_with_lengths(
        &self,
        input: &Tensor,
        input_lengths: &[usize],
    ) -> AudioResult<StreamOutput> {
        let debug = audio_core::debug::enabled();
        self.check_input(input, input_lengths)?;
        let output_lengths = self.get_seq_lens(input_lengths)?;

        let (x, _) = self.conv.forward(input, &output_lengths)?; // [B, C, D', T']
        let (b, c, d, t) = x.dims4()?;
        if debug {
            eprintln!(
                "DEBUG audio_stream: conv out {:?}, lengths {:?} -> {:?}",
                x.dims(),
                input_lengths,
                output_lengths
            );
        }

        // [B, C, D', T'] -> [B, C*D', T'] -> [T', B, C*D']
        let x = x
            .reshape((b, c * d, t))?
            .transpose(1, 2)?
            .transpose(0, 1)?
            .contiguous()?;

        let (x, state) = self.rnn.forward(&x, &output_lengths)?;
        let features = x.transpose(0, 1)?.contiguous()?; // [B, T'', D*H]
        if debug {
            eprintln!("DEBUG audio_stream: rnn out {:?}", features.dims());
        }

        Ok(StreamOutput {
            features,
            lengths: output_lengths,
            state,
        })
    }

    fn check_input(&self, input: &Tensor, lengths: &[usize]) -> AudioResult<()> {
        let (b, c, d, t) = input.dims4().map_err(|_| {
            AudioError::InvalidInput(format!(
                "expected [batch, 1, freq, time], got {:?}",
                input.dims()
            ))
        })?;
        if c != 1 {
            return Err(AudioError::InvalidInput(format!(
                "expected a single input channel, got {c}"
            )));
        }
        if d != self.config.input_size {
            return Err(AudioError::InvalidInput(format!(
                "expected {} frequency bins, got {d}",
                self.config.input_size
            )));
        }
        if lengths.len() != b {
            return Err(AudioError::InvalidInput(format!(
                "{} lengths for a batch of {b}",
                lengths.len()
            )));
        }
        if let Some(&bad) = lengths.iter().find(|&&len| len == 0 || len > t) {
            return Err(AudioError::InvalidInput(format!(
                "length {bad} outside 1..={t}"
            )));
        }
        Ok(())
    }
}
