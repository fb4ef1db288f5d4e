//! AudioOnly: statistics pooling over the encoder frames plus a linear head.

use audio_core::{AudioError, AudioResult, ClassScore};
use candle_core::{D, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};

use crate::config::{AudioOnlyConfig, StatPooling};
use crate::stream::AudioStream;

/// Classification of one batch item.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub logits: Vec<f32>,
    pub probabilities: Vec<f32>,
    pub top: Vec<ClassScore>,
}

/// Audio encoder + `Linear(2 * D * H, num_classes)` over `[mean ++ var]`.
#[derive(Debug, Clone)]
pub struct AudioOnly {
    audio_stream: AudioStream,
    fc: Linear,
    pooling: StatPooling,
    num_classes: usize,
}

impl AudioOnly {
    /// Load weights under `audio_stream.*` and `fc.*`.
    pub fn load(config: &AudioOnlyConfig, vb: VarBuilder) -> AudioResult<Self> {
        let audio_stream = AudioStream::load(&config.stream, vb.pp("audio_stream"))?;
        let fc = linear(
            config.classifier_input_size(),
            config.num_classes,
            vb.pp("fc"),
        )?;
        Ok(Self {
            audio_stream,
            fc,
            pooling: config.pooling,
            num_classes: config.num_classes,
        })
    }

    pub fn audio_stream(&self) -> &AudioStream {
        &self.audio_stream
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn pooling(&self) -> StatPooling {
        self.pooling
    }

    /// Logits `[batch, num_classes]`.
    ///
    /// * `audio_features`: `[batch, 1, input_size, time]`
    /// * `audio_lens`: valid frames per item
    pub fn forward(&self, audio_features: &Tensor, audio_lens: &[usize]) -> AudioResult<Tensor> {
        let out = self
            .audio_stream
            .forward_with_lengths(audio_features, audio_lens)?;
        let stat_pool = self.stat_pool(&out.features, &out.lengths)?;
        Ok(self.fc.forward(&stat_pool)?)
    }

    /// Softmax probabilities and the `top_k` classes for every batch item.
    pub fn predict(
        &self,
        audio_features: &Tensor,
        audio_lens: &[usize],
        top_k: usize,
        labels: Option<&[String]>,
    ) -> AudioResult<Vec<Prediction>> {
        let logits = self.forward(audio_features, audio_lens)?;
        let probs = candle_nn::ops::softmax_last_dim(&logits)?;

        let logits = logits.to_dtype(candle_core::DType::F32)?.to_vec2::<f32>()?;
        let probs = probs.to_dtype(candle_core::DType::F32)?.to_vec2::<f32>()?;

        Ok(logits
            .into_iter()
            .zip(probs)
            .map(|(logits, probabilities)| {
                let top = ClassScore::top_k(&probabilities, top_k, labels);
                Prediction {
                    logits,
                    probabilities,
                    top,
                }
            })
            .collect())
    }

    /// `[batch, time, F] -> [batch, 2F]` as `cat(mean, unbiased var)` over time.
    fn stat_pool(&self, feats: &Tensor, lengths: &[usize]) -> AudioResult<Tensor> {
        match self.pooling {
            StatPooling::Padded => {
                let frames = feats.dim(1)?;
                mean_var(feats, frames)
            }
            StatPooling::Masked => {
                let pooled = lengths
                    .iter()
                    .enumerate()
                    .map(|(b, &len)| mean_var(&feats.narrow(0, b, 1)?.narrow(1, 0, len)?, len))
                    .collect::<AudioResult<Vec<_>>>()?;
                Ok(Tensor::cat(&pooled, 0)?)
            }
        }
    }
}

/// Mean and unbiased variance over dim 1 of `[batch, frames, F]`.
fn mean_var(x: &Tensor, frames: usize) -> AudioResult<Tensor> {
    if frames < 2 {
        return Err(AudioError::InvalidInput(format!(
            "variance pooling needs at least 2 encoder frames, got {frames}"
        )));
    }
    let mu = x.mean_keepdim(1)?;
    let var = (x.broadcast_sub(&mu)?.sqr()?.sum(1)? / (frames - 1) as f64)?;
    Ok(Tensor::cat(&[&mu.squeeze(1)?, &var], D::Minus1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_mean_var_unbiased() {
        let x = Tensor::new(&[[[1f32, 0.], [3., 0.], [5., 0.]]], &Device::Cpu).unwrap();
        let pooled = mean_var(&x, 3).unwrap().to_vec2::<f32>().unwrap();
        // mean(1,3,5)=3, var=(4+0+4)/2=4
        assert_eq!(pooled, vec![vec![3.0, 0.0, 4.0, 0.0]]);
    }

    #[test]
    fn test_mean_var_single_frame_is_error() {
        let x = Tensor::zeros((1, 1, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(mean_var(&x, 1), Err(AudioError::InvalidInput(_))));
    }
}
