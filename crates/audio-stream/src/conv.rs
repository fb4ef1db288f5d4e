//! Masked convolutional front-end.
//!
//! The front-end is a sequence of `Conv2d -> BatchNorm2d -> Hardtanh` blocks over a
//! `[batch, channels, freq, time]` spectrogram image. After every sub-module the time
//! steps beyond each utterance's length are zeroed, so padding never leaks into the
//! valid region of the next layer.
//!
//! Weight keys follow the PyTorch module tree:
//! - `seq_module.{3i}.weight` / `.bias`: Conv2d `[out, in, kh, kw]`
//! - `seq_module.{3i+1}.{weight,bias,running_mean,running_var}`: BatchNorm2d

use candle_core::{Device, Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::{AudioStreamConfig, ConvLayerConfig};

/// Conv2d with independent `(freq, time)` kernel, stride and padding.
#[derive(Debug, Clone)]
pub struct MaskedConv2d {
    weight: Tensor,
    bias: Option<Tensor>,
    stride: (usize, usize),
    padding: (usize, usize),
    dilation: usize,
}

impl MaskedConv2d {
    pub fn load(cfg: &ConvLayerConfig, vb: VarBuilder) -> Result<Self> {
        let (kh, kw) = cfg.kernel_size;
        let weight = vb.get((cfg.out_channels, cfg.in_channels, kh, kw), "weight")?;
        let bias = if vb.contains_tensor("bias") {
            Some(vb.get(cfg.out_channels, "bias")?)
        } else {
            None
        };
        Ok(Self {
            weight,
            bias,
            stride: cfg.stride,
            padding: cfg.padding,
            dilation: cfg.dilation.0,
        })
    }
}

impl Module for MaskedConv2d {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (ph, pw) = self.padding;
        let x = x.pad_with_zeros(2, ph, ph)?.pad_with_zeros(3, pw, pw)?;

        let (sh, sw) = self.stride;
        let y = if sh == sw {
            x.conv2d(&self.weight, 0, sh, self.dilation, 1)?
        } else {
            // candle only takes one stride for both axes: run dense, then subsample.
            let y = x.conv2d(&self.weight, 0, 1, self.dilation, 1)?;
            let y = subsample(&y, 2, sh)?;
            subsample(&y, 3, sw)?
        };

        match &self.bias {
            Some(b) => y.broadcast_add(&b.reshape((1, (), 1, 1))?),
            None => Ok(y),
        }
    }
}

/// Keep every `step`-th element along `dim`, starting from 0.
fn subsample(x: &Tensor, dim: usize, step: usize) -> Result<Tensor> {
    if step == 1 {
        return Ok(x.clone());
    }
    let n = x.dim(dim)?;
    let idx: Vec<u32> = (0..n).step_by(step).map(|i| i as u32).collect();
    let idx = Tensor::new(idx.as_slice(), x.device())?;
    x.index_select(&idx, dim)
}

/// BatchNorm2d in inference mode (running statistics).
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    weight: Tensor,
    bias: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
    eps: f64,
}

impl BatchNorm2d {
    pub fn load(channels: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get(channels, "weight")?,
            bias: vb.get(channels, "bias")?,
            running_mean: vb.get(channels, "running_mean")?,
            running_var: vb.get(channels, "running_var")?,
            eps,
        })
    }
}

impl Module for BatchNorm2d {
    /// x: `[batch, channels, freq, time]`.
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let shape = (1, (), 1, 1);
        let mean = self.running_mean.reshape(shape)?;
        let std = (self.running_var.reshape(shape)? + self.eps)?.sqrt()?;
        let w = self.weight.reshape(shape)?;
        let b = self.bias.reshape(shape)?;

        x.broadcast_sub(&mean)?
            .broadcast_div(&std)?
            .broadcast_mul(&w)?
            .broadcast_add(&b)
    }
}

/// Hardtanh: clamp to `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct Hardtanh {
    min: f64,
    max: f64,
}

impl Hardtanh {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Module for Hardtanh {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.clamp(self.min, self.max)
    }
}

/// One entry of the masked sequential container.
#[derive(Debug, Clone)]
pub enum SeqModule {
    Conv(MaskedConv2d),
    BatchNorm(BatchNorm2d),
    Hardtanh(Hardtanh),
}

impl Module for SeqModule {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            SeqModule::Conv(m) => m.forward(x),
            SeqModule::BatchNorm(m) => m.forward(x),
            SeqModule::Hardtanh(m) => m.forward(x),
        }
    }
}

/// `[batch, time]` u8 mask, 1 where `t < lengths[b]`.
pub fn time_mask(lengths: &[usize], time: usize, device: &Device) -> Result<Tensor> {
    let data: Vec<u8> = lengths
        .iter()
        .flat_map(|&len| (0..time).map(move |t| u8::from(t < len)))
        .collect();
    Tensor::from_vec(data, (lengths.len(), time), device)
}

/// Sequential container that zeroes padded time steps after every sub-module.
#[derive(Debug, Clone)]
pub struct MaskConv {
    modules: Vec<SeqModule>,
}

impl MaskConv {
    /// Build the `Conv2d -> BatchNorm2d -> Hardtanh` stack described by `config`.
    pub fn load(config: &AudioStreamConfig, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("seq_module");
        let (lo, hi) = config.hardtanh;
        let mut modules = Vec::with_capacity(config.conv_layers.len() * 3);

        for (i, conv) in config.conv_layers.iter().enumerate() {
            let base = i * 3;
            modules.push(SeqModule::Conv(MaskedConv2d::load(
                conv,
                vb.pp(base.to_string()),
            )?));
            modules.push(SeqModule::BatchNorm(BatchNorm2d::load(
                conv.out_channels,
                config.batch_norm_eps,
                vb.pp((base + 1).to_string()),
            )?));
            modules.push(SeqModule::Hardtanh(Hardtanh::new(lo, hi)));
        }

        Ok(Self { modules })
    }

    pub fn from_modules(modules: Vec<SeqModule>) -> Self {
        Self { modules }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Forward pass.
    ///
    /// * `x`: `[batch, channels, freq, time]`
    /// * `lengths`: valid time steps per item, already at the output time resolution
    ///
    /// Returns the masked output and the unchanged lengths.
    pub fn forward(&self, x: &Tensor, lengths: &[usize]) -> Result<(Tensor, Vec<usize>)> {
        let batch = x.dim(0)?;
        if lengths.len() != batch {
            candle_core::bail!(
                "MaskConv: {} lengths for a batch of {}",
                lengths.len(),
                batch
            );
        }

        let mut x = x.clone();
        for module in &self.modules {
            x = module.forward(&x)?;
            x = apply_time_mask(&x, lengths)?;
        }
        Ok((x, lengths.to_vec()))
    }
}

/// Zero every `x[b, :, :, t]` with `t >= lengths[b]`.
fn apply_time_mask(x: &Tensor, lengths: &[usize]) -> Result<Tensor> {
    let (b, c, h, t) = x.dims4()?;
    if lengths.iter().all(|&len| len >= t) {
        return Ok(x.clone());
    }
    let mask = time_mask(lengths, t, x.device())?
        .reshape((b, 1, 1, t))?
        .broadcast_as((b, c, h, t))?;
    let zeros = Tensor::zeros((b, c, h, t), x.dtype(), x.device())?;
    mask.where_cond(x, &zeros)
}

/// Count trainable parameters of one conv block (conv + batch norm affine).
pub(crate) fn conv_block_parameters(conv: &ConvLayerConfig) -> u64 {
    let (kh, kw) = conv.kernel_size;
    let out = conv.out_channels as u64;
    out * conv.in_channels as u64 * kh as u64 * kw as u64 + out + 2 * out
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use std::collections::HashMap;

    fn conv_cfg(stride: (usize, usize), padding: (usize, usize)) -> ConvLayerConfig {
        ConvLayerConfig {
            in_channels: 1,
            out_channels: 1,
            kernel_size: (3, 3),
            stride,
            padding,
            dilation: (1, 1),
        }
    }

    fn ones_conv(cfg: &ConvLayerConfig) -> MaskedConv2d {
        let dev = Device::Cpu;
        let mut ts = HashMap::new();
        ts.insert(
            "weight".to_string(),
            Tensor::ones((1, 1, 3, 3), DType::F32, &dev).unwrap(),
        );
        ts.insert("bias".to_string(), Tensor::zeros(1, DType::F32, &dev).unwrap());
        let vb = VarBuilder::from_tensors(ts, DType::F32, &dev);
        MaskedConv2d::load(cfg, vb).unwrap()
    }

    #[test]
    fn test_asymmetric_stride_shape() {
        let cfg = conv_cfg((2, 1), (1, 1));
        let conv = ones_conv(&cfg);
        let x = Tensor::ones((1, 1, 9, 7), DType::F32, &Device::Cpu).unwrap();
        let y = conv.forward(&x).unwrap();
        let expect_h = cfg.output_len(9, crate::config::Axis::Freq) as usize;
        let expect_w = cfg.output_len(7, crate::config::Axis::Time) as usize;
        assert_eq!(y.dims(), &[1, 1, expect_h, expect_w]);
        assert_eq!((expect_h, expect_w), (5, 7));
    }

    #[test]
    fn test_asymmetric_stride_values() {
        // Box filter of ones: corner sees 4 ones, interior 9.
        let cfg = conv_cfg((2, 1), (1, 1));
        let conv = ones_conv(&cfg);
        let x = Tensor::ones((1, 1, 5, 3), DType::F32, &Device::Cpu).unwrap();
        let y = conv.forward(&x).unwrap().squeeze(0).unwrap().squeeze(0).unwrap();
        let y = y.to_vec2::<f32>().unwrap();
        // rows 0, 2, 4 of the dense output
        assert_eq!(y, vec![vec![4., 6., 4.], vec![6., 9., 6.], vec![4., 6., 4.]]);
    }

    #[test]
    fn test_batch_norm_inference() {
        let dev = Device::Cpu;
        let mut ts = HashMap::new();
        ts.insert("weight".into(), Tensor::new(&[2f32], &dev).unwrap());
        ts.insert("bias".into(), Tensor::new(&[1f32], &dev).unwrap());
        ts.insert("running_mean".into(), Tensor::new(&[3f32], &dev).unwrap());
        ts.insert("running_var".into(), Tensor::new(&[4f32], &dev).unwrap());
        let vb = VarBuilder::from_tensors(ts, DType::F32, &dev);
        let bn = BatchNorm2d::load(1, 0.0, vb).unwrap();
        let x = Tensor::new(&[[[[5f32, 3.]]]], &dev).unwrap();
        let y = bn.forward(&x).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // (5-3)/2*2+1 = 3, (3-3)/2*2+1 = 1
        assert_eq!(y, vec![3.0, 1.0]);
    }

    #[test]
    fn test_hardtanh() {
        let x = Tensor::new(&[-3f32, 0.5, 25.0], &Device::Cpu).unwrap();
        let y = Hardtanh::new(0.0, 20.0).forward(&x).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(y, vec![0.0, 0.5, 20.0]);
    }

    #[test]
    fn test_time_mask() {
        let m = time_mask(&[2, 4], 3, &Device::Cpu).unwrap().to_vec2::<u8>().unwrap();
        assert_eq!(m, vec![vec![1, 1, 0], vec![1, 1, 1]]);
    }

    #[test]
    fn test_mask_conv_zeroes_padding_after_every_module() {
        // Hardtanh(5, 20) turns zeros into fives, so only the mask can zero the tail.
        let mc = MaskConv::from_modules(vec![SeqModule::Hardtanh(Hardtanh::new(5.0, 20.0))]);
        let x = Tensor::zeros((2, 1, 2, 4), DType::F32, &Device::Cpu).unwrap();
        let (y, lens) = mc.forward(&x, &[1, 4]).unwrap();
        assert_eq!(lens, vec![1, 4]);
        let first = y.get(0).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(first, vec![5., 0., 0., 0., 5., 0., 0., 0.]);
        let second = y.get(1).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(second.iter().all(|v| *v == 5.0));
    }

    #[test]
    fn test_mask_conv_rejects_length_mismatch() {
        let mc = MaskConv::from_modules(vec![SeqModule::Hardtanh(Hardtanh::new(0.0, 20.0))]);
        let x = Tensor::zeros((2, 1, 2, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(mc.forward(&x, &[1]).is_err());
    }
}
