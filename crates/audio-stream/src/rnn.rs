//! Multi-layer, optionally bidirectional GRU / LSTM over padded batches.
//!
//! Semantics match a packed-sequence recurrent layer:
//! - the forward direction of item `b` consumes steps `0..len[b]`;
//! - the reverse direction consumes `len[b]-1 ..= 0`, starting from a zero state;
//! - outputs at `t >= len[b]` are zero and the output is `max(len)` steps long;
//! - the final state is the state after the last valid step of each direction.
//!
//! Padding is handled by masked state updates instead of physically packing the
//! batch, so every time step is a single batched matmul.
//!
//! Weight keys (per layer `k`, reverse direction suffixed with `_reverse`):
//! - `weight_ih_l{k}`: `[gates*hidden, input]`
//! - `weight_hh_l{k}`: `[gates*hidden, hidden]`
//! - `bias_ih_l{k}`, `bias_hh_l{k}`: `[gates*hidden]`

use candle_core::{D, Result, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::sigmoid;
use tracing::debug;

use crate::config::RnnCellType;

/// Final recurrent state, `[num_layers * num_directions, batch, hidden]`.
#[derive(Debug, Clone)]
pub enum RnnState {
    Gru { h_n: Tensor },
    Lstm { h_n: Tensor, c_n: Tensor },
}

impl RnnState {
    /// Final hidden state.
    pub fn h_n(&self) -> &Tensor {
        match self {
            RnnState::Gru { h_n } | RnnState::Lstm { h_n, .. } => h_n,
        }
    }

    /// Final cell state (LSTM only).
    pub fn c_n(&self) -> Option<&Tensor> {
        match self {
            RnnState::Gru { .. } => None,
            RnnState::Lstm { c_n, .. } => Some(c_n),
        }
    }
}

/// Weights of one direction of one layer, stored pre-transposed for `x @ W^T`.
#[derive(Debug, Clone)]
struct DirectionWeights {
    w_ih_t: Tensor,
    w_hh_t: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
}

impl DirectionWeights {
    fn load(
        input_size: usize,
        hidden_size: usize,
        gates: usize,
        suffix: &str,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let g = gates * hidden_size;
        let w_ih = vb.get((g, input_size), &format!("weight_ih_{suffix}"))?;
        let w_hh = vb.get((g, hidden_size), &format!("weight_hh_{suffix}"))?;
        let b_ih = vb.get(g, &format!("bias_ih_{suffix}"))?;
        let b_hh = vb.get(g, &format!("bias_hh_{suffix}"))?;
        Ok(Self {
            w_ih_t: w_ih.t()?.contiguous()?,
            w_hh_t: w_hh.t()?.contiguous()?,
            b_ih,
            b_hh,
        })
    }

    /// Input projection for all steps at once: `[T, B, I] -> [T, B, G]`.
    fn project_input(&self, xs: &Tensor) -> Result<Tensor> {
        let (t, b, i) = xs.dims3()?;
        xs.reshape((t * b, i))?
            .matmul(&self.w_ih_t)?
            .broadcast_add(&self.b_ih)?
            .reshape((t, b, ()))
    }

    fn project_hidden(&self, h: &Tensor) -> Result<Tensor> {
        h.matmul(&self.w_hh_t)?.broadcast_add(&self.b_hh)
    }
}

/// Single recurrent step. `gi` already contains `x @ W_ih^T + b_ih`.
fn gru_step(dir: &DirectionWeights, gi: &Tensor, h: &Tensor, hs: usize) -> Result<Tensor> {
    let gh = dir.project_hidden(h)?;

    let r = sigmoid(&(gi.narrow(D::Minus1, 0, hs)? + gh.narrow(D::Minus1, 0, hs)?)?)?;
    let z = sigmoid(&(gi.narrow(D::Minus1, hs, hs)? + gh.narrow(D::Minus1, hs, hs)?)?)?;
    let n = (gi.narrow(D::Minus1, 2 * hs, hs)? + (r * gh.narrow(D::Minus1, 2 * hs, hs)?)?)?
        .tanh()?;

    // h' = (1 - z) * n + z * h = n + z * (h - n)
    &n + (z * (h - &n)?)?
}

fn lstm_step(
    dir: &DirectionWeights,
    gi: &Tensor,
    h: &Tensor,
    c: &Tensor,
    hs: usize,
) -> Result<(Tensor, Tensor)> {
    let gates = (gi + dir.project_hidden(h)?)?;

    let i_gate = sigmoid(&gates.narrow(D::Minus1, 0, hs)?)?;
    let f_gate = sigmoid(&gates.narrow(D::Minus1, hs, hs)?)?;
    let g_gate = gates.narrow(D::Minus1, 2 * hs, hs)?.tanh()?;
    let o_gate = sigmoid(&gates.narrow(D::Minus1, 3 * hs, hs)?)?;

    let c_new = ((f_gate * c)? + (i_gate * g_gate)?)?;
    let h_new = (o_gate * c_new.tanh()?)?;
    Ok((h_new, c_new))
}

/// Output of one direction over the whole sequence.
struct DirectionOutput {
    /// `[T, B, H]`
    outputs: Tensor,
    h: Tensor,
    c: Option<Tensor>,
}

/// One layer: one or two directions.
#[derive(Debug, Clone)]
struct RnnLayer {
    directions: Vec<DirectionWeights>,
}

/// Recurrent encoder.
#[derive(Debug, Clone)]
pub struct Rnn {
    cell: RnnCellType,
    layers: Vec<RnnLayer>,
    input_size: usize,
    hidden_size: usize,
    bidirectional: bool,
}

impl Rnn {
    pub fn load(
        cell: RnnCellType,
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        bidirectional: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let gates = cell.num_gates();
        let num_directions = if bidirectional { 2 } else { 1 };
        let mut layers = Vec::with_capacity(num_layers);

        for k in 0..num_layers {
            let layer_input = if k == 0 {
                input_size
            } else {
                hidden_size * num_directions
            };
            let mut directions = Vec::with_capacity(num_directions);
            directions.push(DirectionWeights::load(
                layer_input,
                hidden_size,
                gates,
                &format!("l{k}"),
                &vb,
            )?);
            if bidirectional {
                directions.push(DirectionWeights::load(
                    layer_input,
                    hidden_size,
                    gates,
                    &format!("l{k}_reverse"),
                    &vb,
                )?);
            }
            layers.push(RnnLayer { directions });
        }

        debug!(
            "RNN загружен: {} {}x{} (input={}, bidirectional={})",
            cell, num_layers, hidden_size, input_size, bidirectional
        );

        Ok(Self {
            cell,
            layers,
            input_size,
            hidden_size,
            bidirectional,
        })
    }

    pub fn cell(&self) -> RnnCellType {
        self.cell
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.hidden_size * if self.bidirectional { 2 } else { 1 }
    }

    /// Forward pass.
    ///
    /// * `xs`: time-major `[T, B, input_size]`
    /// * `lengths`: valid steps per batch item, each in `1..=T`
    ///
    /// Returns `[max(lengths), B, D*H]` and the final state.
    pub fn forward(&self, xs: &Tensor, lengths: &[usize]) -> Result<(Tensor, RnnState)> {
        let (t, b, _) = xs.dims3()?;
        if lengths.len() != b {
            candle_core::bail!("RNN: {} lengths for a batch of {}", lengths.len(), b);
        }
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        if max_len == 0 || max_len > t || lengths.contains(&0) {
            candle_core::bail!("RNN: lengths {:?} must lie in 1..={}", lengths, t);
        }

        let mut x = xs.narrow(0, 0, max_len)?;
        // Step masks `[B, 1]`, one per time step.
        let masks = crate::conv::time_mask(lengths, max_len, xs.device())?
            .t()?
            .contiguous()?
            .unsqueeze(2)?;

        let mut h_finals = Vec::with_capacity(self.layers.len() * 2);
        let mut c_finals = Vec::with_capacity(self.layers.len() * 2);

        for layer in &self.layers {
            let mut outs = Vec::with_capacity(layer.directions.len());
            for (d, dir) in layer.directions.iter().enumerate() {
                let out = self.run_direction(dir, &x, &masks, d == 1)?;
                outs.push(out.outputs);
                h_finals.push(out.h);
                if let Some(c) = out.c {
                    c_finals.push(c);
                }
            }
            x = if outs.len() == 1 {
                outs.remove(0)
            } else {
                Tensor::cat(&outs, D::Minus1)?
            };
        }

        let h_n = Tensor::stack(&h_finals, 0)?;
        let state = match self.cell {
            RnnCellType::Gru => RnnState::Gru { h_n },
            RnnCellType::Lstm => RnnState::Lstm {
                h_n,
                c_n: Tensor::stack(&c_finals, 0)?,
            },
        };
        Ok((x, state))
    }

    /// Run one direction with masked updates: padded steps keep the previous state
    /// and emit zeros.
    fn run_direction(
        &self,
        dir: &DirectionWeights,
        xs: &Tensor,
        masks: &Tensor,
        reverse: bool,
    ) -> Result<DirectionOutput> {
        let (t, b, _) = xs.dims3()?;
        let hs = self.hidden_size;
        let gi_all = dir.project_input(xs)?;

        let zeros = Tensor::zeros((b, hs), xs.dtype(), xs.device())?;
        let mut h = zeros.clone();
        let mut c = zeros.clone();
        let mut outputs: Vec<Tensor> = vec![zeros.clone(); t];

        let steps: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((0..t).rev())
        } else {
            Box::new(0..t)
        };

        for step in steps {
            let gi = gi_all.get(step)?;
            let mask = masks.get(step)?.broadcast_as((b, hs))?;

            match self.cell {
                RnnCellType::Gru => {
                    let h_new = gru_step(dir, &gi, &h, hs)?;
                    h = mask.where_cond(&h_new, &h)?;
                }
                RnnCellType::Lstm => {
                    let (h_new, c_new) = lstm_step(dir, &gi, &h, &c, hs)?;
                    h = mask.where_cond(&h_new, &h)?;
                    c = mask.where_cond(&c_new, &c)?;
                }
            }
            outputs[step] = mask.where_cond(&h, &zeros)?;
        }

        Ok(DirectionOutput {
            outputs: Tensor::stack(&outputs, 0)?,
            h,
            c: matches!(self.cell, RnnCellType::Lstm).then_some(c),
        })
    }
}

/// Trainable parameters of the recurrent encoder.
pub(crate) fn rnn_parameters(
    cell: RnnCellType,
    input_size: usize,
    hidden_size: usize,
    num_layers: usize,
    bidirectional: bool,
) -> u64 {
    let dirs = if bidirectional { 2 } else { 1 };
    let g = (cell.num_gates() * hidden_size) as u64;
    (0..num_layers)
        .map(|k| {
            let inp = if k == 0 { input_size } else { hidden_size * dirs } as u64;
            dirs as u64 * (g * inp + g * hidden_size as u64 + 2 * g)
        })
        .sum()
}
