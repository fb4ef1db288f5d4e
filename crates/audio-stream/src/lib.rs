//! # audio-stream
//!
//! Convolutional + recurrent audio encoder with a statistics-pooling classifier.
//!
//! - Masked Conv2d/BatchNorm2d/Hardtanh front-end over a `[batch, 1, freq, time]` spectrogram
//! - Multi-layer (bi)directional GRU or LSTM with packed-sequence semantics
//! - `cat(mean, var)` pooling over time followed by a linear head
//!
//! Tensor names match the PyTorch module tree, so converted checkpoints load as-is.

pub mod classifier;
pub mod config;
pub mod conv;
pub mod model;
pub mod rnn;
pub mod stream;
pub mod weights;

pub use classifier::{AudioOnly, Prediction};
pub use config::{AudioOnlyConfig, AudioStreamConfig, ConvLayerConfig, RnnCellType, StatPooling};
pub use conv::MaskConv;
pub use model::AudioOnlyModel;
pub use rnn::{Rnn, RnnState};
pub use stream::{AudioStream, StreamOutput};
