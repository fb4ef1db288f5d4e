//! # audio
//!
//! Audio front-end for audionet.
//!
//! This crate handles:
//! - WAV file loading and channel down-mixing
//! - Resampling to the model sample rate
//! - Linear log-magnitude spectrogram extraction

pub mod loader;
pub mod resample;
pub mod spectrogram;

pub use loader::{load_wav, to_mono};
pub use resample::Resampler;
pub use spectrogram::SpectrogramExtractor;
