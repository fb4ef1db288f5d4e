//! Error types for audionet.

use thiserror::Error;

/// Main error type for audio classification.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Audio processing errors.
    #[error("Audio error: {0}")]
    Audio(String),

    /// Model loading errors.
    #[error("Model error: {0}")]
    Model(String),

    /// Inference errors.
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// Input tensor or length vector does not fit the model.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Device initialisation errors.
    #[error("Device error: {0}")]
    Device(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for audionet operations.
pub type AudioResult<T> = Result<T, AudioError>;
