//! Error types for kwspot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KwsError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    CaptureFailed { message: String },

    // Feature extraction errors
    #[error("Feature extraction failed: {message}")]
    FeatureExtractionFailed { message: String },

    // Inference errors
    #[error("Inference failed with code {code}")]
    InferenceFailed { code: i32 },

    #[error("Input shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    // Host link errors
    #[error("Host transport failed: {message}")]
    TransportFailed { message: String },

    #[error("Stream protocol error: {message}")]
    Protocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl KwsError {
    /// Numeric result code reported to the caller of a pipeline run.
    ///
    /// Inference failures carry the engine's own code; everything else maps
    /// to a fixed negative code.
    pub fn result_code(&self) -> i32 {
        match self {
            KwsError::InferenceFailed { code } => *code,
            KwsError::CaptureFailed { .. } | KwsError::AudioDeviceNotFound { .. } => -1,
            KwsError::FeatureExtractionFailed { .. } => -2,
            KwsError::ShapeMismatch { .. } => -3,
            KwsError::TransportFailed { .. } | KwsError::Protocol { .. } => -4,
            _ => -127,
        }
    }
}

pub type Result<T> = std::result::Result<T, KwsError>;
