//! kwspot - streaming keyword spotting
//!
//! Keeps a rolling window of per-frame features sized to a fixed network
//! input, runs inference on it and streams raw audio, feature windows and
//! network outputs to a host over a tagged byte link.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod features;
pub mod inference;
pub mod pipeline;
pub mod stream;

// Consumed capabilities
pub use audio::source::ContinuousAudioSource;
pub use features::FeatureExtractor;
pub use inference::InferenceEngine;
pub use pipeline::control::{AbortSignal, IndicatorControl};
pub use stream::channel::HostChannel;

// Pipeline
pub use pipeline::orchestrator::{
    Pipeline, PipelineConfig, PipelinePhase, PipelineState, RefreshPolicy, RunOutcome,
};

// Error handling
pub use error::{KwsError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
