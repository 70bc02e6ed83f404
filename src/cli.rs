//! Command-line interface for kwspot
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::orchestrator::RefreshPolicy;

/// Streaming keyword spotter with a tagged host diagnostics link
#[derive(Parser, Debug)]
#[command(
    name = "kwspot",
    version,
    about = "Streaming keyword spotter with a tagged host diagnostics link"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Options shared by every command that runs the pipeline
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// JSON weights of the linear model (overrides pipeline.model)
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Decision threshold in [0, 1]
    #[arg(long, value_name = "VALUE")]
    pub threshold: Option<f32>,

    /// Window refresh policy: shift or block
    #[arg(long, value_name = "POLICY")]
    pub refresh: Option<RefreshPolicy>,

    /// Stop after this many inferences
    #[arg(long, value_name = "N")]
    pub max_inferences: Option<u64>,

    /// Write the host link stream to this file
    #[arg(long, short = 'o', value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Also stream raw audio and feature windows
    #[arg(long)]
    pub diagnostics: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Spot keywords on the live microphone until Ctrl-C
    #[cfg(feature = "cpal-audio")]
    Run {
        #[command(flatten)]
        args: RunArgs,

        /// Audio input device (e.g., hw:0)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Stop after this long. Examples: 30s, 5m, 1h30m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,
    },

    /// Run the pipeline over a WAV file
    Replay {
        /// WAV file to replay (mixed to mono, resampled to 16kHz)
        wav: PathBuf,

        #[command(flatten)]
        args: RunArgs,
    },

    /// Run on audio frames sent by the host over the link
    ///
    /// Each inbound raw-audio frame feeds one capture; results go back on
    /// the same link under the host-fed tags. Ctrl-C takes effect once the
    /// pending host frame arrives.
    Serve {
        /// Host link device (e.g., /dev/ttyACM0); stdin/stdout when omitted
        #[arg(long, value_name = "DEVICE")]
        port: Option<PathBuf>,

        #[command(flatten)]
        args: RunArgs,
    },

    /// Decode a recorded host link stream
    Decode {
        /// File holding the raw link bytes
        capture: PathBuf,

        /// Write every raw-audio frame to this WAV file
        #[arg(long, value_name = "PATH")]
        wav: Option<PathBuf>,

        /// Frames carry the 16-bit checksum trailer
        #[arg(long)]
        checksum: bool,
    },

    /// List available audio input devices
    #[cfg(feature = "cpal-audio")]
    Devices,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
