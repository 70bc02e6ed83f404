//! Keyword-spotting pipeline.
//!
//! A single-threaded state machine that keeps a rolling feature window full,
//! runs inference on it and reports each result to the indicator and the host
//! link. Capture, inference and streaming never run concurrently.

pub mod capture;
pub mod control;
pub mod inference;
pub mod orchestrator;
pub mod stats;
pub mod window;

pub use capture::CaptureCycle;
pub use control::{
    AbortFlag, AbortSignal, CountdownAbort, Indicator, IndicatorControl, LogIndicator, NeverAbort,
    RecordingIndicator,
};
pub use inference::InferenceCycle;
pub use orchestrator::{
    Pipeline, PipelineConfig, PipelinePhase, PipelineState, RefreshPolicy, RunOutcome,
    StreamOptions,
};
pub use stats::RunStats;
pub use window::FeatureWindow;
