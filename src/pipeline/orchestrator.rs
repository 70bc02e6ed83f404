//! Keyword pipeline state machine: prime the window, then infer and refresh
//! until aborted.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::diag_ring::{DiagnosticRing, RingRetention};
use crate::audio::source::ContinuousAudioSource;
use crate::defaults;
use crate::error::{KwsError, Result};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::inference::{InferenceEngine, InferenceResult, InputShape};
use crate::pipeline::capture::CaptureCycle;
use crate::pipeline::control::{
    AbortSignal, Indicator, IndicatorControl, LogIndicator, NeverAbort,
};
use crate::pipeline::inference::InferenceCycle;
use crate::pipeline::stats::RunStats;
use crate::pipeline::window::FeatureWindow;
use crate::stream::channel::NullChannel;
use crate::stream::encoder::StreamEncoder;
use crate::stream::protocol::{StreamTag, TagSet, WireFormat};

/// How the window is refreshed between inferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Drop the oldest row and append one new frame: one inference per frame.
    #[default]
    Shift,
    /// Recapture the whole window: no overlap between consecutive inferences.
    Block,
}

impl std::str::FromStr for RefreshPolicy {
    type Err = KwsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "shift" => Ok(Self::Shift),
            "block" => Ok(Self::Block),
            other => Err(KwsError::ConfigInvalidValue {
                key: "pipeline.refresh".to_string(),
                message: format!("unknown refresh policy '{other}' (expected shift or block)"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Idle,
    Priming,
    Steady,
    Aborting,
    Draining,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The abort signal (or host activity) stopped the run.
    Aborted,
    /// The configured inference limit was reached.
    Completed,
}

/// Which payloads go to the host, and under which tags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOptions {
    pub raw_audio: bool,
    pub features: bool,
    pub output: bool,
    pub ready_signals: bool,
    pub tags: TagSet,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            raw_audio: false,
            features: false,
            output: true,
            ready_signals: true,
            tags: TagSet::default(),
        }
    }
}

/// Read-only settings for a pipeline run.
///
/// The window geometry is not part of it: it comes from the engine's
/// declared input shape at run start.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub frame_samples: usize,
    pub threshold: f32,
    pub refresh: RefreshPolicy,
    pub diagnostic_frames: usize,
    pub ring_retention: RingRetention,
    /// End the run with `RunOutcome::Completed` after this many inferences.
    pub max_inferences: Option<u64>,
    /// Treat unsolicited host traffic as an abort request.
    pub abort_on_host_activity: bool,
    pub stream: StreamOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_samples: defaults::FRAME_SAMPLES,
            threshold: defaults::THRESHOLD,
            refresh: RefreshPolicy::default(),
            diagnostic_frames: defaults::DIAGNOSTIC_FRAMES,
            ring_retention: RingRetention::default(),
            max_inferences: None,
            abort_on_host_activity: false,
            stream: StreamOptions::default(),
        }
    }
}

/// Buffers and bookkeeping owned by one run at a time.
///
/// Pass the same state to successive runs to reuse its allocations; every
/// run re-initializes it on entering `Priming`.
#[derive(Debug)]
pub struct PipelineState {
    window: FeatureWindow,
    ring: DiagnosticRing,
    result: InferenceResult,
    stats: RunStats,
    phase: PipelinePhase,
    history: Vec<PipelinePhase>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            window: FeatureWindow::new(InputShape::new(0, 0)),
            ring: DiagnosticRing::new(0, RingRetention::default()),
            result: InferenceResult::with_len(0),
            stats: RunStats::default(),
            phase: PipelinePhase::Idle,
            history: Vec::new(),
        }
    }

    pub fn window(&self) -> &FeatureWindow {
        &self.window
    }

    pub fn ring(&self) -> &DiagnosticRing {
        &self.ring
    }

    /// Result of the most recent inference.
    pub fn result(&self) -> &InferenceResult {
        &self.result
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    /// Phases entered during the last run, in order.
    pub fn phase_history(&self) -> &[PipelinePhase] {
        &self.history
    }

    fn prepare(&mut self, shape: InputShape, output_len: usize, config: &PipelineConfig) {
        if self.window.shape() == shape {
            self.window.reset();
        } else {
            self.window = FeatureWindow::new(shape);
        }
        self.ring.reconfigure(config.diagnostic_frames, config.ring_retention);
        self.result = InferenceResult::with_len(output_len);
        self.stats.reset();
        self.history.clear();
    }

    fn enter(&mut self, phase: PipelinePhase) {
        debug!(from = ?self.phase, to = ?phase, "pipeline phase");
        self.phase = phase;
        self.history.push(phase);
    }

    fn discard_buffers(&mut self) {
        self.window.reset();
        self.ring.clear();
    }
}

/// The keyword-spotting pipeline.
///
/// Runs strictly sequentially on the calling thread: capture, inference and
/// streaming never overlap, and abort is polled only between steps.
pub struct Pipeline {
    config: PipelineConfig,
    capture: CaptureCycle,
    inference: InferenceCycle,
    encoder: StreamEncoder,
    indicator: Box<dyn IndicatorControl>,
    abort: Box<dyn AbortSignal>,
}

impl Pipeline {
    /// Creates a pipeline that streams nowhere, logs detections and never aborts.
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn ContinuousAudioSource>,
        extractor: Box<dyn FeatureExtractor>,
        engine: Box<dyn InferenceEngine>,
    ) -> Self {
        let capture = CaptureCycle::new(source, extractor, config.frame_samples);
        let inference = InferenceCycle::new(engine, config.threshold);
        Self {
            config,
            capture,
            inference,
            encoder: StreamEncoder::new(Box::new(NullChannel), WireFormat::default()),
            indicator: Box::new(LogIndicator::default()),
            abort: Box::new(NeverAbort),
        }
    }

    /// Sets the encoder for the host link.
    pub fn with_encoder(mut self, encoder: StreamEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_indicator(mut self, indicator: Box<dyn IndicatorControl>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn with_abort_signal(mut self, abort: Box<dyn AbortSignal>) -> Self {
        self.abort = abort;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn encoder(&self) -> &StreamEncoder {
        &self.encoder
    }

    /// Run the pipeline from `Idle` back to `Idle`.
    ///
    /// # Returns
    /// `RunOutcome::Aborted` or `RunOutcome::Completed` on a clean stop;
    /// capture, extraction and inference failures end the run with their
    /// error. Host send failures never end a run.
    pub fn run(&mut self, state: &mut PipelineState) -> Result<RunOutcome> {
        let shape = self.inference.input_shape();
        if shape.flat_len() == 0 {
            return Err(KwsError::ConfigInvalidValue {
                key: "engine.input_shape".to_string(),
                message: format!("{}x{} input has no elements", shape.features, shape.frames),
            });
        }
        let feature_count = self.capture.feature_count();
        if feature_count != shape.features {
            return Err(KwsError::ShapeMismatch {
                expected: shape.features,
                actual: feature_count,
            });
        }

        state.prepare(shape, self.inference.output_len(), &self.config);
        info!(
            features = shape.features,
            frames = shape.frames,
            refresh = ?self.config.refresh,
            threshold = self.config.threshold,
            "pipeline run starting"
        );

        state.enter(PipelinePhase::Priming);
        if let Err(e) = self.capture.start() {
            state.discard_buffers();
            state.enter(PipelinePhase::Idle);
            return Err(e);
        }

        let outcome = self.run_until_stopped(state);
        if !matches!(outcome, Ok(RunOutcome::Completed)) {
            state.enter(PipelinePhase::Aborting);
        }

        state.enter(PipelinePhase::Draining);
        if let Err(e) = self.capture.stop() {
            warn!(error = %e, "audio source did not stop cleanly");
        }
        if self.encoder.flush().is_err() {
            state.stats.transport_failures += 1;
        }
        state.discard_buffers();
        state.enter(PipelinePhase::Idle);

        match &outcome {
            Ok(result) => info!(
                outcome = ?result,
                stats = %state.stats.summary(),
                "pipeline run finished"
            ),
            Err(e) => warn!(error = %e, stats = %state.stats.summary(), "pipeline run failed"),
        }
        outcome
    }

    fn run_until_stopped(&mut self, state: &mut PipelineState) -> Result<RunOutcome> {
        if !self.fill_window(state)? {
            return Ok(RunOutcome::Aborted);
        }
        state.enter(PipelinePhase::Steady);

        loop {
            if self.abort_requested() {
                return Ok(RunOutcome::Aborted);
            }

            self.inference.run_once(&state.window, &mut state.result)?;
            let indicator = self.inference.classify(&state.result);
            state.stats.record_inference(
                self.inference.last_duration(),
                indicator == Indicator::Positive,
            );

            self.stream_results(state);
            self.indicator.set_state(indicator);

            if let Some(limit) = self.config.max_inferences
                && state.stats.inferences >= limit
            {
                return Ok(RunOutcome::Completed);
            }

            match self.config.refresh {
                RefreshPolicy::Shift => {
                    let vector = self.capture_one(state)?;
                    state.window.shift_and_append(&vector)?;
                    self.send_ready(state);
                }
                RefreshPolicy::Block => {
                    if !self.fill_window(state)? {
                        return Ok(RunOutcome::Aborted);
                    }
                }
            }
        }
    }

    /// Capture a full window, polling abort before every frame.
    ///
    /// # Returns
    /// `false` when an abort stopped the fill; the partial window is zeroed.
    fn fill_window(&mut self, state: &mut PipelineState) -> Result<bool> {
        let frames = state.window.shape().frames;
        let keep_raw = self.config.stream.raw_audio;
        let host_abort = self.config.abort_on_host_activity;
        let capture = &mut self.capture;
        let abort = &self.abort;
        let encoder = &mut self.encoder;

        let filled = state.window.fill_sequential(|_row| {
            if abort.is_requested() || (host_abort && encoder.host_activity()) {
                return Ok(None);
            }
            let vector = capture.capture_one(keep_raw.then_some(&mut state.ring))?;
            state.stats.record_capture(capture.last_extract_time());
            Ok(Some(vector))
        });

        match filled {
            Ok(n) if n == frames => {
                self.send_ready(state);
                Ok(true)
            }
            Ok(n) => {
                debug!(filled = n, frames, "window fill interrupted");
                state.window.reset();
                Ok(false)
            }
            Err(e) => {
                state.window.reset();
                Err(e)
            }
        }
    }

    fn capture_one(&mut self, state: &mut PipelineState) -> Result<FeatureVector> {
        let ring = self.config.stream.raw_audio.then_some(&mut state.ring);
        let vector = self.capture.capture_one(ring)?;
        state.stats.record_capture(self.capture.last_extract_time());
        Ok(vector)
    }

    fn abort_requested(&mut self) -> bool {
        if self.abort.is_requested() {
            return true;
        }
        if self.config.abort_on_host_activity && self.encoder.host_activity() {
            debug!("host activity, aborting");
            return true;
        }
        false
    }

    /// Stream the current window and result, then signal inference-complete.
    fn stream_results(&mut self, state: &mut PipelineState) {
        let options = self.config.stream;
        if options.raw_audio && !state.ring.is_empty() {
            let sent = self
                .encoder
                .send_raw_audio(state.ring.contiguous(), StreamTag::RawAudio);
            note_send(&mut state.stats, sent);
        }
        if options.features {
            let sent = self
                .encoder
                .send_features(state.window.as_flat_input(), options.tags.features());
            note_send(&mut state.stats, sent);
        }
        if options.output {
            let sent = self
                .encoder
                .send_output(&state.result.values, options.tags.output());
            note_send(&mut state.stats, sent);
        }
        self.send_ready(state);
    }

    fn send_ready(&mut self, state: &mut PipelineState) {
        if self.config.stream.ready_signals {
            let sent = self.encoder.send_ready();
            note_send(&mut state.stats, sent);
        }
    }
}

fn note_send(stats: &mut RunStats, sent: Result<()>) {
    if sent.is_err() {
        stats.transport_failures += 1;
    }
}
