//! Runs the engine on the current window and classifies the result.

use std::time::{Duration, Instant};

use crate::error::{KwsError, Result};
use crate::inference::{InferenceEngine, InferenceResult, InputShape};
use crate::pipeline::control::Indicator;
use crate::pipeline::window::FeatureWindow;

/// Code reported when the engine processes anything but exactly one batch.
pub const BATCH_COUNT_ERROR: i32 = -1;

pub struct InferenceCycle {
    engine: Box<dyn InferenceEngine>,
    threshold: f32,
    last_duration: Duration,
}

impl InferenceCycle {
    pub fn new(engine: Box<dyn InferenceEngine>, threshold: f32) -> Self {
        Self {
            engine,
            threshold,
            last_duration: Duration::ZERO,
        }
    }

    pub fn input_shape(&self) -> InputShape {
        self.engine.input_shape()
    }

    pub fn output_len(&self) -> usize {
        self.engine.output_len()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Duration of the most recent engine call.
    pub fn last_duration(&self) -> Duration {
        self.last_duration
    }

    /// Run the engine on `window`, overwriting `result`.
    ///
    /// Any engine error surfaces as `KwsError::InferenceFailed`, keeping the
    /// engine's own code when it reports one.
    pub fn run_once(&mut self, window: &FeatureWindow, result: &mut InferenceResult) -> Result<()> {
        let shape = self.engine.input_shape();
        if window.shape() != shape {
            return Err(KwsError::ShapeMismatch {
                expected: shape.flat_len(),
                actual: window.as_flat_input().len(),
            });
        }

        result.values.resize(self.engine.output_len(), 0.0);
        let started = Instant::now();
        let batches = self
            .engine
            .run(window.as_flat_input(), &mut result.values)
            .map_err(|e| match e {
                KwsError::InferenceFailed { .. } => e,
                other => KwsError::InferenceFailed {
                    code: other.result_code(),
                },
            })?;
        self.last_duration = started.elapsed();

        if batches != 1 {
            return Err(KwsError::InferenceFailed {
                code: BATCH_COUNT_ERROR,
            });
        }
        result.update_max();
        Ok(())
    }

    /// Stateless threshold decision for the indicator.
    pub fn classify(&self, result: &InferenceResult) -> Indicator {
        if result.is_spotted(self.threshold) {
            Indicator::Positive
        } else {
            Indicator::Negative
        }
    }
}
