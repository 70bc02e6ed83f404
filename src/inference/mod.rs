//! Inference engine capability, result interpretation and test double.

pub mod linear;

pub use linear::LinearEngine;

use std::sync::{Arc, Mutex};

use crate::error::{KwsError, Result};

/// Input geometry declared by an engine: `features` per row, `frames` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub features: usize,
    pub frames: usize,
}

impl InputShape {
    pub fn new(features: usize, frames: usize) -> Self {
        Self { features, frames }
    }

    /// Length of the flat input buffer.
    pub fn flat_len(&self) -> usize {
        self.features * self.frames
    }
}

/// Trait for a synchronous neural-network runner.
///
/// This trait allows swapping implementations (real runtime vs mock).
pub trait InferenceEngine: Send {
    /// Input shape the network was built for.
    fn input_shape(&self) -> InputShape;

    /// Number of output values per inference.
    fn output_len(&self) -> usize;

    /// Run one inference.
    ///
    /// # Arguments
    /// * `input` - Flat row-major window of `input_shape().flat_len()` values
    /// * `output` - Buffer of `output_len()` values to overwrite
    ///
    /// # Returns
    /// Number of batches processed, or `KwsError::InferenceFailed` with the
    /// runtime's error code
    fn run(&mut self, input: &[f32], output: &mut [f32]) -> Result<u32>;
}

impl InferenceEngine for Box<dyn InferenceEngine> {
    fn input_shape(&self) -> InputShape {
        (**self).input_shape()
    }

    fn output_len(&self) -> usize {
        (**self).output_len()
    }

    fn run(&mut self, input: &[f32], output: &mut [f32]) -> Result<u32> {
        (**self).run(input, output)
    }
}

/// Output of one inference plus its arg-max.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub values: Vec<f32>,
    pub max_value: f32,
    pub max_index: usize,
}

impl InferenceResult {
    /// Zeroed result with storage for `len` outputs.
    pub fn with_len(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
            max_value: f32::NEG_INFINITY,
            max_index: 0,
        }
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        let mut result = Self {
            values,
            max_value: f32::NEG_INFINITY,
            max_index: 0,
        };
        result.update_max();
        result
    }

    /// Recompute the arg-max with a single forward scan.
    ///
    /// Only a strictly greater value replaces the current maximum, so the
    /// lowest index wins ties. An empty output leaves `max_value` at -inf.
    pub fn update_max(&mut self) {
        self.max_value = f32::NEG_INFINITY;
        self.max_index = 0;
        for (i, &v) in self.values.iter().enumerate() {
            if v > self.max_value {
                self.max_value = v;
                self.max_index = i;
            }
        }
    }

    /// Spotted iff the maximum output is strictly above `threshold`.
    pub fn is_spotted(&self, threshold: f32) -> bool {
        self.max_value > threshold
    }
}

/// Shared log of every input a `MockInferenceEngine` was run on.
pub type InputLog = Arc<Mutex<Vec<Vec<f32>>>>;

/// Mock inference engine for testing.
///
/// Returns the configured outputs in order, repeating the last one.
#[derive(Debug, Clone)]
pub struct MockInferenceEngine {
    shape: InputShape,
    outputs: Vec<Vec<f32>>,
    output_len: usize,
    error_code: Option<i32>,
    batches: u32,
    calls: usize,
    inputs: InputLog,
}

impl MockInferenceEngine {
    pub fn new(shape: InputShape, output_len: usize) -> Self {
        Self {
            shape,
            outputs: Vec::new(),
            output_len,
            error_code: None,
            batches: 1,
            calls: 0,
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the outputs returned on successive runs.
    pub fn with_outputs(mut self, outputs: Vec<Vec<f32>>) -> Self {
        if let Some(first) = outputs.first() {
            self.output_len = first.len();
        }
        self.outputs = outputs;
        self
    }

    /// Configure every run to fail with `code`.
    pub fn with_error(mut self, code: i32) -> Self {
        self.error_code = Some(code);
        self
    }

    /// Configure the batch count reported by every run.
    pub fn with_batch_count(mut self, batches: u32) -> Self {
        self.batches = batches;
        self
    }

    /// Handle on the recorded inputs, usable after the engine is moved.
    pub fn input_log(&self) -> InputLog {
        Arc::clone(&self.inputs)
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl InferenceEngine for MockInferenceEngine {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn run(&mut self, input: &[f32], output: &mut [f32]) -> Result<u32> {
        self.calls += 1;
        if let Ok(mut log) = self.inputs.lock() {
            log.push(input.to_vec());
        }
        if let Some(code) = self.error_code {
            return Err(KwsError::InferenceFailed { code });
        }

        let index = self.calls.saturating_sub(1).min(self.outputs.len().saturating_sub(1));
        match self.outputs.get(index) {
            Some(values) => {
                let n = values.len().min(output.len());
                output[..n].copy_from_slice(&values[..n]);
            }
            None => output.fill(0.0),
        }
        Ok(self.batches)
    }
}
