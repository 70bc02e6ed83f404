//! Reference engine: a single dense layer loaded from a JSON weights file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KwsError, Result};
use crate::inference::{InferenceEngine, InputShape};

/// Output activation applied after the dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Sigmoid,
    Softmax,
    None,
}

/// On-disk layout of a linear model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub features: usize,
    pub frames: usize,
    /// One row of `features * frames` weights per output.
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

/// `output = activation(W * input + b)`.
#[derive(Debug, Clone)]
pub struct LinearEngine {
    model: LinearModel,
}

impl LinearEngine {
    pub fn new(model: LinearModel) -> Result<Self> {
        let shape = InputShape::new(model.features, model.frames);
        if shape.flat_len() == 0 {
            return Err(KwsError::ConfigInvalidValue {
                key: "model.features".to_string(),
                message: "input shape must be non-empty".to_string(),
            });
        }
        if model.weights.is_empty() || model.weights.len() != model.bias.len() {
            return Err(KwsError::ConfigInvalidValue {
                key: "model.bias".to_string(),
                message: format!(
                    "{} weight rows but {} bias values",
                    model.weights.len(),
                    model.bias.len()
                ),
            });
        }
        if let Some(row) = model.weights.iter().find(|r| r.len() != shape.flat_len()) {
            return Err(KwsError::ShapeMismatch {
                expected: shape.flat_len(),
                actual: row.len(),
            });
        }
        Ok(Self { model })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: LinearModel =
            serde_json::from_str(json).map_err(|e| KwsError::ConfigParse {
                message: format!("invalid model weights: {e}"),
            })?;
        Self::new(model)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl InferenceEngine for LinearEngine {
    fn input_shape(&self) -> InputShape {
        InputShape::new(self.model.features, self.model.frames)
    }

    fn output_len(&self) -> usize {
        self.model.bias.len()
    }

    fn run(&mut self, input: &[f32], output: &mut [f32]) -> Result<u32> {
        let expected = self.input_shape().flat_len();
        if input.len() != expected {
            return Err(KwsError::ShapeMismatch {
                expected,
                actual: input.len(),
            });
        }
        if output.len() != self.output_len() {
            return Err(KwsError::ShapeMismatch {
                expected: self.output_len(),
                actual: output.len(),
            });
        }

        for ((out, row), &b) in output
            .iter_mut()
            .zip(&self.model.weights)
            .zip(&self.model.bias)
        {
            *out = row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b;
        }

        match self.model.activation {
            Activation::Sigmoid => {
                for v in output.iter_mut() {
                    *v = 1.0 / (1.0 + (-*v).exp());
                }
            }
            Activation::Softmax => {
                let max = output.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for v in output.iter_mut() {
                    *v = (*v - max).exp();
                    sum += *v;
                }
                for v in output.iter_mut() {
                    *v /= sum;
                }
            }
            Activation::None => {}
        }
        Ok(1)
    }
}
