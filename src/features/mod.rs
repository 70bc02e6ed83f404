//! Feature extraction: one audio frame in, one fixed-length coefficient vector out.

pub mod log_energy;

pub use log_energy::LogEnergyExtractor;

use crate::audio::source::AudioFrame;
use crate::error::{KwsError, Result};

/// Coefficients extracted from a single audio frame.
///
/// Immutable once produced; the window copies it into its own row.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Trait for frame-to-features transforms.
///
/// This trait allows swapping implementations (real DSP front end vs mock).
pub trait FeatureExtractor: Send {
    /// Number of coefficients every extracted vector carries.
    fn feature_count(&self) -> usize;

    /// Extract one feature vector from a frame.
    ///
    /// # Returns
    /// A vector of exactly `feature_count()` values, or
    /// `KwsError::FeatureExtractionFailed`
    fn extract(&mut self, frame: &AudioFrame) -> Result<FeatureVector>;
}

impl FeatureExtractor for Box<dyn FeatureExtractor> {
    fn feature_count(&self) -> usize {
        (**self).feature_count()
    }

    fn extract(&mut self, frame: &AudioFrame) -> Result<FeatureVector> {
        (**self).extract(frame)
    }
}

/// Mock extractor for testing.
///
/// Every coefficient equals the frame's first sample, so a
/// `MockAudioSource` marker survives into the feature window unchanged.
#[derive(Debug, Clone)]
pub struct MockFeatureExtractor {
    feature_count: usize,
    fail_after: Option<u64>,
    extracted: u64,
}

impl MockFeatureExtractor {
    pub fn new(feature_count: usize) -> Self {
        Self {
            feature_count,
            fail_after: None,
            extracted: 0,
        }
    }

    /// Configure the mock to fail after `frames` successful extractions.
    pub fn with_failure_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn extracted(&self) -> u64 {
        self.extracted
    }
}

impl FeatureExtractor for MockFeatureExtractor {
    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn extract(&mut self, frame: &AudioFrame) -> Result<FeatureVector> {
        if let Some(limit) = self.fail_after
            && self.extracted >= limit
        {
            return Err(KwsError::FeatureExtractionFailed {
                message: "mock extraction failure".to_string(),
            });
        }
        self.extracted += 1;
        let marker = frame.samples.first().copied().unwrap_or_default() as f32;
        Ok(FeatureVector::new(vec![marker; self.feature_count]))
    }
}
