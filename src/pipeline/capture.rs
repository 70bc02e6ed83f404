//! One audio frame in, one feature vector out.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::audio::diag_ring::DiagnosticRing;
use crate::audio::source::ContinuousAudioSource;
use crate::error::{KwsError, Result};
use crate::features::{FeatureExtractor, FeatureVector};

/// Pairs an audio source with a feature extractor.
pub struct CaptureCycle {
    source: Box<dyn ContinuousAudioSource>,
    extractor: Box<dyn FeatureExtractor>,
    frame_samples: usize,
    last_extract: Duration,
}

impl CaptureCycle {
    pub fn new(
        source: Box<dyn ContinuousAudioSource>,
        extractor: Box<dyn FeatureExtractor>,
        frame_samples: usize,
    ) -> Self {
        Self {
            source,
            extractor,
            frame_samples,
            last_extract: Duration::ZERO,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.extractor.feature_count()
    }

    pub fn start(&mut self) -> Result<()> {
        self.source.start().map_err(as_capture_failure)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.source.stop().map_err(as_capture_failure)
    }

    /// Time the extractor took on the most recent frame.
    pub fn last_extract_time(&self) -> Duration {
        self.last_extract
    }

    /// Block for the next frame and reduce it to a feature vector.
    ///
    /// The raw frame is recorded in `ring` before extraction when one is
    /// given.
    pub fn capture_one(&mut self, ring: Option<&mut DiagnosticRing>) -> Result<FeatureVector> {
        let frame = self.source.next_frame().map_err(as_capture_failure)?;
        if frame.samples.len() != self.frame_samples {
            return Err(KwsError::CaptureFailed {
                message: format!(
                    "frame {} has {} samples, expected {}",
                    frame.sequence,
                    frame.samples.len(),
                    self.frame_samples
                ),
            });
        }

        if let Some(ring) = ring {
            ring.push(&frame.samples);
        }

        let started = Instant::now();
        let features = self.extractor.extract(&frame).map_err(|e| match e {
            KwsError::FeatureExtractionFailed { .. } => e,
            other => KwsError::FeatureExtractionFailed {
                message: other.to_string(),
            },
        })?;
        self.last_extract = started.elapsed();
        trace!(sequence = frame.sequence, "frame captured");

        Ok(features)
    }
}

fn as_capture_failure(e: KwsError) -> KwsError {
    match e {
        KwsError::CaptureFailed { .. } => e,
        other => KwsError::CaptureFailed {
            message: other.to_string(),
        },
    }
}
