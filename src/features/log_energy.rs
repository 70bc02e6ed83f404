//! Reference extractor: log energy of equal sub-segments of a frame.

use crate::audio::source::AudioFrame;
use crate::defaults;
use crate::error::{KwsError, Result};
use crate::features::{FeatureExtractor, FeatureVector};

/// Splits each frame into `feature_count` equal segments and emits the
/// natural log of each segment's mean normalized power.
///
/// Samples left over when the frame length is not a multiple of the
/// segment count belong to the last segment.
#[derive(Debug, Clone)]
pub struct LogEnergyExtractor {
    feature_count: usize,
    floor: f32,
}

impl LogEnergyExtractor {
    pub fn new(feature_count: usize) -> Self {
        Self {
            feature_count,
            floor: defaults::LOG_ENERGY_FLOOR,
        }
    }

    /// Override the energy floor added before the logarithm.
    pub fn with_floor(mut self, floor: f32) -> Self {
        self.floor = floor;
        self
    }
}

impl Default for LogEnergyExtractor {
    fn default() -> Self {
        Self::new(defaults::FEATURE_COUNT)
    }
}

impl FeatureExtractor for LogEnergyExtractor {
    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn extract(&mut self, frame: &AudioFrame) -> Result<FeatureVector> {
        let samples = &frame.samples;
        if self.feature_count == 0 || samples.len() < self.feature_count {
            return Err(KwsError::FeatureExtractionFailed {
                message: format!(
                    "frame of {} samples cannot yield {} coefficients",
                    samples.len(),
                    self.feature_count
                ),
            });
        }

        let segment = samples.len() / self.feature_count;
        let scale = (i16::MAX as f32 + 1.0).powi(2);
        let values = (0..self.feature_count)
            .map(|i| {
                let start = i * segment;
                let end = if i + 1 == self.feature_count {
                    samples.len()
                } else {
                    start + segment
                };
                let slice = &samples[start..end];
                let power: f32 = slice
                    .iter()
                    .map(|&s| {
                        let v = s as f32;
                        v * v / scale
                    })
                    .sum::<f32>()
                    / slice.len() as f32;
                (power + self.floor).ln()
            })
            .collect();

        Ok(FeatureVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_maps_to_floor() {
        let mut extractor = LogEnergyExtractor::new(4);
        let frame = AudioFrame::new(0, vec![0; 16]);
        let features = extractor.extract(&frame).unwrap();
        assert_eq!(features.len(), 4);
        for &v in features.as_slice() {
            assert!((v - defaults::LOG_ENERGY_FLOOR.ln()).abs() < 1e-3);
        }
    }

    #[test]
    fn test_louder_segment_has_higher_energy() {
        let mut extractor = LogEnergyExtractor::new(2);
        let mut samples = vec![100i16; 8];
        samples[4..].fill(10000);
        let features = extractor.extract(&AudioFrame::new(0, samples)).unwrap();
        assert!(features.as_slice()[1] > features.as_slice()[0]);
    }

    #[test]
    fn test_remainder_joins_last_segment() {
        let mut extractor = LogEnergyExtractor::new(2).with_floor(0.0);
        // 5 samples: segment 0 = [0, 0], segment 1 = [0, 0, full-scale]
        let samples = vec![0, 0, 0, 0, i16::MIN];
        let features = extractor.extract(&AudioFrame::new(0, samples)).unwrap();
        assert!((features.as_slice()[1] - (1.0f32 / 3.0).ln()).abs() < 1e-5);
    }

    #[test]
    fn test_short_frame_fails() {
        let mut extractor = LogEnergyExtractor::new(13);
        let result = extractor.extract(&AudioFrame::new(0, vec![1; 4]));
        assert!(matches!(result, Err(KwsError::FeatureExtractionFailed { .. })));
    }

    #[test]
    fn test_default_uses_thirteen_coefficients() {
        assert_eq!(LogEnergyExtractor::default().feature_count(), 13);
    }
}
