//! WAV file audio source for replay runs, and WAV export of captured audio.

use std::io::Read;
use std::path::Path;

use crate::audio::source::{AudioFrame, ContinuousAudioSource};
use crate::defaults::SAMPLE_RATE;
use crate::error::{KwsError, Result};

/// Audio source that replays WAV data as fixed-length frames.
///
/// Input is mixed down to mono and resampled to 16kHz. The last partial
/// frame is zero-padded. Reading past the end is a capture failure, so
/// callers should bound the run with [`WavAudioSource::frame_count`].
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    frame_samples: usize,
    sequence: u64,
}

impl WavAudioSource {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>, frame_samples: usize) -> Result<Self> {
        if frame_samples == 0 {
            return Err(KwsError::ConfigInvalidValue {
                key: "pipeline.frame_samples".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| KwsError::CaptureFailed {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        let source_rate = spec.sample_rate;
        let source_channels = spec.channels;

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| KwsError::CaptureFailed {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let mono_samples = if source_channels == 2 {
            raw_samples
                .chunks_exact(2)
                .map(|chunk| {
                    let left = chunk[0] as i32;
                    let right = chunk[1] as i32;
                    ((left + right) / 2) as i16
                })
                .collect()
        } else {
            raw_samples
        };

        let samples = if source_rate != SAMPLE_RATE {
            resample(&mono_samples, source_rate, SAMPLE_RATE)
        } else {
            mono_samples
        };

        Ok(Self {
            samples,
            position: 0,
            frame_samples,
            sequence: 0,
        })
    }

    /// Open a WAV file.
    pub fn open(path: &Path, frame_samples: usize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), frame_samples)
    }

    /// Number of frames the file yields, counting a zero-padded tail.
    pub fn frame_count(&self) -> u64 {
        self.samples.len().div_ceil(self.frame_samples) as u64
    }
}

impl ContinuousAudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<AudioFrame> {
        if self.position >= self.samples.len() {
            return Err(KwsError::CaptureFailed {
                message: "end of WAV data".to_string(),
            });
        }

        let end = std::cmp::min(self.position + self.frame_samples, self.samples.len());
        let mut frame = self.samples[self.position..end].to_vec();
        frame.resize(self.frame_samples, 0);
        self.position = end;

        let sequence = self.sequence;
        self.sequence += 1;
        Ok(AudioFrame::new(sequence, frame))
    }
}

/// Write 16kHz mono samples to a WAV file.
pub fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let to_err = |e: hound::Error| KwsError::Other(format!("Failed to write WAV file: {e}"));

    let mut writer = hound::WavWriter::create(path, spec).map_err(to_err)?;
    for &s in samples {
        writer.write_sample(s).map_err(to_err)?;
    }
    writer.finalize().map_err(to_err)
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
