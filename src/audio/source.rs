use std::time::Instant;

use crate::defaults;
use crate::error::{KwsError, Result};

/// One fixed-length block of 16-bit PCM samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Sequence number in capture order, starting at 0 for each source start.
    pub sequence: u64,
    /// Timestamp when the frame was handed out by the source.
    pub timestamp: Instant,
    /// Audio samples as 16-bit PCM.
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(sequence: u64, samples: Vec<i16>) -> Self {
        Self {
            sequence,
            timestamp: Instant::now(),
            samples,
        }
    }

    /// Returns the duration of this frame in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        (self.samples.len() as u32 * 1000) / sample_rate
    }
}

/// Trait for continuously sampling audio sources.
///
/// This trait allows swapping implementations (microphone, WAV file, host link, mock).
pub trait ContinuousAudioSource: Send {
    /// Start continuous sampling.
    fn start(&mut self) -> Result<()>;

    /// Stop sampling and release the device.
    fn stop(&mut self) -> Result<()>;

    /// Block until the next full frame is available.
    ///
    /// There is no timeout: the source is authoritative for timing.
    ///
    /// # Returns
    /// The next frame in capture order, or `KwsError::CaptureFailed`
    fn next_frame(&mut self) -> Result<AudioFrame>;
}

impl ContinuousAudioSource for Box<dyn ContinuousAudioSource> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn next_frame(&mut self) -> Result<AudioFrame> {
        (**self).next_frame()
    }
}

/// Mock audio source for testing.
///
/// Frame `n` is filled with the marker value `n` (wrapping at `i16`), so the
/// frame order can be traced through feature extraction.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    frame_samples: usize,
    next_sequence: u64,
    is_started: bool,
    starts: usize,
    should_fail_start: bool,
    should_fail_stop: bool,
    fail_after: Option<u64>,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with the default frame length.
    pub fn new() -> Self {
        Self {
            frame_samples: defaults::FRAME_SAMPLES,
            next_sequence: 0,
            is_started: false,
            starts: 0,
            should_fail_start: false,
            should_fail_stop: false,
            fail_after: None,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the number of samples per frame.
    pub fn with_frame_samples(mut self, frame_samples: usize) -> Self {
        self.frame_samples = frame_samples;
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop.
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail every read after `frames` successful ones.
    pub fn with_read_failure_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Configure the error message for failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started.
    pub fn is_started(&self) -> bool {
        self.is_started
    }

    /// Frames handed out so far.
    pub fn frames_read(&self) -> u64 {
        self.next_sequence
    }

    fn failure(&self) -> KwsError {
        KwsError::CaptureFailed {
            message: self.error_message.clone(),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuousAudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(self.failure());
        }
        self.is_started = true;
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            return Err(self.failure());
        }
        self.is_started = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<AudioFrame> {
        if let Some(limit) = self.fail_after
            && self.next_sequence >= limit
        {
            return Err(self.failure());
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let marker = sequence as i16;
        Ok(AudioFrame::new(sequence, vec![marker; self.frame_samples]))
    }
}
