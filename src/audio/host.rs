//! Audio source fed by the host over the link.

use tracing::debug;

use crate::audio::source::{AudioFrame, ContinuousAudioSource};
use crate::error::{KwsError, Result};
use crate::stream::channel::HostChannel;
use crate::stream::protocol::{self, ByteOrder, StreamTag};

/// Receives each audio frame as a tagged 16-bit frame from the host.
///
/// The host paces itself on the ready signals the pipeline sends, so this
/// source blocks in `receive` until the next frame arrives.
pub struct HostAudioSource<C: HostChannel> {
    channel: C,
    frame_samples: usize,
    byte_order: ByteOrder,
    buf: Vec<u8>,
    sequence: u64,
}

impl<C: HostChannel> HostAudioSource<C> {
    pub fn new(channel: C, frame_samples: usize, byte_order: ByteOrder) -> Self {
        Self {
            channel,
            frame_samples,
            byte_order,
            buf: vec![0u8; frame_samples * 2],
            sequence: 0,
        }
    }
}

impl<C: HostChannel> ContinuousAudioSource for HostAudioSource<C> {
    fn start(&mut self) -> Result<()> {
        self.sequence = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<AudioFrame> {
        let max_len = self.buf.len();
        let (len, tag) = self
            .channel
            .receive(&mut self.buf, max_len)
            .map_err(|e| KwsError::CaptureFailed {
                message: format!("host frame not received: {e}"),
            })?;

        if tag != u8::from(StreamTag::RawAudio) {
            return Err(KwsError::CaptureFailed {
                message: format!("host sent tag 0x{tag:02x} where a raw audio frame was expected"),
            });
        }
        if len != max_len {
            return Err(KwsError::CaptureFailed {
                message: format!(
                    "host frame has {} samples, expected {}",
                    len / 2,
                    self.frame_samples
                ),
            });
        }
        debug!(len, "received host audio frame");

        let samples = protocol::decode_i16(&self.buf[..len], self.byte_order);
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(AudioFrame::new(sequence, samples))
    }
}
