//! Serializes pipeline payloads into tagged frames on the host channel.

use bytes::BytesMut;
use tracing::warn;

use crate::error::{KwsError, Result};
use crate::stream::channel::HostChannel;
use crate::stream::protocol::{self, Dtype, StreamTag, WireFormat};

/// Best-effort encoder for the host link.
///
/// A failed send is returned to the caller and counted, but never leaves
/// the encoder in a state that affects later sends.
pub struct StreamEncoder {
    channel: Box<dyn HostChannel>,
    format: WireFormat,
    scratch: BytesMut,
    failures: u64,
    frames_sent: u64,
}

impl StreamEncoder {
    pub fn new(channel: Box<dyn HostChannel>, format: WireFormat) -> Self {
        Self {
            channel,
            format,
            scratch: BytesMut::new(),
            failures: 0,
            frames_sent: 0,
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Number of sends that failed since construction.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Number of frames handed to the channel successfully.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Send a block of raw 16-bit samples.
    pub fn send_raw_audio(&mut self, samples: &[i16], tag: StreamTag) -> Result<()> {
        self.begin(tag, Dtype::I16, samples.len())?;
        protocol::encode_i16(&mut self.scratch, samples, self.format.byte_order);
        self.finish(tag)
    }

    /// Send a flattened feature window.
    pub fn send_features(&mut self, window: &[f32], tag: StreamTag) -> Result<()> {
        self.send_f32(window, tag)
    }

    /// Send a network output vector.
    pub fn send_output(&mut self, output: &[f32], tag: StreamTag) -> Result<()> {
        self.send_f32(output, tag)
    }

    /// Send the zero-length ready signal.
    pub fn send_ready(&mut self) -> Result<()> {
        self.begin(StreamTag::Ready, Dtype::Empty, 0)?;
        self.finish(StreamTag::Ready)
    }

    /// Non-blocking check for unsolicited host traffic.
    pub fn host_activity(&mut self) -> bool {
        self.channel.has_pending()
    }

    /// Flush the underlying channel; failures are counted like sends.
    pub fn flush(&mut self) -> Result<()> {
        self.channel.flush().inspect_err(|e| {
            self.failures += 1;
            warn!(error = %e, "host channel flush failed");
        })
    }

    fn send_f32(&mut self, values: &[f32], tag: StreamTag) -> Result<()> {
        self.begin(tag, Dtype::F32, values.len())?;
        protocol::encode_f32(&mut self.scratch, values, self.format.byte_order);
        self.finish(tag)
    }

    fn begin(&mut self, tag: StreamTag, dtype: Dtype, element_count: usize) -> Result<()> {
        if tag.dtype() != dtype {
            return Err(KwsError::Protocol {
                message: format!("tag {tag:?} cannot carry {dtype:?} elements"),
            });
        }
        let count = u32::try_from(element_count).map_err(|_| KwsError::Protocol {
            message: format!("{element_count} elements exceed the 32-bit count field"),
        })?;

        self.scratch.clear();
        self.scratch.reserve(self.format.frame_len(tag, element_count));
        protocol::encode_header(&mut self.scratch, tag, count, self.format.byte_order);
        Ok(())
    }

    fn finish(&mut self, tag: StreamTag) -> Result<()> {
        if self.format.checksum {
            protocol::encode_checksum(
                &mut self.scratch,
                protocol::HEADER_LEN,
                self.format.byte_order,
            );
        }

        match self.channel.send(&self.scratch) {
            Ok(()) => {
                self.frames_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.failures += 1;
                warn!(?tag, error = %e, "host send failed");
                Err(e)
            }
        }
    }
}
