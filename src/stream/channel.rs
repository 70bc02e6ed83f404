//! Byte-oriented link to the host.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{KwsError, Result};
use crate::stream::protocol::{self, CHECKSUM_LEN, HEADER_LEN, StreamTag, WireFormat};

/// Trait for the transport to the host.
///
/// Implementations own the bit-level framing of the physical link; this
/// crate only hands them complete tagged frames.
pub trait HostChannel: Send {
    /// Send one encoded frame.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive one tagged frame from the host into `buf`.
    ///
    /// A frame whose payload is longer than `max_len` (or `buf`) is an
    /// error; it is never truncated.
    ///
    /// # Returns
    /// Number of payload bytes written and the frame's tag byte
    fn receive(&mut self, buf: &mut [u8], max_len: usize) -> Result<(usize, u8)>;

    /// Non-blocking check for unsolicited host activity.
    fn has_pending(&mut self) -> bool;

    /// Push out anything buffered by the transport.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl HostChannel for Box<dyn HostChannel> {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }

    fn receive(&mut self, buf: &mut [u8], max_len: usize) -> Result<(usize, u8)> {
        (**self).receive(buf, max_len)
    }

    fn has_pending(&mut self) -> bool {
        (**self).has_pending()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Channel shared between the stream encoder and a host-fed audio source.
pub struct SharedChannel<C: HostChannel> {
    inner: Arc<Mutex<C>>,
}

impl<C: HostChannel> Clone for SharedChannel<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: HostChannel> SharedChannel<C> {
    pub fn new(channel: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(channel)),
        }
    }

    /// Lock the underlying channel.
    pub fn lock(&self) -> Result<MutexGuard<'_, C>> {
        self.inner.lock().map_err(|_| KwsError::TransportFailed {
            message: "host channel lock poisoned".to_string(),
        })
    }
}

impl<C: HostChannel> HostChannel for SharedChannel<C> {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.lock()?.send(bytes)
    }

    fn receive(&mut self, buf: &mut [u8], max_len: usize) -> Result<(usize, u8)> {
        self.lock()?.receive(buf, max_len)
    }

    fn has_pending(&mut self) -> bool {
        self.lock().map(|mut c| c.has_pending()).unwrap_or(false)
    }

    fn flush(&mut self) -> Result<()> {
        self.lock()?.flush()
    }
}

/// In-memory channel: records everything sent and serves queued host frames.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    sent: Vec<u8>,
    inbound: VecDeque<(u8, Vec<u8>)>,
    fail_sends: bool,
    sends: usize,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure every send to fail, as if no host were attached.
    pub fn with_send_failure(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Queue a frame the device will read with `receive`.
    pub fn queue_inbound(&mut self, tag: u8, payload: Vec<u8>) {
        self.inbound.push_back((tag, payload));
    }

    /// All bytes sent so far.
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Number of `send` calls, including failed ones.
    pub fn send_calls(&self) -> usize {
        self.sends
    }
}

impl HostChannel for MemoryChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.sends += 1;
        if self.fail_sends {
            return Err(KwsError::TransportFailed {
                message: "host not connected".to_string(),
            });
        }
        self.sent.extend_from_slice(bytes);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], max_len: usize) -> Result<(usize, u8)> {
        let (tag, payload) = self
            .inbound
            .pop_front()
            .ok_or_else(|| KwsError::TransportFailed {
                message: "no inbound frame queued".to_string(),
            })?;
        let capacity = max_len.min(buf.len());
        if payload.len() > capacity {
            return Err(oversized(payload.len(), capacity));
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok((payload.len(), tag))
    }

    fn has_pending(&mut self) -> bool {
        !self.inbound.is_empty()
    }
}

/// Channel that discards everything, used when streaming is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChannel;

impl HostChannel for NullChannel {
    fn send(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn receive(&mut self, _buf: &mut [u8], _max_len: usize) -> Result<(usize, u8)> {
        Err(KwsError::TransportFailed {
            message: "null channel has no host".to_string(),
        })
    }

    fn has_pending(&mut self) -> bool {
        false
    }
}

/// Channel over blocking byte streams (serial device, file, pipe).
///
/// Inbound frames use the same tagged layout as outbound ones, including
/// the checksum trailer when the format enables it. A rejected inbound
/// frame leaves the reader mid-frame, so the link must be resynchronised
/// by the host before the next run.
pub struct IoChannel<W: Write + Send> {
    writer: W,
    reader: Option<Box<dyn Read + Send>>,
    format: WireFormat,
    flush_each_frame: bool,
}

impl<W: Write + Send> IoChannel<W> {
    /// Create a send-only channel.
    pub fn new(writer: W, format: WireFormat) -> Self {
        Self {
            writer,
            reader: None,
            format,
            flush_each_frame: false,
        }
    }

    /// Attach a reader for frames coming from the host.
    pub fn with_reader(mut self, reader: Box<dyn Read + Send>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Flush the writer after every frame, for links the host paces on.
    pub fn with_flush_each_frame(mut self) -> Self {
        self.flush_each_frame = true;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consume the channel and return the writer.
    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> HostChannel for IoChannel<W> {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .map_err(|e| KwsError::TransportFailed {
                message: format!("write to host failed: {e}"),
            })?;
        if self.flush_each_frame {
            self.flush()?;
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], max_len: usize) -> Result<(usize, u8)> {
        let format = self.format;
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| KwsError::TransportFailed {
                message: "channel has no inbound stream".to_string(),
            })?;

        let read_err = |e: std::io::Error| KwsError::TransportFailed {
            message: format!("read from host failed: {e}"),
        };

        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).map_err(read_err)?;
        let tag = StreamTag::try_from(header[0])?;
        let count = protocol::decode_count(&header, format.byte_order) as usize;
        let payload_len = count.saturating_mul(tag.dtype().element_size());

        // checked before reading so a corrupt count never sizes a buffer
        let capacity = max_len.min(buf.len());
        if payload_len > capacity {
            return Err(oversized(payload_len, capacity));
        }
        let payload = &mut buf[..payload_len];
        reader.read_exact(payload).map_err(read_err)?;

        if format.checksum {
            let mut trailer = [0u8; CHECKSUM_LEN];
            reader.read_exact(&mut trailer).map_err(read_err)?;
            protocol::verify_checksum(tag, payload, trailer, format.byte_order)?;
        }

        Ok((payload_len, tag.into()))
    }

    /// Always `false`: a blocking reader cannot be polled without consuming
    /// bytes. Use a channel with a real readiness check for host-activity
    /// aborts.
    fn has_pending(&mut self) -> bool {
        false
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| KwsError::TransportFailed {
            message: format!("flush to host failed: {e}"),
        })
    }
}

fn oversized(len: usize, capacity: usize) -> KwsError {
    KwsError::TransportFailed {
        message: format!("host frame carries {len} payload bytes, at most {capacity} accepted"),
    }
}
