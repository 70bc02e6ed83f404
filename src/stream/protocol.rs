//! Tagged frame format of the host diagnostics link.
//!
//! Frame layout:
//! - tag (1 byte): payload kind, see [`StreamTag`]
//! - element_count (4 bytes): number of payload elements
//! - payload (element_count * element size bytes); the element type is
//!   implied by the tag
//! - [optional] checksum (2 bytes): wrapping sum of payload bytes, seeded
//!   with [`defaults::CHECKSUM_SEED`]
//!
//! Multi-byte fields use the byte order pinned in [`WireFormat`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{KwsError, Result};

/// Length of the frame header in bytes.
pub const HEADER_LEN: usize = 5;

/// Length of the optional checksum trailer in bytes.
pub const CHECKSUM_LEN: usize = 2;

/// Payload kind identifier.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTag {
    /// Feature window computed from host-supplied audio.
    HostFeatureWindow = 0x20,
    /// Network output computed from host-supplied audio.
    HostInferenceOutput = 0x21,
    /// Block of raw microphone samples (16-bit).
    RawAudio = 0x30,
    /// Feature window computed from microphone audio.
    FeatureWindow = 0x31,
    /// Network output computed from microphone audio.
    InferenceOutput = 0x32,
    /// Zero-length pacing signal.
    Ready = 0x3F,
}

impl StreamTag {
    /// Element type carried by frames with this tag.
    pub fn dtype(self) -> Dtype {
        match self {
            StreamTag::RawAudio => Dtype::I16,
            StreamTag::HostFeatureWindow
            | StreamTag::HostInferenceOutput
            | StreamTag::FeatureWindow
            | StreamTag::InferenceOutput => Dtype::F32,
            StreamTag::Ready => Dtype::Empty,
        }
    }
}

impl From<StreamTag> for u8 {
    fn from(tag: StreamTag) -> Self {
        tag as u8
    }
}

impl TryFrom<u8> for StreamTag {
    type Error = KwsError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0x20 => Ok(StreamTag::HostFeatureWindow),
            0x21 => Ok(StreamTag::HostInferenceOutput),
            0x30 => Ok(StreamTag::RawAudio),
            0x31 => Ok(StreamTag::FeatureWindow),
            0x32 => Ok(StreamTag::InferenceOutput),
            0x3F => Ok(StreamTag::Ready),
            other => Err(KwsError::Protocol {
                message: format!("unknown stream tag 0x{other:02x}"),
            }),
        }
    }
}

/// Payload element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    I16,
    F32,
    Empty,
}

impl Dtype {
    /// Size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            Dtype::I16 => 2,
            Dtype::F32 => 4,
            Dtype::Empty => 0,
        }
    }
}

/// Tags used for one run, selected by where the audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TagSet {
    /// Audio captured by the device microphone.
    #[default]
    Microphone,
    /// Audio frames received from the host.
    HostFed,
}

impl TagSet {
    pub fn features(self) -> StreamTag {
        match self {
            TagSet::Microphone => StreamTag::FeatureWindow,
            TagSet::HostFed => StreamTag::HostFeatureWindow,
        }
    }

    pub fn output(self) -> StreamTag {
        match self {
            TagSet::Microphone => StreamTag::InferenceOutput,
            TagSet::HostFed => StreamTag::HostInferenceOutput,
        }
    }
}

/// Byte order of multi-byte fields on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Encoding parameters both ends of the link must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    pub byte_order: ByteOrder,
    pub checksum: bool,
}

impl Default for WireFormat {
    fn default() -> Self {
        Self {
            byte_order: defaults::WIRE_BYTE_ORDER,
            checksum: false,
        }
    }
}

impl WireFormat {
    /// Total encoded size of a frame carrying `element_count` elements of `tag`.
    pub fn frame_len(&self, tag: StreamTag, element_count: usize) -> usize {
        let trailer = if self.checksum { CHECKSUM_LEN } else { 0 };
        HEADER_LEN + element_count * tag.dtype().element_size() + trailer
    }
}

/// Wrapping 16-bit sum of `bytes`, starting from `seed`.
pub fn checksum(seed: u16, bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(seed, |acc, &b| acc.wrapping_add(u16::from(b)))
}

fn put_u16(buf: &mut BytesMut, v: u16, order: ByteOrder) {
    match order {
        ByteOrder::Little => buf.put_u16_le(v),
        ByteOrder::Big => buf.put_u16(v),
    }
}

fn put_u32(buf: &mut BytesMut, v: u32, order: ByteOrder) {
    match order {
        ByteOrder::Little => buf.put_u32_le(v),
        ByteOrder::Big => buf.put_u32(v),
    }
}

/// Appends the 5-byte header for a frame.
pub fn encode_header(buf: &mut BytesMut, tag: StreamTag, element_count: u32, order: ByteOrder) {
    buf.put_u8(tag.into());
    put_u32(buf, element_count, order);
}

/// Appends `samples` as 16-bit payload elements.
pub fn encode_i16(buf: &mut BytesMut, samples: &[i16], order: ByteOrder) {
    buf.reserve(samples.len() * 2);
    for &s in samples {
        match order {
            ByteOrder::Little => buf.put_i16_le(s),
            ByteOrder::Big => buf.put_i16(s),
        }
    }
}

/// Appends `values` as 32-bit float payload elements.
pub fn encode_f32(buf: &mut BytesMut, values: &[f32], order: ByteOrder) {
    buf.reserve(values.len() * 4);
    for &v in values {
        match order {
            ByteOrder::Little => buf.put_f32_le(v),
            ByteOrder::Big => buf.put_f32(v),
        }
    }
}

/// Appends the checksum trailer over the payload that starts at `payload_start`.
pub fn encode_checksum(buf: &mut BytesMut, payload_start: usize, order: ByteOrder) {
    let sum = checksum(defaults::CHECKSUM_SEED, &buf[payload_start..]);
    put_u16(buf, sum, order);
}

/// Checks a received checksum trailer against its payload.
pub fn verify_checksum(
    tag: StreamTag,
    payload: &[u8],
    trailer: [u8; CHECKSUM_LEN],
    order: ByteOrder,
) -> Result<()> {
    let received = match order {
        ByteOrder::Little => u16::from_le_bytes(trailer),
        ByteOrder::Big => u16::from_be_bytes(trailer),
    };
    let computed = checksum(defaults::CHECKSUM_SEED, payload);
    if received != computed {
        return Err(KwsError::Protocol {
            message: format!(
                "checksum mismatch on {tag:?}: received 0x{received:04x}, \
                 computed 0x{computed:04x}"
            ),
        });
    }
    Ok(())
}

/// Decodes a 16-bit payload.
pub fn decode_i16(payload: &[u8], order: ByteOrder) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|c| {
            let raw = [c[0], c[1]];
            match order {
                ByteOrder::Little => i16::from_le_bytes(raw),
                ByteOrder::Big => i16::from_be_bytes(raw),
            }
        })
        .collect()
}

/// Decodes a 32-bit float payload.
pub fn decode_f32(payload: &[u8], order: ByteOrder) -> Vec<f32> {
    payload
        .chunks_exact(4)
        .map(|c| {
            let raw = [c[0], c[1], c[2], c[3]];
            match order {
                ByteOrder::Little => f32::from_le_bytes(raw),
                ByteOrder::Big => f32::from_be_bytes(raw),
            }
        })
        .collect()
}

/// Reads the element count field of a header.
pub fn decode_count(header: &[u8; HEADER_LEN], order: ByteOrder) -> u32 {
    let raw = [header[1], header[2], header[3], header[4]];
    match order {
        ByteOrder::Little => u32::from_le_bytes(raw),
        ByteOrder::Big => u32::from_be_bytes(raw),
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    pub tag: StreamTag,
    pub element_count: u32,
    pub payload: Bytes,
}

impl StreamFrame {
    /// Payload as 16-bit samples.
    pub fn as_i16(&self, order: ByteOrder) -> Result<Vec<i16>> {
        self.expect_dtype(Dtype::I16)?;
        Ok(decode_i16(&self.payload, order))
    }

    /// Payload as 32-bit floats.
    pub fn as_f32(&self, order: ByteOrder) -> Result<Vec<f32>> {
        self.expect_dtype(Dtype::F32)?;
        Ok(decode_f32(&self.payload, order))
    }

    fn expect_dtype(&self, dtype: Dtype) -> Result<()> {
        if self.tag.dtype() == dtype {
            Ok(())
        } else {
            Err(KwsError::Protocol {
                message: format!("frame {:?} does not carry {:?} elements", self.tag, dtype),
            })
        }
    }
}
