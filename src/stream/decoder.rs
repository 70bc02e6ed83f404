//! Host-side decoder for the tagged link stream.

use bytes::{Buf, BytesMut};

use crate::error::{KwsError, Result};
use crate::stream::protocol::{self, CHECKSUM_LEN, HEADER_LEN, StreamFrame, StreamTag, WireFormat};

/// Incremental frame parser.
///
/// Bytes may arrive in arbitrary pieces; `next_frame` yields a frame once
/// all of its bytes have been pushed.
pub struct FrameDecoder {
    format: WireFormat,
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            buf: BytesMut::new(),
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame, if any.
    ///
    /// A checksum mismatch consumes the whole offending frame. An unknown tag
    /// gives no length to skip, so only its tag byte is dropped and the next
    /// call resumes one byte later.
    pub fn next_frame(&mut self) -> Result<Option<StreamFrame>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let header: [u8; HEADER_LEN] = [
            self.buf[0],
            self.buf[1],
            self.buf[2],
            self.buf[3],
            self.buf[4],
        ];
        let tag = match StreamTag::try_from(header[0]) {
            Ok(tag) => tag,
            Err(e) => {
                // resync on the next byte
                self.buf.advance(1);
                return Err(e);
            }
        };
        let element_count = protocol::decode_count(&header, self.format.byte_order);
        let payload_len = element_count as usize * tag.dtype().element_size();
        let frame_len = self.format.frame_len(tag, element_count as usize);

        if self.buf.len() < frame_len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(payload_len).freeze();

        if self.format.checksum {
            let trailer = self.buf.split_to(CHECKSUM_LEN);
            protocol::verify_checksum(
                tag,
                &payload,
                [trailer[0], trailer[1]],
                self.format.byte_order,
            )?;
        }

        Ok(Some(StreamFrame {
            tag,
            element_count,
            payload,
        }))
    }
}

/// Decode a complete capture into frames.
///
/// Trailing bytes that do not form a whole frame are reported as an error.
pub fn decode_all(format: WireFormat, bytes: &[u8]) -> Result<Vec<StreamFrame>> {
    let mut decoder = FrameDecoder::new(format);
    decoder.push(bytes);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame()? {
        frames.push(frame);
    }

    if decoder.buffered() > 0 {
        return Err(KwsError::Protocol {
            message: format!("{} trailing bytes after last frame", decoder.buffered()),
        });
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::protocol::{ByteOrder, encode_f32, encode_header};

    fn feature_frame_bytes(values: &[f32], format: WireFormat) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_header(
            &mut buf,
            StreamTag::FeatureWindow,
            values.len() as u32,
            format.byte_order,
        );
        encode_f32(&mut buf, values, format.byte_order);
        if format.checksum {
            protocol::encode_checksum(&mut buf, HEADER_LEN, format.byte_order);
        }
        buf.to_vec()
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let bytes = feature_frame_bytes(&[1.0, 2.0], WireFormat::default());
        let mut decoder = FrameDecoder::new(WireFormat::default());

        decoder.push(&bytes[..3]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.push(&bytes[3..9]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.push(&bytes[9..]);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.tag, StreamTag::FeatureWindow);
        assert_eq!(frame.element_count, 2);
        assert_eq!(frame.as_f32(ByteOrder::Little).unwrap(), vec![1.0, 2.0]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_ready_frame_decodes_with_empty_payload() {
        let frames = decode_all(WireFormat::default(), &[0x3F, 0, 0, 0, 0]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].tag, StreamTag::Ready);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_protocol_error() {
        let mut decoder = FrameDecoder::new(WireFormat::default());
        decoder.push(&[0x77, 0, 0, 0, 0]);
        assert!(matches!(decoder.next_frame(), Err(KwsError::Protocol { .. })));
    }

    #[test]
    fn test_unknown_tag_skips_one_byte() {
        let mut bytes = vec![0x77];
        bytes.extend(feature_frame_bytes(&[2.0], WireFormat::default()));
        let mut decoder = FrameDecoder::new(WireFormat::default());
        decoder.push(&bytes);

        assert!(decoder.next_frame().is_err());
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.tag, StreamTag::FeatureWindow);
        assert_eq!(frame.as_f32(ByteOrder::Little).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_checksum_mismatch_consumes_frame() {
        let format = WireFormat {
            byte_order: ByteOrder::Little,
            checksum: true,
        };
        let mut bytes = feature_frame_bytes(&[1.0], format);
        bytes[HEADER_LEN] ^= 0x01;
        bytes.extend(feature_frame_bytes(&[4.0], format));
        let mut decoder = FrameDecoder::new(format);
        decoder.push(&bytes);

        assert!(decoder.next_frame().is_err());
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_f32(ByteOrder::Little).unwrap(), vec![4.0]);
    }

    #[test]
    fn test_checksum_verified() {
        let format = WireFormat {
            byte_order: ByteOrder::Little,
            checksum: true,
        };
        let mut bytes = feature_frame_bytes(&[3.5], format);
        assert_eq!(decode_all(format, &bytes).unwrap().len(), 1);

        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(decode_all(format, &bytes).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = feature_frame_bytes(&[1.0], WireFormat::default());
        bytes.push(0x3F);
        assert!(decode_all(WireFormat::default(), &bytes).is_err());
    }
}
