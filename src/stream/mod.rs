//! Host diagnostics link.
//!
//! ```text
//! pipeline ──▶ StreamEncoder ──▶ HostChannel ══ link ══▶ FrameDecoder (host)
//!                 tag | count | payload [| checksum]
//! ```

pub mod channel;
pub mod decoder;
pub mod encoder;
pub mod protocol;

pub use channel::{HostChannel, IoChannel, MemoryChannel, NullChannel, SharedChannel};
pub use decoder::{FrameDecoder, decode_all};
pub use encoder::StreamEncoder;
pub use protocol::{ByteOrder, Dtype, StreamFrame, StreamTag, TagSet, WireFormat};
