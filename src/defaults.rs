//! Default configuration constants for kwspot.
//!
//! Shared by the config types, the reference capabilities and the host-side
//! decoder so both ends of the link agree on the same values.

use crate::stream::protocol::ByteOrder;

/// Default audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Audio samples per captured frame.
///
/// 1024 samples at 16kHz is 64ms of audio per feature vector.
pub const FRAME_SAMPLES: usize = 1024;

/// Coefficients per feature vector (`x`).
pub const FEATURE_COUNT: usize = 13;

/// Feature vectors per inference window (`y`).
///
/// 62 frames of 64ms cover roughly four seconds of audio.
pub const WINDOW_FRAMES: usize = 62;

/// Default decision threshold applied to the maximum network output.
pub const THRESHOLD: f32 = 0.5;

/// Raw audio frames kept in the diagnostic ring for streaming to the host.
pub const DIAGNOSTIC_FRAMES: usize = 16;

/// Byte order of every multi-byte field on the host link.
///
/// Pinned for both ends: the host tooling reads little endian.
pub const WIRE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

/// Seed of the optional 16-bit additive payload checksum.
pub const CHECKSUM_SEED: u16 = 0x1234;

/// Log-energy floor used by the reference feature extractor.
pub const LOG_ENERGY_FLOOR: f32 = 1e-10;
