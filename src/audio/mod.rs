//! Audio sources and the raw-frame diagnostic ring.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod diag_ring;
pub mod host;
pub mod source;
pub mod wav;

pub use diag_ring::{DiagnosticRing, RingRetention};
pub use host::HostAudioSource;
pub use source::{AudioFrame, ContinuousAudioSource, MockAudioSource};
pub use wav::WavAudioSource;
