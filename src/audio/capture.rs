//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::source::{AudioFrame, ContinuousAudioSource};
use crate::defaults;
use crate::error::{KwsError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, warn};

/// Chunks the audio callback may queue before new ones are dropped.
const CHUNK_QUEUE_DEPTH: usize = 256;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Device name patterns that are never useful as a keyword microphone.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// List usable audio input devices.
pub fn list_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| KwsError::CaptureFailed {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .collect())
}

/// Splits an arbitrary stream of sample chunks into fixed-length frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    pub fn push(&mut self, chunk: &[i16]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Take the next full frame, leaving the remainder queued.
    pub fn take_frame(&mut self) -> Option<Vec<i16>> {
        if self.pending.len() < self.frame_samples {
            return None;
        }
        let rest = self.pending.split_off(self.frame_samples);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched from the thread that owns the
/// `CpalAudioSource`, through `&mut self` methods.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Continuous microphone source delivering fixed-length 16kHz mono frames.
///
/// The CPAL callback forwards sample chunks over a bounded channel;
/// `next_frame` blocks on that channel until a full frame has accumulated.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Option<SendableStream>,
    chunk_tx: Sender<Vec<i16>>,
    chunk_rx: Receiver<Vec<i16>>,
    assembler: FrameAssembler,
    sequence: u64,
}

impl CpalAudioSource {
    /// Create a new CPAL audio source.
    ///
    /// # Arguments
    /// * `device_name` - Optional device name. If None, uses the default input device.
    /// * `frame_samples` - Samples per delivered frame
    pub fn new(device_name: Option<&str>, frame_samples: usize) -> Result<Self> {
        let device = with_suppressed_stderr(|| {
            let host = cpal::default_host();

            if let Some(name) = device_name {
                let devices = host
                    .input_devices()
                    .map_err(|e| KwsError::CaptureFailed {
                        message: format!("Failed to enumerate devices: {}", e),
                    })?;

                let mut found_device = None;
                for dev in devices {
                    if let Ok(dev_name) = dev.name()
                        && dev_name == name
                    {
                        found_device = Some(dev);
                        break;
                    }
                }

                found_device.ok_or_else(|| KwsError::AudioDeviceNotFound {
                    device: name.to_string(),
                })
            } else {
                host.default_input_device()
                    .ok_or_else(|| KwsError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    })
            }
        })?;

        let (chunk_tx, chunk_rx) = bounded(CHUNK_QUEUE_DEPTH);
        Ok(Self {
            device,
            stream: None,
            chunk_tx,
            chunk_rx,
            assembler: FrameAssembler::new(frame_samples),
            sequence: 0,
        })
    }

    /// Build the input stream, preferring i16 and falling back to f32.
    fn build_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(defaults::SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            warn!(error = %err, "audio stream error");
        };

        let tx = self.chunk_tx.clone();
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                forward_chunk(&tx, data.to_vec());
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let tx = self.chunk_tx.clone();
        self.device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let converted = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    forward_chunk(&tx, converted);
                },
                err_callback,
                None,
            )
            .map_err(|e| KwsError::CaptureFailed {
                message: format!("Failed to build input stream: {}", e),
            })
    }
}

fn forward_chunk(tx: &Sender<Vec<i16>>, chunk: Vec<i16>) {
    if let Err(TrySendError::Full(_)) = tx.try_send(chunk) {
        warn!("audio chunk queue full, dropping samples");
    }
}

impl ContinuousAudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        // stale samples from a previous run must not leak into this one
        while self.chunk_rx.try_recv().is_ok() {}
        self.assembler.clear();
        self.sequence = 0;

        let stream = self.build_stream()?;
        stream.play().map_err(|e| KwsError::CaptureFailed {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        debug!("microphone stream started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(sendable_stream) = self.stream.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| KwsError::CaptureFailed {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<AudioFrame> {
        loop {
            if let Some(samples) = self.assembler.take_frame() {
                let sequence = self.sequence;
                self.sequence += 1;
                return Ok(AudioFrame::new(sequence, samples));
            }
            let chunk = self.chunk_rx.recv().map_err(|e| KwsError::CaptureFailed {
                message: format!("audio stream closed: {}", e),
            })?;
            self.assembler.push(&chunk);
        }
    }
}
