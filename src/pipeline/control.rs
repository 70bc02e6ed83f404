//! Side-effecting controls: the detection indicator and the abort signal.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

/// State shown on the detection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Positive,
    Negative,
}

/// Trait for the visual/physical detection indicator (LED, GPIO...).
pub trait IndicatorControl: Send {
    fn set_state(&mut self, state: Indicator);
}

/// Logs indicator changes; the default indicator on hosts without LEDs.
#[derive(Debug, Default)]
pub struct LogIndicator {
    current: Option<Indicator>,
}

impl IndicatorControl for LogIndicator {
    fn set_state(&mut self, state: Indicator) {
        if self.current != Some(state) {
            if state == Indicator::Positive {
                info!("keyword spotted");
            }
            self.current = Some(state);
        }
    }
}

/// Records every state it is given, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    states: Arc<Mutex<Vec<Indicator>>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<Indicator> {
        self.states.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl IndicatorControl for RecordingIndicator {
    fn set_state(&mut self, state: Indicator) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
    }
}

/// Trait for the polled abort condition (button, host interrupt...).
pub trait AbortSignal: Send {
    fn is_requested(&self) -> bool;
}

/// Never requests an abort.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn is_requested(&self) -> bool {
        false
    }
}

/// Shared flag raised from another thread (button handler, Ctrl-C).
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    raised: Arc<AtomicBool>,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }
}

impl AbortSignal for AbortFlag {
    fn is_requested(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Answers `false` for the first `polls` checks, `true` afterwards.
#[derive(Debug, Default)]
pub struct CountdownAbort {
    remaining: AtomicUsize,
}

impl CountdownAbort {
    pub fn new(polls: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(polls),
        }
    }
}

impl AbortSignal for CountdownAbort {
    fn is_requested(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}
