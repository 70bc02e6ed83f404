//! Bounded history of raw audio frames for streaming to the host.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Which frames the ring keeps once it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RingRetention {
    /// Drop the oldest frame to make room for each new one.
    #[default]
    MostRecent,
    /// Keep the first frames of the run and ignore later ones.
    First,
}

/// Fixed-capacity ring of raw frames.
///
/// Storage is allocated once; `clear` keeps the allocation for the next run.
#[derive(Debug, Clone)]
pub struct DiagnosticRing {
    frames: VecDeque<Vec<i16>>,
    capacity: usize,
    retention: RingRetention,
    scratch: Vec<i16>,
}

impl DiagnosticRing {
    pub fn new(capacity: usize, retention: RingRetention) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            retention,
            scratch: Vec::new(),
        }
    }

    /// Record one frame according to the retention policy.
    pub fn push(&mut self, samples: &[i16]) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            match self.retention {
                RingRetention::First => return,
                RingRetention::MostRecent => {
                    // reuse the evicted frame's allocation
                    if let Some(mut evicted) = self.frames.pop_front() {
                        evicted.clear();
                        evicted.extend_from_slice(samples);
                        self.frames.push_back(evicted);
                        return;
                    }
                }
            }
        }
        self.frames.push_back(samples.to_vec());
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn retention(&self) -> RingRetention {
        self.retention
    }

    /// Retained frames, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = &[i16]> {
        self.frames.iter().map(Vec::as_slice)
    }

    /// All retained samples concatenated oldest first.
    pub fn contiguous(&mut self) -> &[i16] {
        self.scratch.clear();
        for frame in &self.frames {
            self.scratch.extend_from_slice(frame);
        }
        &self.scratch
    }

    /// Drop all frames, keeping storage.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.scratch.clear();
    }

    /// Reconfigure capacity and policy, dropping retained frames.
    pub fn reconfigure(&mut self, capacity: usize, retention: RingRetention) {
        self.clear();
        self.capacity = capacity;
        self.retention = retention;
        if self.frames.capacity() < capacity {
            self.frames.reserve(capacity - self.frames.len());
        }
    }
}
