//! Per-run counters and timing for the keyword pipeline.

use std::time::Duration;

/// Counters and timings collected during one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub frames_captured: u64,
    pub inferences: u64,
    pub spotted: u64,
    pub transport_failures: u64,
    pub last_extract: Duration,
    pub total_extract: Duration,
    pub last_inference: Duration,
    pub total_inference: Duration,
}

impl RunStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records one captured frame and the time its extraction took.
    pub fn record_capture(&mut self, extract: Duration) {
        self.frames_captured += 1;
        self.last_extract = extract;
        self.total_extract += extract;
    }

    /// Records one inference and the time the engine took.
    pub fn record_inference(&mut self, elapsed: Duration, spotted: bool) {
        self.inferences += 1;
        self.last_inference = elapsed;
        self.total_inference += elapsed;
        if spotted {
            self.spotted += 1;
        }
    }

    pub fn mean_extract(&self) -> Duration {
        mean(self.total_extract, self.frames_captured)
    }

    pub fn mean_inference(&self) -> Duration {
        mean(self.total_inference, self.inferences)
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} frames, {} inferences, {} spotted | extract {} avg | inference {} avg{}",
            self.frames_captured,
            self.inferences,
            self.spotted,
            format_duration(self.mean_extract()),
            format_duration(self.mean_inference()),
            if self.transport_failures > 0 {
                format!(" | {} host sends failed", self.transport_failures)
            } else {
                String::new()
            }
        )
    }
}

fn mean(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

/// Formats a duration as a human-friendly string.
/// Under 1ms: "250us", under 1s: "450ms", at or above 1s: "1.5s".
fn format_duration(d: Duration) -> String {
    let us = d.as_micros();
    if us < 1000 {
        format!("{}us", us)
    } else if us < 1_000_000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
