//! Monotonic pipeline clock (§4.5.3 step 4: "derives per-buffer timestamps
//! anchored to the pipeline clock").
//!
//! A real GStreamer pipeline supplies `GstClock`; this stands in with a
//! plain monotonic epoch so the engines have something to anchor capture
//! and playout timestamps to without depending on that framework.

use std::time::{Duration, Instant};

/// A monotonic clock anchored at construction time. `running_time` later
/// converts an absolute `Instant` into a duration since that anchor, the
/// same quantity GStreamer calls "running time".
#[derive(Debug, Clone)]
pub struct PipelineClock {
    epoch: Instant,
}

impl Default for PipelineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Running time of a past `Instant`, saturating to zero if it
    /// predates the epoch (can happen if a driver frame-stamp is translated
    /// from a slightly different base clock).
    pub fn running_time_of(&self, instant: Instant) -> Duration {
        instant.saturating_duration_since(self.epoch)
    }
}
