//! Frame rate gate
//!
//! Admits at most one frame per interval. Frames arriving inside the window
//! are dropped, never queued.

use std::time::{Duration, Instant};

/// Default spacing between pipeline runs
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    last_admitted: Option<Instant>,
}

impl Default for FrameThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl FrameThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Admit a frame arriving now
    pub fn try_admit(&mut self) -> bool {
        self.try_admit_at(Instant::now())
    }

    /// Admit a frame arriving at `now`
    ///
    /// The first frame is always admitted. A frame is admitted when at
    /// least `interval` has passed since the last admitted one.
    pub fn try_admit_at(&mut self, now: Instant) -> bool {
        let admit = match self.last_admitted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if admit {
            self.last_admitted = Some(now);
        }
        admit
    }

    /// Forget the last admitted frame
    pub fn reset(&mut self) {
        self.last_admitted = None;
    }
}
