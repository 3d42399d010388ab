use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::Instant;

/// Bytes moved since the last sample, and where the last sample ended.
pub struct IntervalMeter {
    transferred: AtomicU64,
    epoch: Instant,
    // nanoseconds since `epoch`
    last_interval_end: AtomicU64,
}

impl Default for IntervalMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalMeter {
    pub fn new() -> Self {
        IntervalMeter {
            transferred: AtomicU64::new(0),
            epoch: Instant::now(),
            last_interval_end: AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    pub fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Takes every byte counted so far, and the time elapsed since the previous call
    /// (since creation for the first call).
    pub fn take_interval(&self) -> (u64, Duration) {
        let transferred = self.transferred.swap(0, Ordering::AcqRel);
        let end = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let previous = self.last_interval_end.swap(end, Ordering::AcqRel);
        (transferred, Duration::from_nanos(end.saturating_sub(previous)))
    }
}
