use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use quanta::Mock;

/// Source of collection and measurement timestamps.
///
/// Timestamps are nanoseconds since the Unix epoch.  The wall-clock time is sampled once, when
/// the clock is created, and then advanced with a monotonic [`quanta::Clock`] so that timestamps
/// handed out by one clock never go backwards.
#[derive(Clone, Debug)]
pub struct Clock {
    inner: quanta::Clock,
    anchor: quanta::Instant,
    base: u64,
}

impl Clock {
    /// Creates a clock anchored at the current wall-clock time.
    pub fn new() -> Clock {
        let base = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Clock::anchored(quanta::Clock::new(), base)
    }

    /// Creates a mocked clock starting at the Unix epoch.
    ///
    /// Time only moves when the returned [`Mock`] is incremented.
    pub fn mock() -> (Clock, Arc<Mock>) {
        let (inner, mock) = quanta::Clock::mock();
        (Clock::anchored(inner, 0), mock)
    }

    fn anchored(inner: quanta::Clock, base: u64) -> Clock {
        let anchor = inner.now();
        Clock { inner, anchor, base }
    }

    /// Gets the current time, in nanoseconds since the Unix epoch.
    pub fn now(&self) -> u64 {
        let elapsed = self.inner.now().saturating_duration_since(self.anchor);
        self.base.saturating_add(elapsed.as_nanos() as u64)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}
