//! Time source abstraction.
//!
//! The session reads the time for debounce deadlines and the trace
//! orchestrator for elapsed-time reporting. `web-time` supplies an
//! `Instant` backed by `performance.now()` on WASM and
//! `std::time::Instant` on native.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use web_time::Instant;

/// A monotonic time source.
pub trait Clock {
    /// The current instant.
    fn now(&self) -> Instant;

    /// Time elapsed since `since`, saturating at zero.
    fn elapsed(&self, since: Instant) -> Duration {
        self.now().saturating_duration_since(since)
    }
}

/// [`Clock`] backed by the platform's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-advanced [`Clock`] for deterministic tests and replays.
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the session.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    /// A clock frozen at the moment of creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert_eq!(clock.elapsed(start), Duration::ZERO);

        let shared = clock.clone();
        shared.advance(Duration::from_millis(150));
        assert_eq!(clock.elapsed(start), Duration::from_millis(150));
    }

    #[test]
    fn elapsed_saturates_for_future_instants() {
        let clock = ManualClock::new();
        let later = clock.now() + Duration::from_secs(1);
        assert_eq!(clock.elapsed(later), Duration::ZERO);
    }
}
