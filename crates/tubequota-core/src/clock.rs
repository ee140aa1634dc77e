//! Injectable time source so period rollover and cache freshness are testable.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::domain::UtcDateTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<UtcDateTime>,
}

impl ManualClock {
    pub fn new(start: UtcDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, value: UtcDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.saturating_add(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_resets() {
        let start = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid");
        let clock = ManualClock::new(start);

        clock.advance(Duration::from_secs(3_600));
        assert_eq!(clock.now().format_rfc3339(), "2024-01-01T01:00:00Z");

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
