use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Client-side request pacing shared by every outgoing call.
///
/// Independent of the unit-quota ledger: this bounds requests per second,
/// the ledger bounds units per day.
#[derive(Clone)]
pub struct RequestPacer {
    limiter: Arc<DirectRateLimiter>,
    per_second: u32,
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer")
            .field("per_second", &self.per_second)
            .finish()
    }
}

impl RequestPacer {
    /// `per_second` of zero is treated as one.
    pub fn per_second(per_second: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
            per_second: rate.get(),
        }
    }

    pub fn rate(&self) -> u32 {
        self.per_second
    }

    /// Non-blocking check; on refusal returns how long to wait.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter.check().map_err(|not_until| {
            not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
        })
    }

    /// Wait until a request slot is available.
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_once_burst_is_spent() {
        let pacer = RequestPacer::per_second(2);

        assert!(pacer.try_acquire().is_ok());
        assert!(pacer.try_acquire().is_ok());

        let wait = pacer.try_acquire().expect_err("third request should wait");
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn zero_rate_is_clamped() {
        assert_eq!(RequestPacer::per_second(0).rate(), 1);
    }

    #[tokio::test]
    async fn until_ready_eventually_admits() {
        let pacer = RequestPacer::per_second(50);
        for _ in 0..60 {
            pacer.until_ready().await;
        }
    }
}
