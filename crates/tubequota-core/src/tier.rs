//! Per-channel tier state with demotion after consecutive hard failures.
//!
//! Each channel starts at the primary tier. `demotion_threshold` consecutive
//! hard remote failures at a channel's current tier move it one tier cheaper
//! for the rest of the run; a success resets the counter. Demotion never
//! goes back up within a run.
//!
//! When `run_demotion_threshold` consecutive hard failures at one tier are
//! observed across channels, every channel is floored at the next cheaper
//! tier. Losing authentication floors everything at the free tier.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::warn;

use crate::domain::{ChannelId, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub demotion_threshold: u32,
    /// `None` disables run-wide demotion.
    pub run_demotion_threshold: Option<u32>,
    /// Tier every channel starts from.
    pub start_tier: Tier,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            demotion_threshold: 3,
            run_demotion_threshold: Some(5),
            start_tier: Tier::Primary,
        }
    }
}

/// Tier state for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelTier {
    pub tier: Tier,
    pub consecutive_failures: u32,
    pub demoted: bool,
}

/// Outcome of recording a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    Counted { consecutive_failures: u32 },
    Demoted { to: Tier },
    /// Failure at a tier other than the channel's current one.
    Ignored,
}

#[derive(Debug)]
struct TrackerInner {
    channels: HashMap<ChannelId, ChannelTier>,
    floor: Tier,
    run_failures: Option<(Tier, u32)>,
}

/// Thread-safe tier tracker shared by concurrent channel fetches.
#[derive(Debug)]
pub struct TierTracker {
    policy: TierPolicy,
    inner: Mutex<TrackerInner>,
}

impl Default for TierTracker {
    fn default() -> Self {
        Self::new(TierPolicy::default())
    }
}

impl TierTracker {
    pub fn new(policy: TierPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(TrackerInner {
                channels: HashMap::new(),
                floor: policy.start_tier,
                run_failures: None,
            }),
        }
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// Tier to attempt first for `channel`.
    pub fn current_tier(&self, channel: &ChannelId) -> Tier {
        let inner = self.lock();
        let own = inner
            .channels
            .get(channel)
            .map(|state| state.tier)
            .unwrap_or(self.policy.start_tier);
        own.max(inner.floor)
    }

    pub fn state(&self, channel: &ChannelId) -> ChannelTier {
        let inner = self.lock();
        let mut state = inner.channels.get(channel).copied().unwrap_or(ChannelTier {
            tier: self.policy.start_tier,
            consecutive_failures: 0,
            demoted: false,
        });
        if inner.floor > state.tier {
            state.tier = inner.floor;
            state.demoted = true;
        }
        state
    }

    /// Lowest tier any channel may use for the rest of the run.
    pub fn floor(&self) -> Tier {
        self.lock().floor
    }

    pub fn record_success(&self, channel: &ChannelId, tier: Tier) {
        let mut inner = self.lock();
        let start = self.policy.start_tier.max(inner.floor);
        let state = inner
            .channels
            .entry(channel.clone())
            .or_insert_with(|| fresh(start));
        if state.tier == tier {
            state.consecutive_failures = 0;
        }
        if matches!(inner.run_failures, Some((failing, _)) if failing == tier) {
            inner.run_failures = None;
        }
    }

    pub fn record_hard_failure(&self, channel: &ChannelId, tier: Tier) -> FailureVerdict {
        let mut inner = self.lock();
        self.note_run_failure(&mut inner, tier);

        let start = self.policy.start_tier.max(inner.floor);
        let floor = inner.floor;
        let state = inner
            .channels
            .entry(channel.clone())
            .or_insert_with(|| fresh(start));
        if state.tier < floor {
            state.tier = floor;
            state.consecutive_failures = 0;
            state.demoted = true;
        }
        if state.tier != tier {
            return FailureVerdict::Ignored;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures < self.policy.demotion_threshold {
            return FailureVerdict::Counted {
                consecutive_failures: state.consecutive_failures,
            };
        }

        match tier.cheaper() {
            Some(next) => {
                state.tier = next;
                state.consecutive_failures = 0;
                state.demoted = true;
                warn!(channel = %channel, from = %tier, to = %next, "channel demoted after repeated hard failures");
                FailureVerdict::Demoted { to: next }
            }
            None => FailureVerdict::Counted {
                consecutive_failures: state.consecutive_failures,
            },
        }
    }

    /// Floor every channel at the free tier, e.g. after authentication is lost.
    pub fn disable_authenticated_tiers(&self) {
        let mut inner = self.lock();
        if inner.floor < Tier::Tertiary {
            warn!("authenticated tiers disabled for the rest of the run");
            inner.floor = Tier::Tertiary;
        }
    }

    /// Forget every demotion so the next run starts at the policy's tier.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.channels.clear();
        inner.floor = self.policy.start_tier;
        inner.run_failures = None;
    }

    fn note_run_failure(&self, inner: &mut TrackerInner, tier: Tier) {
        let Some(threshold) = self.policy.run_demotion_threshold else {
            return;
        };
        if tier < inner.floor {
            return;
        }

        let count = match inner.run_failures {
            Some((failing, count)) if failing == tier => count.saturating_add(1),
            _ => 1,
        };
        inner.run_failures = Some((tier, count));

        if count >= threshold {
            if let Some(next) = tier.cheaper() {
                if next > inner.floor {
                    warn!(from = %tier, to = %next, failures = count, "run-wide demotion after repeated hard failures");
                    inner.floor = next;
                }
            }
            inner.run_failures = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fresh(tier: Tier) -> ChannelTier {
    ChannelTier {
        tier,
        consecutive_failures: 0,
        demoted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str) -> ChannelId {
        ChannelId::parse(id).expect("valid")
    }

    fn tracker(threshold: u32, run_threshold: Option<u32>) -> TierTracker {
        TierTracker::new(TierPolicy {
            demotion_threshold: threshold,
            run_demotion_threshold: run_threshold,
            start_tier: Tier::Primary,
        })
    }

    #[test]
    fn demotes_after_threshold_consecutive_failures() {
        let tracker = tracker(3, None);
        let a = channel("UCa");

        assert_eq!(
            tracker.record_hard_failure(&a, Tier::Primary),
            FailureVerdict::Counted { consecutive_failures: 1 }
        );
        tracker.record_hard_failure(&a, Tier::Primary);
        assert_eq!(
            tracker.record_hard_failure(&a, Tier::Primary),
            FailureVerdict::Demoted { to: Tier::Secondary }
        );

        let state = tracker.state(&a);
        assert_eq!(state.tier, Tier::Secondary);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.demoted);
    }

    #[test]
    fn success_resets_the_counter() {
        let tracker = tracker(3, None);
        let a = channel("UCa");

        tracker.record_hard_failure(&a, Tier::Primary);
        tracker.record_hard_failure(&a, Tier::Primary);
        tracker.record_success(&a, Tier::Primary);
        tracker.record_hard_failure(&a, Tier::Primary);

        assert_eq!(tracker.current_tier(&a), Tier::Primary);
        assert_eq!(tracker.state(&a).consecutive_failures, 1);
    }

    #[test]
    fn failures_at_fallback_tiers_do_not_count() {
        let tracker = tracker(1, None);
        let a = channel("UCa");

        assert_eq!(tracker.record_hard_failure(&a, Tier::Secondary), FailureVerdict::Ignored);
        assert_eq!(tracker.current_tier(&a), Tier::Primary);
    }

    #[test]
    fn free_tier_is_the_floor() {
        let tracker = tracker(1, None);
        let a = channel("UCa");

        tracker.record_hard_failure(&a, Tier::Primary);
        tracker.record_hard_failure(&a, Tier::Secondary);
        assert_eq!(tracker.current_tier(&a), Tier::Tertiary);
        assert!(matches!(
            tracker.record_hard_failure(&a, Tier::Tertiary),
            FailureVerdict::Counted { .. }
        ));
        assert_eq!(tracker.current_tier(&a), Tier::Tertiary);
    }

    #[test]
    fn run_wide_demotion_floors_untouched_channels() {
        let tracker = tracker(10, Some(2));

        tracker.record_hard_failure(&channel("UCa"), Tier::Primary);
        tracker.record_hard_failure(&channel("UCb"), Tier::Primary);

        assert_eq!(tracker.floor(), Tier::Secondary);
        assert_eq!(tracker.current_tier(&channel("UCz")), Tier::Secondary);
        assert!(tracker.state(&channel("UCz")).demoted);
    }

    #[test]
    fn success_between_failures_breaks_the_run_streak() {
        let tracker = tracker(10, Some(2));

        tracker.record_hard_failure(&channel("UCa"), Tier::Primary);
        tracker.record_success(&channel("UCb"), Tier::Primary);
        tracker.record_hard_failure(&channel("UCc"), Tier::Primary);

        assert_eq!(tracker.floor(), Tier::Primary);
    }

    #[test]
    fn reset_restores_the_start_tier_for_every_channel() {
        let tracker = tracker(1, Some(2));
        tracker.record_hard_failure(&channel("UCa"), Tier::Primary);
        tracker.record_hard_failure(&channel("UCb"), Tier::Primary);
        tracker.disable_authenticated_tiers();

        tracker.reset();

        assert_eq!(tracker.floor(), Tier::Primary);
        assert_eq!(tracker.current_tier(&channel("UCa")), Tier::Primary);
        assert!(!tracker.state(&channel("UCb")).demoted);
    }

    #[test]
    fn disabling_auth_floors_everything_at_free_tier() {
        let tracker = TierTracker::default();
        tracker.disable_authenticated_tiers();
        assert_eq!(tracker.current_tier(&channel("UCa")), Tier::Tertiary);
    }
}
