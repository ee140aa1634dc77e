//! Daily unit-quota ledger.
//!
//! Spending is two-phase: [`QuotaLedger::reserve`] claims units before a call
//! and the reservation is later either [`committed`](QuotaLedger::commit) or
//! [`released`](QuotaLedger::release). The check against the enforced ceiling
//! (`daily_limit - safety_buffer`) counts in-flight reservations, so two
//! concurrent reservations can never jointly overshoot it.
//!
//! The period rolls over at local midnight of a fixed reference UTC offset.
//! Rollover is applied on load and on every status or reserve call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use time::macros::{format_description, offset};
use time::{Date, UtcOffset};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::data_source::{FetchError, Operation};
use crate::domain::Tier;
use crate::persistence::{MemoryStore, StateStore};
use crate::ValidationError;

pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Limits and calendar for the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub daily_limit: u64,
    pub safety_buffer: u64,
    /// Offset whose local midnight starts a new quota period.
    pub reference_offset: UtcOffset,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            daily_limit: 10_000,
            safety_buffer: 500,
            reference_offset: offset!(-8),
        }
    }
}

impl QuotaPolicy {
    pub fn new(daily_limit: u64, safety_buffer: u64, reference_offset: UtcOffset) -> Result<Self, ValidationError> {
        if daily_limit == 0 {
            return Err(ValidationError::ZeroValue { field: "daily_limit" });
        }
        if safety_buffer >= daily_limit {
            return Err(ValidationError::BufferExceedsLimit {
                buffer: safety_buffer,
                limit: daily_limit,
            });
        }
        Ok(Self {
            daily_limit,
            safety_buffer,
            reference_offset,
        })
    }

    /// Units that may actually be spent in a period.
    pub fn ceiling(&self) -> u64 {
        self.daily_limit.saturating_sub(self.safety_buffer)
    }
}

/// Persisted state for one quota period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(with = "period_date")]
    pub period_start: Date,
    pub units_consumed: u64,
    #[serde(default)]
    pub by_operation: BTreeMap<Operation, u64>,
    /// Units that cache hits avoided spending.
    #[serde(default)]
    pub saved_units: u64,
    #[serde(default)]
    pub halted: bool,
}

impl LedgerRecord {
    fn fresh(period_start: Date) -> Self {
        Self {
            period_start,
            units_consumed: 0,
            by_operation: BTreeMap::new(),
            saved_units: 0,
            halted: false,
        }
    }
}

mod period_date {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::macros::format_description;
    use time::Date;

    pub fn serialize<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Date::parse(&raw, format_description!("[year]-[month]-[day]")).map_err(D::Error::custom)
    }
}

/// Outstanding claim on units; consumed by commit or release.
#[must_use = "a reservation must be committed or released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    id: u64,
    operation: Operation,
    units: u64,
}

impl Reservation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn units(&self) -> u64 {
        self.units
    }
}

/// Why a reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaDenial {
    pub operation: Operation,
    pub requested: u64,
    pub available: u64,
    pub halted: bool,
}

impl From<QuotaDenial> for FetchError {
    fn from(denial: QuotaDenial) -> Self {
        let reason = if denial.halted {
            String::from("quota ledger is halted")
        } else {
            format!(
                "{} needs {} units but only {} remain",
                denial.operation, denial.requested, denial.available
            )
        };
        FetchError::quota_denied(reason)
    }
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub period_start: String,
    pub daily_limit: u64,
    pub safety_buffer: u64,
    pub ceiling: u64,
    pub consumed: u64,
    pub reserved: u64,
    pub remaining: u64,
    pub saved_units: u64,
    pub halted: bool,
    pub by_operation: BTreeMap<Operation, u64>,
    /// False once any ledger write failed this process.
    pub persisted: bool,
}

/// Projected unit spend for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    pub channels: usize,
    pub subscription_units: u64,
    pub discovery_units: u64,
    pub enrichment_units: u64,
    pub total_units: u64,
    pub remaining_units: u64,
    pub fits: bool,
}

/// Shape of a collection for cost projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimateInput {
    pub channels: usize,
    pub items_per_channel: usize,
    pub start_tier: Tier,
    pub lists_subscriptions: bool,
}

impl EstimateInput {
    pub fn subscription_units(&self) -> u64 {
        if !self.lists_subscriptions {
            return 0;
        }
        as_u64(self.channels.div_ceil(50).max(1)) * Operation::ListSubscriptions.unit_cost()
    }

    pub fn discovery_units(&self) -> u64 {
        let per_channel = match self.start_tier {
            Tier::Primary => Operation::Search.unit_cost(),
            // uploads lookup plus one playlist page
            Tier::Secondary => Operation::ChannelDetails.unit_cost() + Operation::PlaylistItems.unit_cost(),
            Tier::Tertiary => Operation::PublicFeed.unit_cost(),
        };
        as_u64(self.channels) * per_channel
    }

    pub fn enrichment_units(&self) -> u64 {
        if !self.start_tier.supports_statistics() {
            return 0;
        }
        Operation::VideoStatistics.cost_for(self.channels.saturating_mul(self.items_per_channel))
    }
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[derive(Debug)]
struct LedgerInner {
    record: LedgerRecord,
    reserved: u64,
    persisted: bool,
    /// Process-local stop, e.g. on user abort; not persisted.
    suspended: bool,
}

/// Authoritative record of units spent in the current period.
pub struct QuotaLedger {
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore<LedgerRecord>>,
    inner: Mutex<LedgerInner>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl QuotaLedger {
    /// Load the persisted period (rolling it over if stale). An unreadable
    /// record is logged and replaced by a fresh period.
    pub fn open(policy: QuotaPolicy, store: Arc<dyn StateStore<LedgerRecord>>, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now().date_at(policy.reference_offset);
        let (record, persisted) = match store.load() {
            Ok(Some(record)) => (record, true),
            Ok(None) => (LedgerRecord::fresh(today), true),
            Err(error) => {
                warn!(error = %error, "quota ledger unreadable; starting a fresh period");
                (LedgerRecord::fresh(today), false)
            }
        };

        let ledger = Self {
            policy,
            clock,
            store,
            inner: Mutex::new(LedgerInner {
                record,
                reserved: 0,
                persisted,
                suspended: false,
            }),
            next_id: AtomicU64::new(1),
        };
        ledger.with_rollover(|_| ());
        ledger
    }

    pub fn in_memory(policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
        Self::open(policy, Arc::new(MemoryStore::new()), clock)
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Atomically claim `units` for `operation`.
    pub fn reserve(&self, operation: Operation, units: u64) -> Result<Reservation, QuotaDenial> {
        self.with_rollover(|inner| {
            let available = self.available(inner);
            let halted = inner.record.halted || inner.suspended;
            if halted || units > available {
                debug!(
                    operation = operation.as_str(),
                    requested = units,
                    available,
                    halted,
                    "quota reservation denied"
                );
                return Err(QuotaDenial {
                    operation,
                    requested: units,
                    available,
                    halted,
                });
            }

            inner.reserved += units;
            Ok(Reservation {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                operation,
                units,
            })
        })
    }

    /// Convert a reservation into consumed units.
    pub fn commit(&self, reservation: Reservation) {
        let mut inner = self.lock();
        inner.reserved = inner.reserved.saturating_sub(reservation.units);
        inner.record.units_consumed += reservation.units;
        *inner
            .record
            .by_operation
            .entry(reservation.operation)
            .or_insert(0) += reservation.units;

        if inner.record.units_consumed >= self.policy.ceiling() && !inner.record.halted {
            inner.record.halted = true;
            info!(
                consumed = inner.record.units_consumed,
                ceiling = self.policy.ceiling(),
                "quota ceiling reached; halting further reservations"
            );
        }
        self.persist(&mut inner);
    }

    /// Return reserved units unused.
    pub fn release(&self, reservation: Reservation) {
        let mut inner = self.lock();
        inner.reserved = inner.reserved.saturating_sub(reservation.units);
    }

    /// Credit units avoided by a cache hit.
    pub fn record_saved(&self, units: u64) {
        if units == 0 {
            return;
        }
        let mut inner = self.lock();
        inner.record.saved_units += units;
        self.persist(&mut inner);
    }

    /// Stop granting reservations for the rest of the period.
    pub fn halt(&self) {
        let mut inner = self.lock();
        if !inner.record.halted {
            inner.record.halted = true;
            info!("quota ledger halted on request");
            self.persist(&mut inner);
        }
    }

    /// Deny every further reservation in this process only. The persisted
    /// period is untouched, so the next invocation spends normally.
    pub fn suspend(&self) {
        let mut inner = self.lock();
        if !inner.suspended {
            inner.suspended = true;
            info!("quota reservations suspended for this process");
        }
    }

    pub fn is_halted(&self) -> bool {
        self.with_rollover(|inner| inner.record.halted || inner.suspended)
    }

    pub fn status(&self) -> QuotaStatus {
        self.with_rollover(|inner| QuotaStatus {
            period_start: inner.record.period_start.to_string(),
            daily_limit: self.policy.daily_limit,
            safety_buffer: self.policy.safety_buffer,
            ceiling: self.policy.ceiling(),
            consumed: inner.record.units_consumed,
            reserved: inner.reserved,
            remaining: self.available(inner),
            saved_units: inner.record.saved_units,
            halted: inner.record.halted || inner.suspended,
            by_operation: inner.record.by_operation.clone(),
            persisted: inner.persisted,
        })
    }

    pub fn estimate(&self, input: EstimateInput) -> CostEstimate {
        let subscription_units = input.subscription_units();
        let discovery_units = input.discovery_units();
        let enrichment_units = input.enrichment_units();
        let total_units = subscription_units + discovery_units + enrichment_units;
        let remaining_units = self.status().remaining;

        CostEstimate {
            channels: input.channels,
            subscription_units,
            discovery_units,
            enrichment_units,
            total_units,
            remaining_units,
            fits: total_units <= remaining_units,
        }
    }

    fn available(&self, inner: &LedgerInner) -> u64 {
        self.policy
            .ceiling()
            .saturating_sub(inner.record.units_consumed)
            .saturating_sub(inner.reserved)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_rollover<R>(&self, f: impl FnOnce(&mut LedgerInner) -> R) -> R {
        let mut inner = self.lock();
        let today = self.clock.now().date_at(self.policy.reference_offset);
        if today > inner.record.period_start {
            info!(
                previous = %inner.record.period_start,
                current = %today,
                consumed = inner.record.units_consumed,
                "quota period rolled over"
            );
            inner.record = LedgerRecord::fresh(today);
            self.persist(&mut inner);
        }
        f(&mut inner)
    }

    fn persist(&self, inner: &mut LedgerInner) {
        if let Err(error) = self.store.save(&inner.record) {
            if inner.persisted {
                warn!(error = %error, "failed to persist quota ledger; continuing in memory");
            }
            inner.persisted = false;
        }
    }
}

/// Parse `+HH:MM` / `-HH:MM` (or `Z`) into an offset.
pub fn parse_utc_offset(value: &str) -> Result<UtcOffset, ValidationError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(trimmed, format_description!("[offset_hour sign:mandatory]:[offset_minute]"))
        .map_err(|_| ValidationError::InvalidUtcOffset {
            value: value.to_owned(),
        })
}
