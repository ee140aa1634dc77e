//! Collection orchestration.
//!
//! The engine owns one instance of every service (ledger, cache, fetcher,
//! scheduler) and drives a collection through its phases:
//!
//! ```text
//! run_collection
//!   ├─ resolve channels (explicit ids or subscriptions)
//!   ├─ plan / resume (collection.json + cursor.json)
//!   ├─ discovery phase ── per batch, channels in parallel ── TieredFetcher::discover
//!   ├─ enrichment phase ─ per batch, all items of the batch ─ TieredFetcher::enrich
//!   └─ rank: dedupe, sort by key desc, id asc, truncate
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::config::AcquisitionConfig;
use crate::data_source::VideoSource;
use crate::domain::{rank_items, Channel, ChannelId, Item, SortKey, TimeWindow, UtcDateTime};
use crate::fetcher::{ChannelHarvest, ChannelOutcome, DiscoveryRequest, EnrichmentSummary, FetchOptions, TieredFetcher};
use crate::persistence::{JsonFileStore, MemoryStore, StateStore};
use crate::quota::{
    CostEstimate, EstimateInput, LedgerRecord, QuotaLedger, QuotaPolicy, QuotaStatus, LEDGER_SCHEMA_VERSION,
};
use crate::retry::RetryConfig;
use crate::scheduler::{
    Batch, BatchDisposition, BatchFuture, BatchHandler, BatchProgress, BatchReport, Cursor, PhaseId, PhaseReport,
    PhaseScheduler, SchedulerState, CURSOR_SCHEMA_VERSION,
};
use crate::tier::{TierPolicy, TierTracker};
use crate::{CoreError, ValidationError};

pub const COLLECTION_SCHEMA_VERSION: u32 = 1;

const LEDGER_FILE: &str = "quota.json";
const CURSOR_FILE: &str = "cursor.json";
const COLLECTION_FILE: &str = "collection.json";
const CACHE_DIR: &str = "cache";

/// What to collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub window: TimeWindow,
    pub sort_key: SortKey,
    pub result_count: usize,
    /// Cap on channels taken from the explicit list or subscriptions.
    pub max_channels: Option<usize>,
    pub items_per_channel: usize,
    /// Explicit channels; empty means "the user's subscriptions".
    pub channel_ids: Vec<ChannelId>,
}

impl Default for CollectionRequest {
    fn default() -> Self {
        Self {
            window: TimeWindow::Week,
            sort_key: SortKey::Views,
            result_count: 20,
            max_channels: Some(50),
            items_per_channel: 10,
            channel_ids: Vec::new(),
        }
    }
}

impl CollectionRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.result_count == 0 {
            return Err(ValidationError::ZeroValue { field: "result_count" });
        }
        if self.items_per_channel == 0 {
            return Err(ValidationError::ZeroValue {
                field: "items_per_channel",
            });
        }
        if self.max_channels == Some(0) {
            return Err(ValidationError::ZeroValue { field: "max_channels" });
        }
        Ok(())
    }
}

/// Frozen parameters of a (possibly multi-invocation) collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPlan {
    pub window: TimeWindow,
    /// Resolved once so resumed runs query the same window.
    pub published_after: UtcDateTime,
    pub items_per_channel: usize,
    pub channels: Vec<Channel>,
}

impl CollectionPlan {
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|channel| channel.id.clone()).collect()
    }

    fn matches(&self, window: TimeWindow, items_per_channel: usize, ids: &[ChannelId]) -> bool {
        self.window == window
            && self.items_per_channel == items_per_channel
            && self.channels.len() == ids.len()
            && self.channels.iter().zip(ids).all(|(channel, id)| &channel.id == id)
    }

    fn channel(&self, id: &ChannelId) -> Channel {
        self.channels
            .iter()
            .find(|channel| &channel.id == id)
            .cloned()
            .unwrap_or_else(|| Channel::from_id(id.clone()))
    }
}

/// Persisted results of the current collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    pub plan: Option<CollectionPlan>,
    #[serde(default)]
    pub harvests: BTreeMap<ChannelId, ChannelHarvest>,
    #[serde(default)]
    pub enrichment: EnrichmentSummary,
}

impl CollectionState {
    /// Harvested items in planned channel order.
    pub fn items(&self) -> Vec<Item> {
        let Some(plan) = &self.plan else {
            return Vec::new();
        };
        plan.channels
            .iter()
            .filter_map(|channel| self.harvests.get(&channel.id))
            .flat_map(|harvest| harvest.items.iter().cloned())
            .collect()
    }

    pub fn summaries(&self) -> Vec<ChannelSummary> {
        let Some(plan) = &self.plan else {
            return Vec::new();
        };
        plan.channels
            .iter()
            .filter_map(|channel| self.harvests.get(&channel.id))
            .map(|harvest| ChannelSummary {
                channel_id: harvest.channel.id.clone(),
                display_name: harvest.channel.display_name.clone(),
                items: harvest.items.len(),
                enriched: harvest.items.iter().filter(|item| item.stats.is_some()).count(),
                outcome: harvest.outcome.clone(),
            })
            .collect()
    }
}

/// Per-channel line of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub channel_id: ChannelId,
    pub display_name: String,
    pub items: usize,
    pub enriched: usize,
    pub outcome: ChannelOutcome,
}

/// Result of [`AcquisitionEngine::run_collection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub items: Vec<Item>,
    pub outcomes: Vec<ChannelSummary>,
    pub quota: QuotaStatus,
    /// Units cache hits saved during this run.
    pub saved_units: u64,
    pub estimate: CostEstimate,
    pub phases: Vec<PhaseReport>,
    pub enrichment: EnrichmentSummary,
    pub resumed: bool,
    pub halted: bool,
    /// Every phase finished; otherwise a later run resumes.
    pub complete: bool,
}

/// Local view of phase progress; costs no quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseStatus {
    pub planned: bool,
    pub current: Option<PhaseId>,
    pub channels: usize,
    pub harvested: usize,
    pub published_after: Option<UtcDateTime>,
    pub cursors: Vec<Cursor>,
}

/// Channels per batch for each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseBatchSizes {
    pub discovery: usize,
    pub enrichment: usize,
}

impl Default for PhaseBatchSizes {
    fn default() -> Self {
        Self {
            discovery: PhaseId::Discovery.default_batch_size(),
            enrichment: PhaseId::Enrichment.default_batch_size(),
        }
    }
}

impl PhaseBatchSizes {
    pub fn for_phase(&self, phase: PhaseId) -> usize {
        match phase {
            PhaseId::Discovery => self.discovery,
            PhaseId::Enrichment => self.enrichment,
        }
    }
}

/// Stops a running collection from another task (e.g. on Ctrl-C).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    ledger: Arc<QuotaLedger>,
}

impl CancelHandle {
    /// No new batches are scheduled and no new reservations are granted;
    /// in-flight calls finish and settle their reservations.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            warn!("collection cancelled; finishing in-flight work");
        }
        self.ledger.suspend();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct AcquisitionEngineBuilder {
    source: Arc<dyn VideoSource>,
    clock: Arc<dyn Clock>,
    state_dir: Option<PathBuf>,
    quota_policy: QuotaPolicy,
    tier_policy: TierPolicy,
    retry: RetryConfig,
    fetch_options: FetchOptions,
    max_concurrency: usize,
    batch_sizes: PhaseBatchSizes,
}

impl AcquisitionEngineBuilder {
    pub fn new(source: Arc<dyn VideoSource>) -> Self {
        Self {
            source,
            clock: Arc::new(SystemClock),
            state_dir: None,
            quota_policy: QuotaPolicy::default(),
            tier_policy: TierPolicy::default(),
            retry: RetryConfig::default(),
            fetch_options: FetchOptions::default(),
            max_concurrency: 4,
            batch_sizes: PhaseBatchSizes::default(),
        }
    }

    /// Builder preloaded from a validated configuration.
    pub fn from_config(config: &AcquisitionConfig, source: Arc<dyn VideoSource>) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self::new(source)
            .with_state_dir(config.state_dir.clone())
            .with_quota_policy(config.quota_policy()?)
            .with_tier_policy(config.tier_policy())
            .with_retry(config.retry_config())
            .with_fetch_options(config.fetch_options())
            .with_max_concurrency(config.max_concurrency)
            .with_batch_sizes(PhaseBatchSizes {
                discovery: config.discovery_batch_size,
                enrichment: config.enrichment_phase_batch_size,
            }))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist ledger, cursor, results and cache under `dir`; `None` keeps
    /// everything in memory.
    pub fn with_state_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.state_dir = dir;
        self
    }

    pub fn with_quota_policy(mut self, policy: QuotaPolicy) -> Self {
        self.quota_policy = policy;
        self
    }

    pub fn with_tier_policy(mut self, policy: TierPolicy) -> Self {
        self.tier_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = options;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_batch_sizes(mut self, sizes: PhaseBatchSizes) -> Self {
        self.batch_sizes = sizes;
        self
    }

    /// Open the stores. A ledger that cannot be read starts a fresh period;
    /// an unreadable cursor or results file is an error.
    pub fn build(self) -> Result<AcquisitionEngine, CoreError> {
        if self.batch_sizes.discovery == 0 || self.batch_sizes.enrichment == 0 {
            return Err(ValidationError::ZeroValue { field: "batch_size" }.into());
        }

        let (ledger, cache, scheduler, collection_store) = match &self.state_dir {
            Some(dir) => {
                let ledger_store: Arc<dyn StateStore<LedgerRecord>> =
                    Arc::new(JsonFileStore::new(dir.join(LEDGER_FILE), LEDGER_SCHEMA_VERSION));
                let cursor_store: Arc<dyn StateStore<SchedulerState>> =
                    Arc::new(JsonFileStore::new(dir.join(CURSOR_FILE), CURSOR_SCHEMA_VERSION));
                let collection_store: Arc<dyn StateStore<CollectionState>> =
                    Arc::new(JsonFileStore::new(dir.join(COLLECTION_FILE), COLLECTION_SCHEMA_VERSION));
                (
                    QuotaLedger::open(self.quota_policy, ledger_store, self.clock.clone()),
                    CacheStore::persistent(dir.join(CACHE_DIR), self.clock.clone()),
                    PhaseScheduler::open(cursor_store)?,
                    collection_store,
                )
            }
            None => {
                let collection_store: Arc<dyn StateStore<CollectionState>> = Arc::new(MemoryStore::new());
                (
                    QuotaLedger::in_memory(self.quota_policy, self.clock.clone()),
                    CacheStore::in_memory(self.clock.clone()),
                    PhaseScheduler::in_memory(),
                    collection_store,
                )
            }
        };

        let collection = collection_store.load()?.unwrap_or_default();
        let ledger = Arc::new(ledger);
        let fetcher = TieredFetcher::new(
            self.source,
            cache.clone(),
            ledger.clone(),
            TierTracker::new(self.tier_policy),
            self.retry,
            self.fetch_options,
        );

        Ok(AcquisitionEngine {
            fetcher,
            ledger,
            cache,
            scheduler,
            collection_store,
            collection: Mutex::new(collection),
            clock: self.clock,
            cancelled: Arc::new(AtomicBool::new(false)),
            max_concurrency: self.max_concurrency,
            batch_sizes: self.batch_sizes,
        })
    }
}

/// Quota-aware, cache-first, resumable collector.
pub struct AcquisitionEngine {
    fetcher: TieredFetcher,
    ledger: Arc<QuotaLedger>,
    cache: CacheStore,
    scheduler: PhaseScheduler,
    collection_store: Arc<dyn StateStore<CollectionState>>,
    collection: Mutex<CollectionState>,
    clock: Arc<dyn Clock>,
    cancelled: Arc<AtomicBool>,
    max_concurrency: usize,
    batch_sizes: PhaseBatchSizes,
}

impl std::fmt::Debug for AcquisitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionEngine")
            .field("fetcher", &self.fetcher)
            .field("max_concurrency", &self.max_concurrency)
            .field("batch_sizes", &self.batch_sizes)
            .finish_non_exhaustive()
    }
}

impl AcquisitionEngine {
    pub fn builder(source: Arc<dyn VideoSource>) -> AcquisitionEngineBuilder {
        AcquisitionEngineBuilder::new(source)
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: self.cancelled.clone(),
            ledger: self.ledger.clone(),
        }
    }

    /// Collect, enrich and rank items for `request`, resuming an unfinished
    /// collection with the same channels, window and per-channel cap.
    pub async fn run_collection(&self, request: &CollectionRequest) -> Result<CollectionReport, CoreError> {
        request.validate()?;
        self.fetcher.tiers().reset();
        let saved_before = self.ledger.status().saved_units;

        match self.cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "purged expired cache entries"),
            Err(error) => warn!(error = %error, "failed to purge expired cache entries"),
        }

        let channels = self.resolve_channels(request).await?;
        let channel_count = channels.len();
        let resumed = self.prepare_plan(request, channels);

        let estimate = self.ledger.estimate(EstimateInput {
            channels: channel_count,
            items_per_channel: request.items_per_channel,
            start_tier: self.fetcher.start_tier(),
            lists_subscriptions: request.channel_ids.is_empty(),
        });
        if estimate.fits {
            info!(
                channels = channel_count,
                estimated_units = estimate.total_units,
                remaining = estimate.remaining_units,
                resumed,
                "starting collection"
            );
        } else {
            warn!(
                channels = channel_count,
                estimated_units = estimate.total_units,
                remaining = estimate.remaining_units,
                "estimated cost exceeds remaining quota; cheaper tiers and later runs will cover the rest"
            );
        }

        let runner = PhaseRunner { engine: self };
        let mut phases = Vec::new();
        for phase in PhaseId::ALL {
            let report = self
                .scheduler
                .run_phase(phase, Some(self.batch_sizes.for_phase(phase)), &runner)
                .await?;
            let complete = report.complete;
            phases.push(report);
            if !complete {
                info!(phase = phase.as_str(), "phase left unfinished; run again to resume");
                break;
            }
        }

        let (items, outcomes, enrichment) = {
            let state = self.lock_collection();
            (
                rank_items(state.items(), request.sort_key, request.result_count),
                state.summaries(),
                state.enrichment,
            )
        };
        let quota = self.ledger.status();

        Ok(CollectionReport {
            items,
            outcomes,
            saved_units: quota.saved_units.saturating_sub(saved_before),
            halted: quota.halted,
            quota,
            estimate,
            phases,
            enrichment,
            resumed,
            complete: self.scheduler.current_phase().is_none(),
        })
    }

    pub fn quota_status(&self) -> QuotaStatus {
        self.ledger.status()
    }

    /// Drop cached responses whose endpoint starts with `prefix` (all when `None`).
    pub async fn clear_cache(&self, prefix: Option<&str>) -> Result<usize, CoreError> {
        let removed = self.cache.clear(prefix).await?;
        info!(removed, prefix = prefix.unwrap_or("*"), "cache cleared");
        Ok(removed)
    }

    pub fn phase_status(&self) -> PhaseStatus {
        let state = self.lock_collection();
        PhaseStatus {
            planned: self.scheduler.is_planned(),
            current: self.scheduler.current_phase(),
            channels: self.scheduler.channel_order().len(),
            harvested: state.harvests.len(),
            published_after: state.plan.as_ref().map(|plan| plan.published_after),
            cursors: self.scheduler.status(),
        }
    }

    /// Run `phase` of the planned collection until it completes or stops.
    pub async fn run_phase(&self, phase: PhaseId, batch_size: Option<usize>) -> Result<PhaseReport, CoreError> {
        self.require_plan()?;
        let size = batch_size.unwrap_or(self.batch_sizes.for_phase(phase));
        self.scheduler
            .run_phase(phase, Some(size), &PhaseRunner { engine: self })
            .await
    }

    /// Run one batch of the first unfinished phase.
    pub async fn run_next_batch(&self, batch_size: Option<usize>) -> Result<Option<BatchReport>, CoreError> {
        self.require_plan()?;
        let Some(phase) = self.scheduler.current_phase() else {
            return Ok(None);
        };
        let size = batch_size.unwrap_or(self.batch_sizes.for_phase(phase));
        self.scheduler
            .run_next_batch(Some(phase), Some(size), &PhaseRunner { engine: self })
            .await
    }

    /// Forget the planned collection, its cursor and its results.
    pub fn reset_phases(&self) -> Result<(), CoreError> {
        let mut state = self.lock_collection();
        self.scheduler.reset()?;
        self.collection_store.clear()?;
        *state = CollectionState::default();
        info!("collection plan and phase cursors reset");
        Ok(())
    }

    /// Current results ranked by `sort_key`.
    pub fn ranked_items(&self, sort_key: SortKey, count: usize) -> Vec<Item> {
        rank_items(self.lock_collection().items(), sort_key, count)
    }

    async fn resolve_channels(&self, request: &CollectionRequest) -> Result<Vec<Channel>, CoreError> {
        if !request.channel_ids.is_empty() {
            let mut seen = HashSet::new();
            let mut channels: Vec<Channel> = request
                .channel_ids
                .iter()
                .filter(|id| seen.insert((*id).clone()))
                .cloned()
                .map(Channel::from_id)
                .collect();
            if let Some(max) = request.max_channels {
                channels.truncate(max);
            }
            return Ok(channels);
        }

        if self.fetcher.options().no_auth {
            return Err(ValidationError::ChannelsRequiredWithoutAuth.into());
        }
        Ok(self.fetcher.list_subscriptions(request.max_channels).await?)
    }

    /// Adopt or resume a plan; returns whether an unfinished one was resumed.
    fn prepare_plan(&self, request: &CollectionRequest, channels: Vec<Channel>) -> bool {
        let ids: Vec<ChannelId> = channels.iter().map(|channel| channel.id.clone()).collect();
        let mut state = self.lock_collection();

        let matches = state
            .plan
            .as_ref()
            .is_some_and(|plan| plan.matches(request.window, request.items_per_channel, &ids));
        if matches {
            if self.scheduler.plan(&ids) {
                return true;
            }
        } else {
            if let Err(error) = self.scheduler.reset() {
                warn!(error = %error, "failed to clear previous phase cursor");
            }
            self.scheduler.plan(&ids);
        }

        let now = self.clock.now();
        *state = CollectionState {
            plan: Some(CollectionPlan {
                window: request.window,
                published_after: request.window.published_after(now),
                items_per_channel: request.items_per_channel,
                channels,
            }),
            ..CollectionState::default()
        };
        self.persist_collection(&state);
        false
    }

    async fn discover_batch(&self, batch: &Batch, progress: &BatchProgress<'_>) -> BatchDisposition {
        let Some(plan) = self.lock_collection().plan.clone() else {
            warn!("discovery batch without a collection plan");
            return BatchDisposition::Interrupted;
        };
        let request = DiscoveryRequest {
            published_after: plan.published_after,
            max_items: plan.items_per_channel,
        };
        let channels: Vec<Channel> = batch.channels.iter().map(|id| plan.channel(id)).collect();

        // Harvests are yielded in batch order so `remaining` stays a suffix.
        let fetcher = &self.fetcher;
        let mut harvests = stream::iter(channels)
            .map(move |channel| async move { fetcher.discover(&channel, request).await })
            .buffered(self.max_concurrency);
        while let Some(harvest) = harvests.next().await {
            let channel_id = harvest.channel.id.clone();
            self.store_harvest(harvest);
            progress.channel_done(&channel_id);
        }

        BatchDisposition::Completed
    }

    /// Enrich every pending item of the batch's channels. A quota denial
    /// leaves the batch in flight so a later run fills in the statistics.
    async fn enrich_batch(&self, batch: &Batch, progress: &BatchProgress<'_>) -> BatchDisposition {
        let mut items: Vec<Item> = {
            let state = self.lock_collection();
            batch
                .channels
                .iter()
                .filter_map(|id| state.harvests.get(id))
                .flat_map(|harvest| harvest.items.iter().filter(|item| item.needs_enrichment()).cloned())
                .collect()
        };

        let summary = self.fetcher.enrich(&mut items).await;
        let pending: HashSet<ChannelId> = items
            .iter()
            .filter(|item| item.needs_enrichment())
            .map(|item| item.channel_id.clone())
            .collect();

        {
            let mut state = self.lock_collection();
            for item in &items {
                let Some(stats) = item.stats else {
                    continue;
                };
                if let Some(harvest) = state.harvests.get_mut(&item.channel_id) {
                    for stored in harvest.items.iter_mut().filter(|stored| stored.id == item.id) {
                        stored.stats = Some(stats);
                    }
                }
            }
            state.enrichment.absorb(summary);
            self.persist_collection(&state);
        }

        for channel in &batch.channels {
            if !pending.contains(channel) {
                progress.channel_done(channel);
            }
        }

        if summary.denied_batches > 0 {
            BatchDisposition::Interrupted
        } else {
            BatchDisposition::Completed
        }
    }

    fn may_schedule(&self, phase: PhaseId) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        // Discovery can always fall back to the free tier.
        match phase {
            PhaseId::Discovery => true,
            PhaseId::Enrichment => self.fetcher.options().no_auth || !self.ledger.is_halted(),
        }
    }

    fn store_harvest(&self, harvest: ChannelHarvest) {
        let mut state = self.lock_collection();
        state.harvests.insert(harvest.channel.id.clone(), harvest);
        self.persist_collection(&state);
    }

    fn require_plan(&self) -> Result<(), ValidationError> {
        if self.lock_collection().plan.is_none() || !self.scheduler.is_planned() {
            return Err(ValidationError::NoCollectionPlanned);
        }
        Ok(())
    }

    fn persist_collection(&self, state: &CollectionState) {
        if let Err(error) = self.collection_store.save(state) {
            warn!(error = %error, "failed to persist collection results; continuing in memory");
        }
    }

    fn lock_collection(&self) -> MutexGuard<'_, CollectionState> {
        self.collection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PhaseRunner<'e> {
    engine: &'e AcquisitionEngine,
}

impl BatchHandler for PhaseRunner<'_> {
    fn handle<'a>(&'a self, batch: &'a Batch, progress: &'a BatchProgress<'a>) -> BatchFuture<'a> {
        Box::pin(async move {
            match batch.phase {
                PhaseId::Discovery => self.engine.discover_batch(batch, progress).await,
                PhaseId::Enrichment => self.engine.enrich_batch(batch, progress).await,
            }
        })
    }

    fn should_continue(&self, phase: PhaseId) -> bool {
        self.engine.may_schedule(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validation_rejects_zero_counts() {
        let request = CollectionRequest {
            result_count: 0,
            ..CollectionRequest::default()
        };
        assert_eq!(
            request.validate(),
            Err(ValidationError::ZeroValue { field: "result_count" })
        );

        let request = CollectionRequest {
            max_channels: Some(0),
            ..CollectionRequest::default()
        };
        assert!(request.validate().is_err());
        assert!(CollectionRequest::default().validate().is_ok());
    }

    #[test]
    fn plan_matching_requires_same_channel_order() {
        let a = ChannelId::parse("UCa").expect("valid");
        let b = ChannelId::parse("UCb").expect("valid");
        let plan = CollectionPlan {
            window: TimeWindow::Week,
            published_after: UtcDateTime::parse("2024-03-01T00:00:00Z").expect("valid"),
            items_per_channel: 5,
            channels: vec![Channel::from_id(a.clone()), Channel::from_id(b.clone())],
        };

        assert!(plan.matches(TimeWindow::Week, 5, &[a.clone(), b.clone()]));
        assert!(!plan.matches(TimeWindow::Week, 5, &[b.clone(), a.clone()]));
        assert!(!plan.matches(TimeWindow::Month, 5, &[a.clone(), b.clone()]));
        assert!(!plan.matches(TimeWindow::Week, 6, &[a, b]));
    }

    #[test]
    fn collection_state_round_trips_with_channel_keys() {
        let id = ChannelId::parse("UCa").expect("valid");
        let mut state = CollectionState {
            plan: Some(CollectionPlan {
                window: TimeWindow::Month,
                published_after: UtcDateTime::parse("2024-03-01T00:00:00Z").expect("valid"),
                items_per_channel: 3,
                channels: vec![Channel::from_id(id.clone())],
            }),
            ..CollectionState::default()
        };
        state.harvests.insert(
            id.clone(),
            ChannelHarvest {
                channel: Channel::from_id(id),
                items: Vec::new(),
                outcome: ChannelOutcome::Exhausted { errors: Vec::new() },
            },
        );

        let encoded = serde_json::to_string(&state).expect("encode");
        let decoded: CollectionState = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, state);
        assert_eq!(decoded.summaries().len(), 1);
    }
}
