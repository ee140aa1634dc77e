//! Tiered retrieval of a channel's recent items.
//!
//! Every remote call goes through one path: cache lookup, quota reservation,
//! retried call, then commit-and-store or release. Discovery walks the tiers
//! from the channel's current tier towards the free one until a tier
//! succeeds; enrichment attaches statistics in reserved batches.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheMode, CacheStore};
use crate::data_source::{
    DiscoveredVideo, FetchError, FetchErrorKind, Operation, PlaylistRequest, SearchRequest, SourceFuture,
    VideoSource, VideoStatistics,
};
use crate::domain::{Channel, ChannelId, Item, ItemStats, Tier, UtcDateTime};
use crate::quota::QuotaLedger;
use crate::retry::RetryConfig;
use crate::tier::{FailureVerdict, TierTracker};

const MAX_STATS_BATCH: usize = 50;
const SUBSCRIPTION_PAGE_SIZE: usize = 50;

/// Behavior switches for the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub cache_mode: CacheMode,
    /// Optional keyword passed to primary-tier search.
    pub search_query: Option<String>,
    /// Ids per statistics call, at most 50.
    pub enrichment_batch_size: usize,
    /// Upper bound on playlist pages walked per channel.
    pub max_playlist_pages: usize,
    /// Skip every authenticated tier.
    pub no_auth: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache_mode: CacheMode::Use,
            search_query: None,
            enrichment_batch_size: MAX_STATS_BATCH,
            max_playlist_pages: 5,
            no_auth: false,
        }
    }
}

/// Bounds for one channel's discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub published_after: UtcDateTime,
    pub max_items: usize,
}

/// A failed attempt at one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFailure {
    pub tier: Tier,
    pub error: FetchError,
}

/// Final state of a channel's discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Succeeded {
        tier: Tier,
        /// Served by a cheaper tier than the run started with.
        demoted: bool,
        /// Every call for this channel was a cache hit.
        cached: bool,
    },
    Exhausted {
        errors: Vec<TierFailure>,
    },
}

impl ChannelOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::Succeeded { tier, .. } => Some(*tier),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Discovery result for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHarvest {
    pub channel: Channel,
    pub items: Vec<Item>,
    pub outcome: ChannelOutcome,
}

/// Enrichment bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub requested: usize,
    pub enriched: usize,
    pub cached_batches: usize,
    pub denied_batches: usize,
    pub failed_batches: usize,
}

impl EnrichmentSummary {
    pub fn absorb(&mut self, other: EnrichmentSummary) {
        self.requested += other.requested;
        self.enriched += other.enriched;
        self.cached_batches += other.cached_batches;
        self.denied_batches += other.denied_batches;
        self.failed_batches += other.failed_batches;
    }
}

struct Fetched<T> {
    value: T,
    cached: bool,
}

/// Quota-aware, cache-first, tier-falling-back fetcher.
pub struct TieredFetcher {
    source: Arc<dyn VideoSource>,
    cache: CacheStore,
    ledger: Arc<QuotaLedger>,
    tiers: TierTracker,
    retry: RetryConfig,
    options: FetchOptions,
}

impl std::fmt::Debug for TieredFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredFetcher")
            .field("options", &self.options)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TieredFetcher {
    pub fn new(
        source: Arc<dyn VideoSource>,
        cache: CacheStore,
        ledger: Arc<QuotaLedger>,
        tiers: TierTracker,
        retry: RetryConfig,
        options: FetchOptions,
    ) -> Self {
        Self {
            source,
            cache,
            ledger,
            tiers,
            retry,
            options,
        }
    }

    pub fn tiers(&self) -> &TierTracker {
        &self.tiers
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Tier a fresh channel starts from in this run.
    pub fn start_tier(&self) -> Tier {
        if self.options.no_auth {
            Tier::Tertiary
        } else {
            self.tiers.policy().start_tier
        }
    }

    /// Subscribed channels of the authenticated user, up to `limit`.
    pub async fn list_subscriptions(&self, limit: Option<usize>) -> Result<Vec<Channel>, FetchError> {
        if self.options.no_auth {
            return Err(FetchError::auth("subscriptions require authentication", None));
        }

        let mut channels: Vec<Channel> = Vec::new();
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let key = CacheKey::from_pairs(
                Operation::ListSubscriptions.cache_namespace(),
                [
                    ("page_size", SUBSCRIPTION_PAGE_SIZE.to_string()),
                    ("page_token", page_token.clone().unwrap_or_default()),
                ],
            );
            let token = page_token.clone();
            let page = self
                .call(
                    Operation::ListSubscriptions,
                    key,
                    Operation::ListSubscriptions.unit_cost(),
                    move |source| source.list_subscriptions(token.clone()),
                )
                .await?;

            for channel in page.value.channels {
                if seen.insert(channel.id.clone()) {
                    channels.push(channel);
                }
            }

            let reached_limit = limit.is_some_and(|limit| channels.len() >= limit);
            match page.value.next_page_token {
                Some(next) if !reached_limit => page_token = Some(next),
                _ => break,
            }
        }

        if let Some(limit) = limit {
            channels.truncate(limit);
        }
        info!(channels = channels.len(), "resolved subscribed channels");
        Ok(channels)
    }

    /// Discover recent items for one channel, falling back tier by tier.
    pub async fn discover(&self, channel: &Channel, request: DiscoveryRequest) -> ChannelHarvest {
        let run_start = self.start_tier();
        let first = if self.options.no_auth {
            Tier::Tertiary
        } else {
            self.tiers.current_tier(&channel.id)
        };
        let mut failures = Vec::new();

        for tier in first.descending_from() {
            if tier < self.tiers.floor() {
                continue;
            }

            let attempt = match tier {
                Tier::Primary => self.discover_primary(&channel.id, request).await,
                Tier::Secondary => self.discover_secondary(&channel.id, request).await,
                Tier::Tertiary => self.discover_tertiary(&channel.id, request).await,
            };

            match attempt {
                Ok(fetched) => {
                    self.tiers.record_success(&channel.id, tier);
                    let items = to_items(fetched.value, channel, tier, request.max_items);
                    debug!(
                        channel = %channel.id,
                        tier = tier.as_str(),
                        items = items.len(),
                        cached = fetched.cached,
                        "channel discovery succeeded"
                    );
                    return ChannelHarvest {
                        channel: channel.clone(),
                        items,
                        outcome: ChannelOutcome::Succeeded {
                            tier,
                            demoted: tier > run_start,
                            cached: fetched.cached,
                        },
                    };
                }
                Err(error) => {
                    self.note_failure(&channel.id, tier, &error);
                    failures.push(TierFailure { tier, error });
                }
            }
        }

        warn!(channel = %channel.id, attempts = failures.len(), "all tiers exhausted for channel");
        ChannelHarvest {
            channel: channel.clone(),
            items: Vec::new(),
            outcome: ChannelOutcome::Exhausted { errors: failures },
        }
    }

    /// Attach statistics to every item that supports them and lacks them.
    ///
    /// Each batch is reserved separately; a denied or failed batch leaves its
    /// items without statistics and enrichment moves on.
    pub async fn enrich(&self, items: &mut [Item]) -> EnrichmentSummary {
        let mut summary = EnrichmentSummary::default();
        let mut seen = HashSet::new();
        let ids: Vec<String> = items
            .iter()
            .filter(|item| item.needs_enrichment())
            .filter(|item| seen.insert(item.id.clone()))
            .map(|item| item.id.clone())
            .collect();
        summary.requested = ids.len();
        if ids.is_empty() || self.options.no_auth {
            return summary;
        }

        let batch_size = self.options.enrichment_batch_size.clamp(1, MAX_STATS_BATCH);
        let mut stats: HashMap<String, ItemStats> = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(batch_size) {
            let mut sorted = chunk.to_vec();
            sorted.sort();
            let key = CacheKey::from_pairs(
                Operation::VideoStatistics.cache_namespace(),
                [("ids", sorted.join(","))],
            );
            let units = Operation::VideoStatistics.cost_for(chunk.len());
            let batch = chunk.to_vec();

            let result = self
                .call(Operation::VideoStatistics, key, units, move |source| {
                    source.video_statistics(batch.clone())
                })
                .await;

            match result {
                Ok(fetched) => {
                    if fetched.cached {
                        summary.cached_batches += 1;
                    }
                    for VideoStatistics { id, stats: counters } in fetched.value {
                        stats.insert(id, counters);
                    }
                }
                Err(error) if error.kind() == FetchErrorKind::QuotaDenied => {
                    info!(ids = chunk.len(), error = %error, "statistics batch denied by quota ledger");
                    summary.denied_batches += 1;
                }
                Err(error) => {
                    if error.kind() == FetchErrorKind::AuthFailure {
                        self.tiers.disable_authenticated_tiers();
                    }
                    warn!(ids = chunk.len(), error = %error, "statistics batch failed");
                    summary.failed_batches += 1;
                }
            }
        }

        for item in items.iter_mut() {
            if !item.needs_enrichment() {
                continue;
            }
            if let Some(counters) = stats.get(&item.id) {
                item.stats = Some(*counters);
                summary.enriched += 1;
            }
        }
        summary
    }

    async fn discover_primary(
        &self,
        channel_id: &ChannelId,
        request: DiscoveryRequest,
    ) -> Result<Fetched<Vec<DiscoveredVideo>>, FetchError> {
        let mut videos = Vec::new();
        let mut page_token: Option<String> = None;
        let mut cached = true;
        let max_results = u32::try_from(request.max_items).unwrap_or(u32::MAX);
        let query = self.options.search_query.clone();

        loop {
            let key = CacheKey::from_pairs(
                Operation::Search.cache_namespace(),
                [
                    ("channel_id", channel_id.to_string()),
                    ("published_after", request.published_after.format_rfc3339()),
                    ("max_results", max_results.to_string()),
                    ("q", query.clone().unwrap_or_default()),
                    ("page_token", page_token.clone().unwrap_or_default()),
                ],
            );
            let search = SearchRequest {
                channel_id: channel_id.clone(),
                published_after: request.published_after,
                max_results,
                query: query.clone(),
                page_token: page_token.clone(),
            };

            let page = self
                .call(Operation::Search, key, Operation::Search.unit_cost(), move |source| {
                    source.search(search.clone())
                })
                .await?;
            cached &= page.cached;
            videos.extend(page.value.videos);

            match page.value.next_page_token {
                Some(next) if videos.len() < request.max_items => page_token = Some(next),
                _ => break,
            }
        }

        Ok(Fetched {
            value: videos,
            cached,
        })
    }

    async fn discover_secondary(
        &self,
        channel_id: &ChannelId,
        request: DiscoveryRequest,
    ) -> Result<Fetched<Vec<DiscoveredVideo>>, FetchError> {
        let key = CacheKey::from_pairs(
            Operation::ChannelDetails.cache_namespace(),
            [("channel_id", channel_id.to_string())],
        );
        let id = channel_id.clone();
        let uploads = self
            .call(
                Operation::ChannelDetails,
                key,
                Operation::ChannelDetails.unit_cost(),
                move |source| source.uploads_playlist(id.clone()),
            )
            .await?;
        let mut cached = uploads.cached;

        let Some(playlist_id) = uploads.value else {
            debug!(channel = %channel_id, "channel has no uploads playlist");
            return Ok(Fetched {
                value: Vec::new(),
                cached,
            });
        };

        let page_size = u32::try_from(request.max_items.saturating_mul(2).clamp(1, 50)).unwrap_or(50);
        let mut kept = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..self.options.max_playlist_pages.max(1) {
            let key = CacheKey::from_pairs(
                Operation::PlaylistItems.cache_namespace(),
                [
                    ("playlist_id", playlist_id.clone()),
                    ("page_size", page_size.to_string()),
                    ("page_token", page_token.clone().unwrap_or_default()),
                ],
            );
            let playlist = PlaylistRequest {
                playlist_id: playlist_id.clone(),
                page_size,
                page_token: page_token.clone(),
            };

            let page = self
                .call(
                    Operation::PlaylistItems,
                    key,
                    Operation::PlaylistItems.unit_cost(),
                    move |source| source.playlist_items(playlist.clone()),
                )
                .await?;
            cached &= page.cached;

            // Uploads are newest first; the first older item ends the walk.
            let mut reached_older = false;
            for video in page.value.videos {
                if video.published_at >= request.published_after {
                    kept.push(video);
                } else {
                    reached_older = true;
                }
            }

            if reached_older || kept.len() >= request.max_items {
                break;
            }
            match page.value.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(Fetched { value: kept, cached })
    }

    async fn discover_tertiary(
        &self,
        channel_id: &ChannelId,
        request: DiscoveryRequest,
    ) -> Result<Fetched<Vec<DiscoveredVideo>>, FetchError> {
        let key = CacheKey::from_pairs(
            Operation::PublicFeed.cache_namespace(),
            [("channel_id", channel_id.to_string())],
        );
        let id = channel_id.clone();
        let feed = self
            .call(Operation::PublicFeed, key, Operation::PublicFeed.unit_cost(), move |source| {
                source.public_feed(id.clone())
            })
            .await?;

        let mut videos: Vec<DiscoveredVideo> = feed
            .value
            .into_iter()
            .filter(|video| video.published_at >= request.published_after)
            .collect();
        videos.sort_by(|left, right| right.published_at.cmp(&left.published_at));

        Ok(Fetched {
            value: videos,
            cached: feed.cached,
        })
    }

    /// Cache-first, reserve, retried call, then commit-and-store or release.
    async fn call<T, F>(
        &self,
        operation: Operation,
        key: CacheKey,
        units: u64,
        mut invoke: F,
    ) -> Result<Fetched<T>, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: for<'a> FnMut(&'a dyn VideoSource) -> SourceFuture<'a, T>,
    {
        if self.options.cache_mode.reads() {
            if let Some(value) = self.cache.get_as::<T>(&key).await {
                debug!(operation = operation.as_str(), key = %key, units, "cache hit");
                self.ledger.record_saved(units);
                return Ok(Fetched {
                    value,
                    cached: true,
                });
            }
        }

        let reservation = if units > 0 {
            Some(self.ledger.reserve(operation, units)?)
        } else {
            None
        };

        let source = self.source.as_ref();
        match self.retry.run(operation.as_str(), || invoke(source)).await {
            Ok(value) => {
                if let Some(reservation) = reservation {
                    self.ledger.commit(reservation);
                }
                if let Err(error) = self
                    .cache
                    .put_as(&key, &value, operation.cache_ttl().duration())
                    .await
                {
                    warn!(operation = operation.as_str(), error = %error, "failed to store cache entry");
                }
                Ok(Fetched {
                    value,
                    cached: false,
                })
            }
            Err(error) => {
                if let Some(reservation) = reservation {
                    self.ledger.release(reservation);
                }
                Err(error)
            }
        }
    }

    fn note_failure(&self, channel_id: &ChannelId, tier: Tier, error: &FetchError) {
        match error.kind() {
            FetchErrorKind::AuthFailure => {
                warn!(channel = %channel_id, error = %error, "authentication failed");
                self.tiers.disable_authenticated_tiers();
            }
            FetchErrorKind::HardRemote => {
                if let FailureVerdict::Counted {
                    consecutive_failures,
                } = self.tiers.record_hard_failure(channel_id, tier)
                {
                    debug!(channel = %channel_id, tier = tier.as_str(), consecutive_failures, "hard failure counted");
                }
            }
            FetchErrorKind::QuotaDenied => {
                debug!(channel = %channel_id, tier = tier.as_str(), "tier skipped: quota denied");
            }
            FetchErrorKind::Transient | FetchErrorKind::Parse | FetchErrorKind::InvalidRequest => {
                warn!(channel = %channel_id, tier = tier.as_str(), error = %error, "tier attempt failed");
            }
        }
    }
}

fn to_items(videos: Vec<DiscoveredVideo>, channel: &Channel, tier: Tier, max_items: usize) -> Vec<Item> {
    let mut seen = HashSet::new();
    videos
        .into_iter()
        .filter(|video| seen.insert(video.id.clone()))
        .take(max_items)
        .map(|video| Item {
            url: Item::watch_url(&video.id),
            channel_title: if video.channel_title.is_empty() {
                channel.display_name.clone()
            } else {
                video.channel_title
            },
            id: video.id,
            channel_id: channel.id.clone(),
            title: video.title,
            published_at: video.published_at,
            stats: None,
            tier,
        })
        .collect()
}
