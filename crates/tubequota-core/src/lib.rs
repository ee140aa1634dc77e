//! Core contracts for tubequota.
//!
//! This crate contains:
//! - Canonical domain models and validation
//! - The remote operation catalogue with unit costs, and the YouTube adapters
//! - A persistent daily quota ledger with two-phase reservations
//! - A TTL response cache keyed by request signature
//! - Tiered discovery with per-channel demotion
//! - Resumable, batch-oriented phases and the acquisition engine
//!
//! ```text
//!                    AcquisitionEngine
//!                           │
//!              PhaseScheduler (cursor.json)
//!                           │ batch of channels
//!                     TieredFetcher
//!        ┌──────────────┬───┴────────┬──────────────┐
//!   CacheStore     QuotaLedger   TierTracker    RetryConfig
//!   (cache/)       (quota.json)                     │
//!                                             VideoSource
//!                                   (YouTubeAdapter: API + public feed)
//! ```

pub mod adapters;
pub mod cache;
pub mod clock;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod persistence;
pub mod quota;
pub mod retry;
pub mod scheduler;
pub mod throttling;
pub mod tier;
pub mod token;

pub use adapters::{YouTubeAdapter, DEFAULT_API_BASE, DEFAULT_FEED_URL};
pub use cache::{CacheEntry, CacheKey, CacheMode, CacheStore, CacheTtl};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{default_state_dir, AcquisitionConfig};
pub use data_source::{
    DiscoveredVideo, FetchError, FetchErrorKind, Operation, PlaylistRequest, SearchRequest, SourceFuture,
    SubscriptionPage, VideoPage, VideoSource, VideoStatistics,
};
pub use domain::{rank_items, Channel, ChannelId, Item, ItemStats, SortKey, Tier, TimeWindow, UtcDateTime};
pub use engine::{
    AcquisitionEngine, AcquisitionEngineBuilder, CancelHandle, ChannelSummary, CollectionPlan, CollectionReport,
    CollectionRequest, CollectionState, PhaseBatchSizes, PhaseStatus,
};
pub use error::{CoreError, ValidationError};
pub use fetcher::{
    ChannelHarvest, ChannelOutcome, DiscoveryRequest, EnrichmentSummary, FetchOptions, TierFailure, TieredFetcher,
};
pub use http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use persistence::{JsonFileStore, MemoryStore, PersistenceError, StateStore};
pub use quota::{
    CostEstimate, EstimateInput, LedgerRecord, QuotaDenial, QuotaLedger, QuotaPolicy, QuotaStatus, Reservation,
};
pub use retry::{Backoff, RetryConfig};
pub use scheduler::{
    Batch, BatchDisposition, BatchFuture, BatchHandler, BatchProgress, BatchReport, Cursor, PhaseId, PhaseReport,
    PhaseScheduler, SchedulerState,
};
pub use throttling::RequestPacer;
pub use tier::{ChannelTier, FailureVerdict, TierPolicy, TierTracker};
pub use token::{AuthError, EnvTokenProvider, FileTokenProvider, StaticTokenProvider, TokenProvider};
