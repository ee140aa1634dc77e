//! Acquisition settings with environment overrides.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `TUBEQUOTA_HOME` | `state_dir` | `$HOME/.tubequota` |
//! | `TUBEQUOTA_DAILY_LIMIT` | `daily_limit` | `10000` |
//! | `TUBEQUOTA_SAFETY_BUFFER` | `safety_buffer` | `500` |
//! | `TUBEQUOTA_RESET_OFFSET` | `reference_utc_offset` | `-08:00` |
//! | `TUBEQUOTA_REQUESTS_PER_SECOND` | `requests_per_second` | `5` |
//! | `TUBEQUOTA_MAX_CONCURRENCY` | `max_concurrency` | `4` |
//! | `TUBEQUOTA_TIMEOUT_MS` | `request_timeout_ms` | `30000` |
//! | `TUBEQUOTA_MAX_RETRIES` | `max_retries` | `2` |
//! | `TUBEQUOTA_DEMOTION_THRESHOLD` | `demotion_threshold` | `3` |
//! | `TUBEQUOTA_RUN_DEMOTION_THRESHOLD` | `run_demotion_threshold` (`0` disables) | `5` |
//! | `TUBEQUOTA_ENRICHMENT_BATCH_SIZE` | `enrichment_batch_size` | `50` |
//! | `TUBEQUOTA_DISCOVERY_BATCH_SIZE` | `discovery_batch_size` | `5` |
//! | `TUBEQUOTA_ENRICHMENT_PHASE_BATCH_SIZE` | `enrichment_phase_batch_size` | `25` |
//! | `TUBEQUOTA_NO_AUTH` | `no_auth` | `false` |
//! | `TUBEQUOTA_CACHE` | `cache_enabled` | `true` |
//! | `TUBEQUOTA_SEARCH_QUERY` | `search_query` | unset |
//! | `TUBEQUOTA_TOKEN_FILE` | `token_file` | unset |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheMode;
use crate::domain::{ChannelId, SortKey, Tier, TimeWindow};
use crate::engine::CollectionRequest;
use crate::fetcher::FetchOptions;
use crate::quota::{parse_utc_offset, QuotaPolicy};
use crate::retry::RetryConfig;
use crate::scheduler::PhaseId;
use crate::tier::TierPolicy;
use crate::ValidationError;

const MAX_STATS_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub window: TimeWindow,
    pub sort_key: SortKey,
    pub result_count: usize,
    pub max_channels: Option<usize>,
    pub items_per_channel: usize,
    pub cache_enabled: bool,
    pub no_auth: bool,
    pub channel_ids: Vec<ChannelId>,
    /// Keyword passed to primary-tier search, e.g. "podcast".
    pub search_query: Option<String>,
    pub daily_limit: u64,
    pub safety_buffer: u64,
    /// Offset whose midnight starts a quota period.
    pub reference_utc_offset: String,
    pub demotion_threshold: u32,
    pub run_demotion_threshold: Option<u32>,
    /// Ids per statistics call.
    pub enrichment_batch_size: usize,
    /// Channels per discovery batch.
    pub discovery_batch_size: usize,
    /// Channels per enrichment batch.
    pub enrichment_phase_batch_size: usize,
    pub max_concurrency: usize,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub requests_per_second: u32,
    pub max_playlist_pages: usize,
    /// `None` keeps every record in memory.
    pub state_dir: Option<PathBuf>,
    pub token_file: Option<PathBuf>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        let request = CollectionRequest::default();
        let tiers = TierPolicy::default();
        let fetch = FetchOptions::default();
        Self {
            window: request.window,
            sort_key: request.sort_key,
            result_count: request.result_count,
            max_channels: request.max_channels,
            items_per_channel: request.items_per_channel,
            cache_enabled: true,
            no_auth: false,
            channel_ids: Vec::new(),
            search_query: None,
            daily_limit: 10_000,
            safety_buffer: 500,
            reference_utc_offset: String::from("-08:00"),
            demotion_threshold: tiers.demotion_threshold,
            run_demotion_threshold: tiers.run_demotion_threshold,
            enrichment_batch_size: fetch.enrichment_batch_size,
            discovery_batch_size: PhaseId::Discovery.default_batch_size(),
            enrichment_phase_batch_size: PhaseId::Enrichment.default_batch_size(),
            max_concurrency: 4,
            request_timeout_ms: 30_000,
            max_retries: RetryConfig::default().max_retries,
            requests_per_second: 5,
            max_playlist_pages: fetch.max_playlist_pages,
            state_dir: None,
            token_file: None,
        }
    }
}

impl AcquisitionConfig {
    /// Defaults overlaid with `TUBEQUOTA_*` variables; the state directory
    /// defaults to `$HOME/.tubequota`.
    pub fn from_env() -> Result<Self, ValidationError> {
        let mut config = Self::from_lookup(|name| env::var(name).ok())?;
        if config.state_dir.is_none() {
            config.state_dir = Some(default_state_dir());
        }
        Ok(config)
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(value) = read("TUBEQUOTA_HOME") {
            config.state_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = read("TUBEQUOTA_DAILY_LIMIT") {
            config.daily_limit = parse_setting("TUBEQUOTA_DAILY_LIMIT", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_SAFETY_BUFFER") {
            config.safety_buffer = parse_setting("TUBEQUOTA_SAFETY_BUFFER", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_RESET_OFFSET") {
            parse_utc_offset(&value)?;
            config.reference_utc_offset = value;
        }
        if let Some(value) = read("TUBEQUOTA_REQUESTS_PER_SECOND") {
            config.requests_per_second = parse_setting("TUBEQUOTA_REQUESTS_PER_SECOND", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_MAX_CONCURRENCY") {
            config.max_concurrency = parse_setting("TUBEQUOTA_MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_TIMEOUT_MS") {
            config.request_timeout_ms = parse_setting("TUBEQUOTA_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_MAX_RETRIES") {
            config.max_retries = parse_setting("TUBEQUOTA_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_DEMOTION_THRESHOLD") {
            config.demotion_threshold = parse_setting("TUBEQUOTA_DEMOTION_THRESHOLD", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_RUN_DEMOTION_THRESHOLD") {
            let threshold: u32 = parse_setting("TUBEQUOTA_RUN_DEMOTION_THRESHOLD", &value)?;
            config.run_demotion_threshold = (threshold > 0).then_some(threshold);
        }
        if let Some(value) = read("TUBEQUOTA_ENRICHMENT_BATCH_SIZE") {
            config.enrichment_batch_size = parse_setting("TUBEQUOTA_ENRICHMENT_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_DISCOVERY_BATCH_SIZE") {
            config.discovery_batch_size = parse_setting("TUBEQUOTA_DISCOVERY_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_ENRICHMENT_PHASE_BATCH_SIZE") {
            config.enrichment_phase_batch_size = parse_setting("TUBEQUOTA_ENRICHMENT_PHASE_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_NO_AUTH") {
            config.no_auth = parse_flag("TUBEQUOTA_NO_AUTH", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_CACHE") {
            config.cache_enabled = parse_flag("TUBEQUOTA_CACHE", &value)?;
        }
        if let Some(value) = read("TUBEQUOTA_SEARCH_QUERY") {
            config.search_query = Some(value);
        }
        if let Some(value) = read("TUBEQUOTA_TOKEN_FILE") {
            config.token_file = Some(PathBuf::from(value));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.collection_request().validate()?;
        self.quota_policy()?;

        let positive = [
            ("demotion_threshold", self.demotion_threshold as usize),
            ("enrichment_batch_size", self.enrichment_batch_size),
            ("discovery_batch_size", self.discovery_batch_size),
            ("enrichment_phase_batch_size", self.enrichment_phase_batch_size),
            ("max_concurrency", self.max_concurrency),
            ("requests_per_second", self.requests_per_second as usize),
            ("max_playlist_pages", self.max_playlist_pages),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ValidationError::ZeroValue { field: *field });
        }
        if self.request_timeout_ms == 0 {
            return Err(ValidationError::ZeroValue {
                field: "request_timeout_ms",
            });
        }
        if self.enrichment_batch_size > MAX_STATS_BATCH {
            return Err(ValidationError::InvalidSetting {
                name: String::from("enrichment_batch_size"),
                value: self.enrichment_batch_size.to_string(),
            });
        }
        Ok(())
    }

    pub fn quota_policy(&self) -> Result<QuotaPolicy, ValidationError> {
        QuotaPolicy::new(
            self.daily_limit,
            self.safety_buffer,
            parse_utc_offset(&self.reference_utc_offset)?,
        )
    }

    pub fn tier_policy(&self) -> TierPolicy {
        TierPolicy {
            demotion_threshold: self.demotion_threshold,
            run_demotion_threshold: self.run_demotion_threshold,
            start_tier: if self.no_auth { Tier::Tertiary } else { Tier::Primary },
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::exponential(self.max_retries)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            cache_mode: if self.cache_enabled {
                CacheMode::Use
            } else {
                CacheMode::Refresh
            },
            search_query: self.search_query.clone(),
            enrichment_batch_size: self.enrichment_batch_size,
            max_playlist_pages: self.max_playlist_pages,
            no_auth: self.no_auth,
        }
    }

    pub fn collection_request(&self) -> CollectionRequest {
        CollectionRequest {
            window: self.window,
            sort_key: self.sort_key,
            result_count: self.result_count,
            max_channels: self.max_channels,
            items_per_channel: self.items_per_channel,
            channel_ids: self.channel_ids.clone(),
        }
    }
}

/// `$TUBEQUOTA_HOME`, else `$HOME/.tubequota`, else `./.tubequota`.
pub fn default_state_dir() -> PathBuf {
    if let Some(path) = env::var_os("TUBEQUOTA_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tubequota");
    }

    PathBuf::from(".tubequota")
}

fn parse_setting<T: FromStr>(name: &str, value: &str) -> Result<T, ValidationError> {
    value.parse().map_err(|_| ValidationError::InvalidSetting {
        name: name.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ValidationError::InvalidSetting {
            name: name.to_owned(),
            value: value.to_owned(),
        }),
    }
}
