//! Video source contract and request/response types.
//!
//! [`VideoSource`] is the seam between the tiered fetcher and the remote
//! platform. Every remote call is one [`Operation`] with a fixed unit cost.
//!
//! # Operations
//!
//! | Operation | Wire name | Unit cost | Auth | Cache TTL |
//! |-----------|-----------|-----------|------|-----------|
//! | [`Operation::ListSubscriptions`] | `subscriptions.list` | 1 / page | yes | week |
//! | [`Operation::Search`] | `search.list` | 100 | yes | day |
//! | [`Operation::ChannelDetails`] | `channels.list` | 1 | yes | day |
//! | [`Operation::PlaylistItems`] | `playlistItems.list` | 1 / page | yes | day |
//! | [`Operation::VideoStatistics`] | `videos.list` | 1 / id | yes | day |
//! | [`Operation::PublicFeed`] | `feed` | 0 | no | hour |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::cache::CacheTtl;
use crate::domain::{Channel, ChannelId, ItemStats, UtcDateTime};

/// Remote call kinds; the unit of quota accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ListSubscriptions,
    Search,
    ChannelDetails,
    PlaylistItems,
    VideoStatistics,
    PublicFeed,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListSubscriptions => "subscriptions.list",
            Self::Search => "search.list",
            Self::ChannelDetails => "channels.list",
            Self::PlaylistItems => "playlistItems.list",
            Self::VideoStatistics => "videos.list",
            Self::PublicFeed => "feed",
        }
    }

    /// Directory name used for this operation's cache entries.
    pub const fn cache_namespace(self) -> &'static str {
        match self {
            Self::ListSubscriptions => "subscriptions",
            Self::Search => "search",
            Self::ChannelDetails => "channels",
            Self::PlaylistItems => "playlist_items",
            Self::VideoStatistics => "videos",
            Self::PublicFeed => "feed",
        }
    }

    /// Units charged per call (per id for [`Operation::VideoStatistics`]).
    pub const fn unit_cost(self) -> u64 {
        match self {
            Self::Search => 100,
            Self::PublicFeed => 0,
            Self::ListSubscriptions
            | Self::ChannelDetails
            | Self::PlaylistItems
            | Self::VideoStatistics => 1,
        }
    }

    /// Cost of one call touching `ids` identifiers.
    pub fn cost_for(self, ids: usize) -> u64 {
        match self {
            Self::VideoStatistics => self.unit_cost() * u64::try_from(ids).unwrap_or(u64::MAX),
            _ => self.unit_cost(),
        }
    }

    pub const fn requires_auth(self) -> bool {
        !matches!(self, Self::PublicFeed)
    }

    pub const fn cache_ttl(self) -> CacheTtl {
        match self {
            Self::ListSubscriptions => CacheTtl::Week,
            Self::PublicFeed => CacheTtl::Hour,
            Self::Search | Self::ChannelDetails | Self::PlaylistItems | Self::VideoStatistics => {
                CacheTtl::Day
            }
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification driving retry, fallback and demotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// The ledger refused the reservation; nothing was sent.
    QuotaDenied,
    /// Credentials missing, expired or rejected.
    AuthFailure,
    /// Timeouts, connection failures, 408 and 5xx. Retried, never demotes.
    Transient,
    /// 403/429 from the remote. Counts toward demotion.
    HardRemote,
    /// Payload did not decode.
    Parse,
    /// Other 4xx.
    InvalidRequest,
}

/// Structured fetch error carried through the fetcher and into channel outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            kind,
            message: message.into(),
            status,
        }
    }

    pub fn quota_denied(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::QuotaDenied, message, None)
    }

    pub fn auth(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::new(FetchErrorKind::AuthFailure, message, status)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transient, message, None)
    }

    pub fn hard_remote(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::new(FetchErrorKind::HardRemote, message, status)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Parse, message, None)
    }

    pub fn invalid_request(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::new(FetchErrorKind::InvalidRequest, message, status)
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 => FetchErrorKind::AuthFailure,
            403 | 429 => FetchErrorKind::HardRemote,
            408 | 500..=599 => FetchErrorKind::Transient,
            _ => FetchErrorKind::InvalidRequest,
        };
        Self::new(kind, message, Some(status))
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Transient)
    }

    /// Whether this failure counts toward tier demotion.
    pub const fn counts_toward_demotion(&self) -> bool {
        matches!(self.kind, FetchErrorKind::HardRemote)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::QuotaDenied => "fetch.quota_denied",
            FetchErrorKind::AuthFailure => "fetch.auth",
            FetchErrorKind::Transient => "fetch.transient",
            FetchErrorKind::HardRemote => "fetch.hard_remote",
            FetchErrorKind::Parse => "fetch.parse",
            FetchErrorKind::InvalidRequest => "fetch.invalid_request",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status}, {})", self.message, self.code()),
            None => write!(f, "{} ({})", self.message, self.code()),
        }
    }
}

impl std::error::Error for FetchError {}

/// Video reference returned by discovery calls, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredVideo {
    pub id: String,
    pub channel_id: ChannelId,
    pub channel_title: String,
    pub title: String,
    pub published_at: UtcDateTime,
}

/// One page of the authenticated user's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPage {
    pub channels: Vec<Channel>,
    pub next_page_token: Option<String>,
}

/// One page of search or playlist results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPage {
    pub videos: Vec<DiscoveredVideo>,
    pub next_page_token: Option<String>,
}

/// Statistics for one video id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStatistics {
    pub id: String,
    pub stats: ItemStats,
}

/// Date-bounded search within one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub channel_id: ChannelId,
    pub published_after: UtcDateTime,
    pub max_results: u32,
    pub query: Option<String>,
    pub page_token: Option<String>,
}

/// One page of a playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRequest {
    pub playlist_id: String,
    pub page_size: u32,
    pub page_token: Option<String>,
}

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send + 'a>>;

/// Remote platform contract used by every tier.
///
/// Implementations perform exactly one remote call per method and never
/// retry or reserve quota themselves; the fetcher owns both.
pub trait VideoSource: Send + Sync {
    fn list_subscriptions<'a>(&'a self, page_token: Option<String>) -> SourceFuture<'a, SubscriptionPage>;

    fn search<'a>(&'a self, req: SearchRequest) -> SourceFuture<'a, VideoPage>;

    /// Uploads playlist id for a channel, `None` when the channel is unknown.
    fn uploads_playlist<'a>(&'a self, channel_id: ChannelId) -> SourceFuture<'a, Option<String>>;

    fn playlist_items<'a>(&'a self, req: PlaylistRequest) -> SourceFuture<'a, VideoPage>;

    fn video_statistics<'a>(&'a self, ids: Vec<String>) -> SourceFuture<'a, Vec<VideoStatistics>>;

    /// Recent uploads from the public syndication feed. No auth, no stats.
    fn public_feed<'a>(&'a self, channel_id: ChannelId) -> SourceFuture<'a, Vec<DiscoveredVideo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_statuses() {
        assert_eq!(FetchError::from_status(401, "x").kind(), FetchErrorKind::AuthFailure);
        assert_eq!(FetchError::from_status(403, "x").kind(), FetchErrorKind::HardRemote);
        assert_eq!(FetchError::from_status(429, "x").kind(), FetchErrorKind::HardRemote);
        assert_eq!(FetchError::from_status(408, "x").kind(), FetchErrorKind::Transient);
        assert_eq!(FetchError::from_status(503, "x").kind(), FetchErrorKind::Transient);
        assert_eq!(FetchError::from_status(404, "x").kind(), FetchErrorKind::InvalidRequest);
    }

    #[test]
    fn only_hard_remote_counts_toward_demotion() {
        assert!(FetchError::hard_remote("quota", Some(403)).counts_toward_demotion());
        assert!(!FetchError::transient("timeout").counts_toward_demotion());
        assert!(!FetchError::quota_denied("ledger").counts_toward_demotion());
    }

    #[test]
    fn statistics_cost_scales_with_ids() {
        assert_eq!(Operation::VideoStatistics.cost_for(50), 50);
        assert_eq!(Operation::Search.cost_for(50), 100);
        assert_eq!(Operation::PublicFeed.cost_for(1), 0);
    }

    #[test]
    fn error_display_includes_code_and_status() {
        let error = FetchError::from_status(403, "quotaExceeded");
        assert_eq!(error.to_string(), "quotaExceeded (status 403, fetch.hard_remote)");
    }
}
