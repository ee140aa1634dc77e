use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapters::feed::parse_upload_feed;
use crate::data_source::{
    DiscoveredVideo, FetchError, Operation, PlaylistRequest, SearchRequest, SourceFuture, SubscriptionPage,
    VideoPage, VideoSource, VideoStatistics,
};
use crate::domain::{Channel, ChannelId, ItemStats, UtcDateTime};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::throttling::RequestPacer;
use crate::token::TokenProvider;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_FEED_URL: &str = "https://www.youtube.com/feeds/videos.xml";
const MAX_PAGE_SIZE: u32 = 50;

// ============================================================================
// Wire payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionItem {
    snippet: SubscriptionSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionSnippet {
    #[serde(default)]
    title: String,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    id: ResourceId,
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    channel_id: String,
    #[serde(default)]
    channel_title: String,
    published_at: String,
    #[serde(default)]
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    #[serde(default)]
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: VideoSnippet,
    #[serde(default)]
    content_details: Option<PlaylistContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistContentDetails {
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    video_published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    statistics: Option<StatisticsPayload>,
}

/// Counters arrive as decimal strings; hidden counters are omitted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsPayload {
    #[serde(default)]
    view_count: Option<String>,
    #[serde(default)]
    like_count: Option<String>,
    #[serde(default)]
    comment_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

// ============================================================================
// Adapter
// ============================================================================

/// Video platform adapter over the Data API plus the public upload feed.
///
/// Authenticated calls carry a bearer token. A 401 triggers exactly one token
/// refresh and retry before surfacing as an auth failure.
#[derive(Clone)]
pub struct YouTubeAdapter {
    http_client: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenProvider>,
    pacer: Option<RequestPacer>,
    api_base: String,
    feed_url: String,
    timeout_ms: u64,
}

impl std::fmt::Debug for YouTubeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeAdapter")
            .field("api_base", &self.api_base)
            .field("feed_url", &self.feed_url)
            .field("pacer", &self.pacer)
            .finish_non_exhaustive()
    }
}

impl YouTubeAdapter {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::default()), tokens)
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http_client,
            tokens,
            pacer: None,
            api_base: DEFAULT_API_BASE.to_owned(),
            feed_url: DEFAULT_FEED_URL.to_owned(),
            timeout_ms: 10_000,
        }
    }

    pub fn with_pacer(mut self, pacer: RequestPacer) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_feed_url(mut self, feed_url: impl Into<String>) -> Self {
        self.feed_url = feed_url.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }
        self.http_client.execute(request).await.map_err(|error| {
            if error.retryable() {
                FetchError::transient(error.message())
            } else {
                FetchError::invalid_request(error.message(), None)
            }
        })
    }

    async fn call_api<T: DeserializeOwned>(
        &self,
        operation: Operation,
        resource: &str,
        query: Vec<(&'static str, String)>,
    ) -> Result<T, FetchError> {
        let mut refreshed = false;

        loop {
            let token = self
                .tokens
                .access_token()
                .await
                .map_err(|error| FetchError::auth(error.to_string(), None))?;

            let mut request = HttpRequest::get(format!("{}/{resource}", self.api_base))
                .with_auth(&HttpAuth::BearerToken(token))
                .with_header("accept", "application/json")
                .with_timeout_ms(self.timeout_ms);
            for (name, value) in &query {
                request = request.with_query(*name, value.clone());
            }

            debug!(operation = operation.as_str(), url = %request.full_url(), "calling remote api");
            let response = self.send(request).await?;

            if response.status == 401 && !refreshed {
                warn!(operation = operation.as_str(), "access token rejected; refreshing once");
                self.tokens.invalidate();
                refreshed = true;
                continue;
            }

            return decode_json(operation, &response);
        }
    }
}

fn decode_json<T: DeserializeOwned>(operation: Operation, response: &HttpResponse) -> Result<T, FetchError> {
    if !response.is_success() {
        return Err(FetchError::from_status(
            response.status,
            remote_error_message(operation, response),
        ));
    }

    serde_json::from_str(&response.body).map_err(|error| {
        FetchError::parse(format!("failed to decode {} response: {error}", operation.as_str()))
    })
}

fn remote_error_message(operation: Operation, response: &HttpResponse) -> String {
    match serde_json::from_str::<ErrorEnvelope>(&response.body) {
        Ok(envelope) => {
            let reason = envelope
                .error
                .errors
                .first()
                .map(|detail| detail.reason.as_str())
                .filter(|reason| !reason.is_empty());
            match reason {
                Some(reason) => format!("{} failed: {reason}: {}", operation.as_str(), envelope.error.message),
                None => format!("{} failed: {}", operation.as_str(), envelope.error.message),
            }
        }
        Err(_) => format!("{} failed with status {}", operation.as_str(), response.status),
    }
}

fn parse_published(value: &str) -> Result<UtcDateTime, FetchError> {
    UtcDateTime::parse_any_offset(value)
        .map_err(|_| FetchError::parse(format!("invalid publish timestamp '{value}'")))
}

fn parse_channel_id(value: &str) -> Result<ChannelId, FetchError> {
    ChannelId::parse(value).map_err(|error| FetchError::parse(error.to_string()))
}

fn parse_counter(value: Option<&String>) -> u64 {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(0)
}

fn page_size(requested: u32) -> String {
    requested.clamp(1, MAX_PAGE_SIZE).to_string()
}

impl VideoSource for YouTubeAdapter {
    fn list_subscriptions<'a>(&'a self, page_token: Option<String>) -> SourceFuture<'a, SubscriptionPage> {
        Box::pin(async move {
            let mut query = vec![
                ("part", String::from("snippet")),
                ("mine", String::from("true")),
                ("maxResults", MAX_PAGE_SIZE.to_string()),
                ("order", String::from("alphabetical")),
            ];
            if let Some(token) = page_token {
                query.push(("pageToken", token));
            }

            let envelope: ListEnvelope<SubscriptionItem> =
                self.call_api(Operation::ListSubscriptions, "subscriptions", query).await?;

            let mut channels = Vec::with_capacity(envelope.items.len());
            for item in envelope.items {
                let Some(raw_id) = item.snippet.resource_id.channel_id else {
                    continue;
                };
                channels.push(Channel::new(parse_channel_id(&raw_id)?, item.snippet.title));
            }

            Ok(SubscriptionPage {
                channels,
                next_page_token: envelope.next_page_token,
            })
        })
    }

    fn search<'a>(&'a self, req: SearchRequest) -> SourceFuture<'a, VideoPage> {
        Box::pin(async move {
            let mut query = vec![
                ("part", String::from("snippet")),
                ("channelId", req.channel_id.to_string()),
                ("type", String::from("video")),
                ("order", String::from("date")),
                ("publishedAfter", req.published_after.format_rfc3339()),
                ("maxResults", page_size(req.max_results)),
            ];
            if let Some(text) = req.query.filter(|text| !text.trim().is_empty()) {
                query.push(("q", text));
            }
            if let Some(token) = req.page_token {
                query.push(("pageToken", token));
            }

            let envelope: ListEnvelope<SearchItem> = self.call_api(Operation::Search, "search", query).await?;

            let mut videos = Vec::with_capacity(envelope.items.len());
            for item in envelope.items {
                let Some(id) = item.id.video_id else {
                    continue;
                };
                videos.push(DiscoveredVideo {
                    id,
                    channel_id: parse_channel_id(&item.snippet.channel_id)?,
                    channel_title: item.snippet.channel_title,
                    title: item.snippet.title,
                    published_at: parse_published(&item.snippet.published_at)?,
                });
            }

            Ok(VideoPage {
                videos,
                next_page_token: envelope.next_page_token,
            })
        })
    }

    fn uploads_playlist<'a>(&'a self, channel_id: ChannelId) -> SourceFuture<'a, Option<String>> {
        Box::pin(async move {
            let query = vec![
                ("part", String::from("contentDetails")),
                ("id", channel_id.to_string()),
            ];
            let envelope: ListEnvelope<ChannelItem> =
                self.call_api(Operation::ChannelDetails, "channels", query).await?;

            Ok(envelope
                .items
                .into_iter()
                .next()
                .and_then(|item| item.content_details.related_playlists.uploads))
        })
    }

    fn playlist_items<'a>(&'a self, req: PlaylistRequest) -> SourceFuture<'a, VideoPage> {
        Box::pin(async move {
            let mut query = vec![
                ("part", String::from("snippet,contentDetails")),
                ("playlistId", req.playlist_id),
                ("maxResults", page_size(req.page_size)),
            ];
            if let Some(token) = req.page_token {
                query.push(("pageToken", token));
            }

            let envelope: ListEnvelope<PlaylistItem> =
                self.call_api(Operation::PlaylistItems, "playlistItems", query).await?;

            let mut videos = Vec::with_capacity(envelope.items.len());
            for item in envelope.items {
                let details = item.content_details.unwrap_or(PlaylistContentDetails {
                    video_id: None,
                    video_published_at: None,
                });
                let id = details
                    .video_id
                    .or_else(|| item.snippet.resource_id.and_then(|resource| resource.video_id));
                let Some(id) = id else {
                    continue;
                };
                let published = details
                    .video_published_at
                    .unwrap_or(item.snippet.published_at);

                videos.push(DiscoveredVideo {
                    id,
                    channel_id: parse_channel_id(&item.snippet.channel_id)?,
                    channel_title: item.snippet.channel_title,
                    title: item.snippet.title,
                    published_at: parse_published(&published)?,
                });
            }

            Ok(VideoPage {
                videos,
                next_page_token: envelope.next_page_token,
            })
        })
    }

    fn video_statistics<'a>(&'a self, ids: Vec<String>) -> SourceFuture<'a, Vec<VideoStatistics>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            if ids.len() > MAX_PAGE_SIZE as usize {
                return Err(FetchError::invalid_request(
                    format!("videos.list accepts at most {MAX_PAGE_SIZE} ids, got {}", ids.len()),
                    None,
                ));
            }

            let query = vec![("part", String::from("statistics")), ("id", ids.join(","))];
            let envelope: ListEnvelope<VideoItem> =
                self.call_api(Operation::VideoStatistics, "videos", query).await?;

            Ok(envelope
                .items
                .into_iter()
                .map(|item| {
                    let stats = item
                        .statistics
                        .map(|raw| ItemStats {
                            views: parse_counter(raw.view_count.as_ref()),
                            likes: parse_counter(raw.like_count.as_ref()),
                            comments: parse_counter(raw.comment_count.as_ref()),
                        })
                        .unwrap_or_default();
                    VideoStatistics { id: item.id, stats }
                })
                .collect())
        })
    }

    fn public_feed<'a>(&'a self, channel_id: ChannelId) -> SourceFuture<'a, Vec<DiscoveredVideo>> {
        Box::pin(async move {
            let request = HttpRequest::get(self.feed_url.clone())
                .with_query("channel_id", channel_id.to_string())
                .with_timeout_ms(self.timeout_ms);

            debug!(operation = Operation::PublicFeed.as_str(), channel = %channel_id, "fetching public feed");
            let response = self.send(request).await?;
            if !response.is_success() {
                return Err(FetchError::from_status(
                    response.status,
                    format!("feed for channel {channel_id} returned status {}", response.status),
                ));
            }

            parse_upload_feed(response.body.as_bytes(), &channel_id)
        })
    }
}
