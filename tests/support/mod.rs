//! Shared fixtures for the behaviour tests: a scripted video source that
//! records every remote call, plus small constructors.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use tubequota_core::{
    AcquisitionEngineBuilder, Channel, ChannelId, DiscoveredVideo, FetchError, ItemStats, ManualClock,
    PlaylistRequest, RetryConfig, SearchRequest, SourceFuture, SubscriptionPage, UtcDateTime, VideoPage,
    VideoSource, VideoStatistics,
};

pub fn channel(id: &str) -> ChannelId {
    ChannelId::parse(id).expect("valid channel id")
}

pub fn ts(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("valid timestamp")
}

pub fn clock_at(value: &str) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(ts(value)))
}

pub fn video(id: &str, channel_id: &str, published_at: &str) -> DiscoveredVideo {
    DiscoveredVideo {
        id: id.to_owned(),
        channel_id: channel(channel_id),
        channel_title: format!("{channel_id} title"),
        title: format!("video {id}"),
        published_at: ts(published_at),
    }
}

pub fn views(count: u64) -> ItemStats {
    ItemStats {
        views: count,
        likes: count / 10,
        comments: count / 100,
    }
}

/// In-memory engine over `source` with no retry delay.
pub fn engine_builder(source: &Arc<ScriptedSource>, clock: &Arc<ManualClock>) -> AcquisitionEngineBuilder {
    let source: Arc<dyn VideoSource> = source.clone();
    AcquisitionEngineBuilder::new(source)
        .with_clock(clock.clone())
        .with_retry(RetryConfig::fixed(Duration::ZERO, 2))
}

/// Video source answering from fixed tables.
#[derive(Default)]
pub struct ScriptedSource {
    subscriptions: Vec<Channel>,
    search: HashMap<ChannelId, Result<Vec<DiscoveredVideo>, FetchError>>,
    uploads: HashMap<ChannelId, Result<Option<String>, FetchError>>,
    playlists: HashMap<String, Vec<DiscoveredVideo>>,
    feeds: HashMap<ChannelId, Result<Vec<DiscoveredVideo>, FetchError>>,
    stats: HashMap<String, ItemStats>,
    transient_search_failures: Mutex<HashMap<ChannelId, u32>>,
    search_gates: HashMap<ChannelId, Arc<Notify>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriptions(mut self, channels: &[&str]) -> Self {
        self.subscriptions = channels
            .iter()
            .map(|id| Channel::new(channel(id), format!("{id} title")))
            .collect();
        self
    }

    pub fn with_search(mut self, channel_id: &str, videos: Vec<DiscoveredVideo>) -> Self {
        self.search.insert(channel(channel_id), Ok(videos));
        self
    }

    pub fn with_search_error(mut self, channel_id: &str, error: FetchError) -> Self {
        self.search.insert(channel(channel_id), Err(error));
        self
    }

    /// The first `times` searches for the channel fail transiently.
    pub fn with_transient_search_failures(self, channel_id: &str, times: u32) -> Self {
        self.transient_search_failures
            .lock()
            .expect("lock")
            .insert(channel(channel_id), times);
        self
    }

    /// Searches for the channel wait until `gate` is notified.
    pub fn with_search_gate(mut self, channel_id: &str, gate: Arc<Notify>) -> Self {
        self.search_gates.insert(channel(channel_id), gate);
        self
    }

    pub fn with_uploads(mut self, channel_id: &str, playlist_id: &str, videos: Vec<DiscoveredVideo>) -> Self {
        self.uploads
            .insert(channel(channel_id), Ok(Some(playlist_id.to_owned())));
        self.playlists.insert(playlist_id.to_owned(), videos);
        self
    }

    pub fn with_uploads_error(mut self, channel_id: &str, error: FetchError) -> Self {
        self.uploads.insert(channel(channel_id), Err(error));
        self
    }

    pub fn with_feed(mut self, channel_id: &str, videos: Vec<DiscoveredVideo>) -> Self {
        self.feeds.insert(channel(channel_id), Ok(videos));
        self
    }

    pub fn with_stats(mut self, video_id: &str, stats: ItemStats) -> Self {
        self.stats.insert(video_id.to_owned(), stats);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("lock").push(call);
    }
}

impl VideoSource for ScriptedSource {
    fn list_subscriptions<'a>(&'a self, page_token: Option<String>) -> SourceFuture<'a, SubscriptionPage> {
        Box::pin(async move {
            self.record(format!("subscriptions:{}", page_token.unwrap_or_default()));
            Ok(SubscriptionPage {
                channels: self.subscriptions.clone(),
                next_page_token: None,
            })
        })
    }

    fn search<'a>(&'a self, req: SearchRequest) -> SourceFuture<'a, VideoPage> {
        Box::pin(async move {
            self.record(format!("search:{}", req.channel_id));
            if let Some(gate) = self.search_gates.get(&req.channel_id) {
                gate.notified().await;
            }
            {
                let mut failures = self.transient_search_failures.lock().expect("lock");
                if let Some(remaining) = failures.get_mut(&req.channel_id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(FetchError::transient("connection reset"));
                    }
                }
            }
            match self.search.get(&req.channel_id) {
                Some(Ok(videos)) => Ok(VideoPage {
                    videos: videos
                        .iter()
                        .filter(|video| video.published_at >= req.published_after)
                        .cloned()
                        .collect(),
                    next_page_token: None,
                }),
                Some(Err(error)) => Err(error.clone()),
                None => Ok(VideoPage {
                    videos: Vec::new(),
                    next_page_token: None,
                }),
            }
        })
    }

    fn uploads_playlist<'a>(&'a self, channel_id: ChannelId) -> SourceFuture<'a, Option<String>> {
        Box::pin(async move {
            self.record(format!("channels:{channel_id}"));
            self.uploads.get(&channel_id).cloned().unwrap_or(Ok(None))
        })
    }

    fn playlist_items<'a>(&'a self, req: PlaylistRequest) -> SourceFuture<'a, VideoPage> {
        Box::pin(async move {
            self.record(format!("playlist:{}", req.playlist_id));
            Ok(VideoPage {
                videos: self.playlists.get(&req.playlist_id).cloned().unwrap_or_default(),
                next_page_token: None,
            })
        })
    }

    fn video_statistics<'a>(&'a self, ids: Vec<String>) -> SourceFuture<'a, Vec<VideoStatistics>> {
        Box::pin(async move {
            self.record(format!("videos:{}", ids.join(",")));
            Ok(ids
                .into_iter()
                .filter_map(|id| self.stats.get(&id).map(|stats| VideoStatistics { id, stats: *stats }))
                .collect())
        })
    }

    fn public_feed<'a>(&'a self, channel_id: ChannelId) -> SourceFuture<'a, Vec<DiscoveredVideo>> {
        Box::pin(async move {
            self.record(format!("feed:{channel_id}"));
            self.feeds.get(&channel_id).cloned().unwrap_or(Ok(Vec::new()))
        })
    }
}
