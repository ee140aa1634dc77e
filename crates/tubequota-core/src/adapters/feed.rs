//! Public Atom upload feed parsing.

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;

use crate::data_source::{DiscoveredVideo, FetchError};
use crate::domain::{ChannelId, UtcDateTime};

const VIDEO_ID_PREFIX: &str = "yt:video:";

/// Parse a channel upload feed. Entries without a recognizable video id or
/// publish time are skipped rather than failing the whole feed.
pub fn parse_upload_feed(bytes: &[u8], channel_id: &ChannelId) -> Result<Vec<DiscoveredVideo>, FetchError> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|error| FetchError::parse(format!("feed parse error: {error}")))?;

    let feed_title = feed.title.map(|title| title.content).unwrap_or_default();

    let videos = feed
        .entries
        .into_iter()
        .filter_map(|entry| to_video(entry, channel_id, &feed_title))
        .collect();
    Ok(videos)
}

fn to_video(entry: Entry, channel_id: &ChannelId, feed_title: &str) -> Option<DiscoveredVideo> {
    let id = video_id(&entry)?;
    let published_at = entry.published.or(entry.updated).and_then(to_utc)?;

    let channel_title = entry
        .authors
        .first()
        .map(|author| author.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| feed_title.to_owned());

    Some(DiscoveredVideo {
        id,
        channel_id: channel_id.clone(),
        channel_title,
        title: entry.title.map(|title| title.content).unwrap_or_default(),
        published_at,
    })
}

fn to_utc(value: DateTime<Utc>) -> Option<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(value.timestamp()).ok()
}

fn video_id(entry: &Entry) -> Option<String> {
    if let Some(id) = entry.id.strip_prefix(VIDEO_ID_PREFIX) {
        return Some(id.to_owned());
    }
    entry.links.iter().find_map(|link| {
        link.href
            .split_once("watch?v=")
            .map(|(_, rest)| rest.split('&').next().unwrap_or(rest).to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
 <id>yt:channel:UCabc</id>
 <title>Rust Talks</title>
 <entry>
  <id>yt:video:vid001</id>
  <yt:videoId>vid001</yt:videoId>
  <title>Async in depth</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=vid001"/>
  <author><name>Rust Talks</name></author>
  <published>2024-03-01T10:00:00+00:00</published>
  <updated>2024-03-01T11:00:00+00:00</updated>
 </entry>
 <entry>
  <id>urn:other:1</id>
  <title>Linked only</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=vid002&amp;t=3"/>
  <published>2024-02-20T08:00:00+00:00</published>
 </entry>
 <entry>
  <id>urn:other:2</id>
  <title>No id at all</title>
  <published>2024-02-20T08:00:00+00:00</published>
 </entry>
</feed>"#;

    #[test]
    fn parses_entries_with_video_ids() {
        let channel = ChannelId::parse("UCabc").expect("valid");
        let videos = parse_upload_feed(FEED.as_bytes(), &channel).expect("feed parses");

        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].id, "vid001");
        assert_eq!(videos[0].title, "Async in depth");
        assert_eq!(videos[0].channel_title, "Rust Talks");
        assert_eq!(videos[0].published_at.format_rfc3339(), "2024-03-01T10:00:00Z");
        assert_eq!(videos[1].id, "vid002");
        assert_eq!(videos[1].channel_title, "Rust Talks");
    }

    #[test]
    fn malformed_feed_is_a_parse_error() {
        let channel = ChannelId::parse("UCabc").expect("valid");
        let err = parse_upload_feed(b"<html>nope", &channel).expect_err("must fail");
        assert_eq!(err.code(), "fetch.parse");
    }
}
