use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{ChannelId, SortKey, Tier, UtcDateTime};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Engagement counters attached during enrichment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStats {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
}

impl ItemStats {
    pub fn metric(&self, key: SortKey) -> u64 {
        match key {
            SortKey::Views => self.views,
            SortKey::Likes => self.likes,
            SortKey::Comments => self.comments,
        }
    }
}

/// A single published video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub channel_id: ChannelId,
    pub channel_title: String,
    pub title: String,
    pub published_at: UtcDateTime,
    /// Absent when the item came from the free tier or enrichment was denied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ItemStats>,
    /// Tier that discovered the item.
    pub tier: Tier,
    pub url: String,
}

impl Item {
    pub fn watch_url(id: &str) -> String {
        format!("{WATCH_URL_PREFIX}{id}")
    }

    /// Ranking metric; missing stats rank as zero.
    pub fn metric(&self, key: SortKey) -> u64 {
        self.stats.map(|stats| stats.metric(key)).unwrap_or(0)
    }

    pub fn needs_enrichment(&self) -> bool {
        self.stats.is_none() && self.tier.supports_statistics()
    }
}

/// Dedupe by item id, sort by `key` descending with id as the tie-break, and keep `count`.
pub fn rank_items(items: impl IntoIterator<Item = Item>, key: SortKey, count: usize) -> Vec<Item> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<Item> = Vec::new();

    for item in items {
        if seen.insert(item.id.clone()) {
            ranked.push(item);
            continue;
        }
        // Keep whichever duplicate carries statistics.
        if item.stats.is_some() {
            if let Some(existing) = ranked.iter_mut().find(|existing| existing.id == item.id) {
                if existing.stats.is_none() {
                    *existing = item;
                }
            }
        }
    }

    ranked.sort_by(|left, right| {
        right
            .metric(key)
            .cmp(&left.metric(key))
            .then_with(|| left.id.cmp(&right.id))
    });
    ranked.truncate(count);
    ranked
}
