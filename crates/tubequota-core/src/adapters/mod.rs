//! Remote platform adapters implementing [`VideoSource`](crate::VideoSource).

pub mod feed;
pub mod youtube;

pub use youtube::{YouTubeAdapter, DEFAULT_API_BASE, DEFAULT_FEED_URL};
