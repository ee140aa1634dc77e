//! # Domain Models
//!
//! Canonical domain types for harvesting recent videos from subscribed channels.
//!
//! ## Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChannelId`] | Validated opaque channel identifier |
//! | [`Channel`] | Channel id plus display name |
//! | [`Tier`] | Retrieval strategy (primary, secondary, tertiary) |
//! | [`Item`] | Published video with optional engagement stats |
//! | [`ItemStats`] | View, like and comment counters |
//! | [`TimeWindow`] | Look-back window (week, month, explicit start) |
//! | [`SortKey`] | Ranking metric |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! All identifiers and enums validate at construction and round-trip through serde.

mod channel;
mod item;
mod timestamp;
mod window;

pub use channel::{Channel, ChannelId, Tier};
pub use item::{rank_items, Item, ItemStats};
pub use timestamp::UtcDateTime;
pub use window::{SortKey, TimeWindow};
