use thiserror::Error;

use crate::data_source::FetchError;
use crate::persistence::PersistenceError;
use crate::token::AuthError;

/// Validation and contract errors exposed by `tubequota-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("channel id cannot be empty")]
    EmptyChannelId,
    #[error("channel id length {len} exceeds max {max}")]
    ChannelIdTooLong { len: usize, max: usize },
    #[error("channel id contains invalid character '{ch}' at index {index}")]
    ChannelIdInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("invalid time window '{value}', expected week, month or an RFC3339 UTC timestamp")]
    InvalidTimeWindow { value: String },
    #[error("invalid sort key '{value}', expected one of views, likes, comments")]
    InvalidSortKey { value: String },
    #[error("invalid tier '{value}', expected one of primary, secondary, tertiary")]
    InvalidTier { value: String },
    #[error("invalid phase '{value}', expected one of discovery, enrichment")]
    InvalidPhase { value: String },
    #[error("invalid utc offset '{value}', expected +HH:MM or -HH:MM")]
    InvalidUtcOffset { value: String },

    #[error("invalid value '{value}' for {name}")]
    InvalidSetting { name: String, value: String },
    #[error("field '{field}' must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("safety buffer {buffer} must be lower than the daily limit {limit}")]
    BufferExceedsLimit { buffer: u64, limit: u64 },
    #[error("no-auth mode requires explicit channel ids")]
    ChannelsRequiredWithoutAuth,
    #[error("no collection has been planned yet; run a collection first")]
    NoCollectionPlanned,
    #[error("phase '{phase}' cannot run before phase '{pending}' completes")]
    PhaseOutOfOrder {
        phase: &'static str,
        pending: &'static str,
    },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
