use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_CHANNEL_ID_LEN: usize = 64;

/// Opaque channel identifier as issued by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyChannelId);
        }

        let len = trimmed.chars().count();
        if len > MAX_CHANNEL_ID_LEN {
            return Err(ValidationError::ChannelIdTooLong {
                len,
                max: MAX_CHANNEL_ID_LEN,
            });
        }

        for (index, ch) in trimmed.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || ch == '_' || ch == '-';
            if !valid {
                return Err(ValidationError::ChannelIdInvalidChar { ch, index });
            }
        }

        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for ChannelId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl FromStr for ChannelId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl From<ChannelId> for String {
    fn from(value: ChannelId) -> Self {
        value.0
    }
}

/// A content publisher whose recent uploads are harvested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub display_name: String,
}

impl Channel {
    pub fn new(id: ChannelId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Channel known only by id; the id doubles as its display name.
    pub fn from_id(id: ChannelId) -> Self {
        let display_name = id.to_string();
        Self { id, display_name }
    }
}

/// Retrieval strategy, ordered from richest and most expensive to cheapest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Keyword/date search; 100 units per call.
    Primary,
    /// Uploads playlist paging; 1 unit per call.
    Secondary,
    /// Public syndication feed; free, no stats.
    Tertiary,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Primary, Tier::Secondary, Tier::Tertiary];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
        }
    }

    /// Next cheaper tier, `None` from the floor.
    pub fn cheaper(self) -> Option<Tier> {
        match self {
            Self::Primary => Some(Self::Secondary),
            Self::Secondary => Some(Self::Tertiary),
            Self::Tertiary => None,
        }
    }

    /// This tier followed by every cheaper one.
    pub fn descending_from(self) -> impl Iterator<Item = Tier> {
        Self::ALL.into_iter().filter(move |tier| *tier >= self)
    }

    pub fn supports_statistics(self) -> bool {
        !matches!(self, Self::Tertiary)
    }

    pub fn requires_auth(self) -> bool {
        !matches!(self, Self::Tertiary)
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            "tertiary" => Ok(Self::Tertiary),
            _ => Err(ValidationError::InvalidTier {
                value: value.to_owned(),
            }),
        }
    }
}
