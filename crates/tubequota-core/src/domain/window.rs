use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::UtcDateTime;
use crate::ValidationError;

const DAY_SECS: u64 = 86_400;

/// Look-back window bounding which items a collection keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "since")]
pub enum TimeWindow {
    /// Last 7 days.
    #[default]
    Week,
    /// Last 30 days.
    Month,
    Since(UtcDateTime),
}

impl TimeWindow {
    /// Lower bound on `published_at` relative to `now`. Relative windows start
    /// at UTC midnight so repeated runs on one day share cache keys.
    pub fn published_after(self, now: UtcDateTime) -> UtcDateTime {
        match self {
            Self::Week => now.saturating_sub(Duration::from_secs(7 * DAY_SECS)).start_of_day(),
            Self::Month => now.saturating_sub(Duration::from_secs(30 * DAY_SECS)).start_of_day(),
            Self::Since(start) => start,
        }
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Week => f.write_str("week"),
            Self::Month => f.write_str("month"),
            Self::Since(start) => write!(f, "{start}"),
        }
    }
}

impl FromStr for TimeWindow {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            _ => UtcDateTime::parse(value.trim())
                .map(Self::Since)
                .map_err(|_| ValidationError::InvalidTimeWindow {
                    value: value.to_owned(),
                }),
        }
    }
}

/// Engagement metric used to rank items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Views,
    Likes,
    Comments,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Views => "views",
            Self::Likes => "likes",
            Self::Comments => "comments",
        }
    }
}

impl Display for SortKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "views" | "view_count" => Ok(Self::Views),
            "likes" | "like_count" => Ok(Self::Likes),
            "comments" | "comment_count" => Ok(Self::Comments),
            _ => Err(ValidationError::InvalidSortKey {
                value: value.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_window_looks_back_seven_days() {
        let now = UtcDateTime::parse("2024-01-08T12:00:00Z").expect("valid");
        assert_eq!(
            TimeWindow::Week.published_after(now).format_rfc3339(),
            "2024-01-01T00:00:00Z"
        );
        assert_eq!(
            TimeWindow::Month.published_after(now).format_rfc3339(),
            "2023-12-09T00:00:00Z"
        );
    }

    #[test]
    fn parses_explicit_start() {
        let window: TimeWindow = "2024-02-01T00:00:00Z".parse().expect("must parse");
        let now = UtcDateTime::parse("2024-03-01T00:00:00Z").expect("valid");
        assert_eq!(window.published_after(now).format_rfc3339(), "2024-02-01T00:00:00Z");
    }

    #[test]
    fn rejects_unknown_window() {
        let err = "fortnight".parse::<TimeWindow>().expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidTimeWindow { .. }));
    }

    #[test]
    fn sort_key_accepts_field_aliases() {
        assert_eq!("view_count".parse::<SortKey>().expect("alias"), SortKey::Views);
        assert_eq!("Likes".parse::<SortKey>().expect("case"), SortKey::Likes);
        assert!("shares".parse::<SortKey>().is_err());
    }
}
