use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::{Resolution, ValidationError};

/// Entry of the tradable symbol list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// Current state of one token or pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub price_usd: f64,
    #[serde(default)]
    pub tvl_usd: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    /// Unix seconds of the last upstream update.
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// One OHLCV candle. `time` is the candle open in Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Historical series for one id at one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySeries {
    pub id: String,
    pub resolution: Resolution,
    pub bars: Vec<HistoryBar>,
}

/// Resolved logo location for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoAsset {
    pub symbol: String,
    pub url: String,
}

/// Closed time window in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    from: i64,
    to: i64,
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Result<Self, ValidationError> {
        if from > to {
            return Err(ValidationError::InvalidTimeRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Build a range from two RFC3339 UTC timestamps.
    pub fn parse_rfc3339(from: &str, to: &str) -> Result<Self, ValidationError> {
        Self::new(parse_utc_seconds(from)?, parse_utc_seconds(to)?)
    }

    /// The `count` most recent candles, including the one still forming at
    /// `now`.
    ///
    /// Both bounds sit on candle boundaries, so every call made within the
    /// same candle yields the same range.
    pub fn trailing(now: i64, resolution: Resolution, count: u32) -> Self {
        let step = resolution.seconds();
        let to = now.saturating_add((step - now.rem_euclid(step)) % step);
        let span = step.saturating_mul(i64::from(count));
        Self {
            from: to.saturating_sub(span),
            to,
        }
    }

    pub const fn from(self) -> i64 {
        self.from
    }

    pub const fn to(self) -> i64 {
        self.to
    }
}

fn parse_utc_seconds(input: &str) -> Result<i64, ValidationError> {
    let not_utc = || ValidationError::TimestampNotUtc {
        value: input.to_owned(),
    };
    let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| not_utc())?;
    if parsed.offset() != UtcOffset::UTC {
        return Err(not_utc());
    }
    Ok(parsed.unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range() {
        let err = TimeRange::new(10, 5).expect_err("must fail");
        assert_eq!(err, ValidationError::InvalidTimeRange { from: 10, to: 5 });
    }

    #[test]
    fn parses_rfc3339_bounds() {
        let range = TimeRange::parse_rfc3339("2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z")
            .expect("must parse");
        assert_eq!(range.from(), 1_704_067_200);
        assert_eq!(range.to() - range.from(), 86_400);
    }

    #[test]
    fn rejects_offset_timestamps() {
        let err = TimeRange::parse_rfc3339("2024-01-01T01:00:00+01:00", "2024-01-02T00:00:00Z")
            .expect_err("must fail");
        assert!(matches!(err, ValidationError::TimestampNotUtc { .. }));
    }

    #[test]
    fn trailing_window_spans_requested_candles() {
        let range = TimeRange::trailing(10_020, Resolution::OneMinute, 10);
        assert_eq!(range.from(), 9_420);
        assert_eq!(range.to(), 10_020);
    }

    #[test]
    fn trailing_window_snaps_to_the_end_of_the_forming_candle() {
        let early = TimeRange::trailing(7_201, Resolution::OneHour, 2);
        let late = TimeRange::trailing(10_799, Resolution::OneHour, 2);

        assert_eq!(early, late);
        assert_eq!(early.to(), 10_800);
        assert_eq!(early.from(), 3_600);
    }

    #[test]
    fn snapshot_tolerates_missing_optional_fields() {
        let snapshot: TokenSnapshot =
            serde_json::from_str(r#"{"id":"pool-1","price_usd":1.5}"#).expect("decode");
        assert_eq!(snapshot.tvl_usd, None);
        assert_eq!(snapshot.price_usd, 1.5);
    }
}
