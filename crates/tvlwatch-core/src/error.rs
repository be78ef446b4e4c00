use thiserror::Error;

/// Validation and contract errors exposed by `tvlwatch-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("subscription key cannot be empty")]
    EmptySubscriptionKey,

    #[error("identifier cannot be empty")]
    EmptyIdentifier,

    #[error("invalid resolution '{value}', expected one of 1m, 5m, 15m, 1h, 4h, 1d")]
    InvalidResolution { value: String },

    #[error("time range start {from} is after end {to}")]
    InvalidTimeRange { from: i64, to: i64 },

    #[error("invalid base url '{value}': {reason}")]
    InvalidBaseUrl { value: String, reason: &'static str },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}
