//! Streaming session management.
//!
//! One long-lived NDJSON connection is held per manager. Failures are
//! classified and folded into the session state machine; consumers observe
//! everything through a broadcast channel of [`StreamEvent`]s.

mod decoder;
mod manager;
mod session;

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Backoff, ErrorCategory, HealthCheck, TradingUpdate};

pub use decoder::{decode_record, NdjsonDecoder, StreamRecord};
pub use manager::{SessionSnapshot, StreamManager};
pub use session::{FailureAction, StreamSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Idle,
    Connecting,
    Connected,
    Error,
    AddonBlocked,
}

impl StreamStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::AddonBlocked => "addon_blocked",
        }
    }
}

impl Display for StreamStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing message attached to a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamNotice {
    pub key: String,
    pub category: ErrorCategory,
    pub message: String,
}

/// Notification published by the stream manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { key: String, status: StreamStatus },
    Health(HealthCheck),
    Trade(TradingUpdate),
    Notice(StreamNotice),
}

/// Timing and retry policy of the stream manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    pub watchdog_interval: Duration,
    /// Silence strictly longer than this while connected trips the watchdog.
    pub silence_timeout: Duration,
    pub watchdog_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Addon failures for one key before it is blocked.
    pub addon_block_threshold: u32,
    pub backoff: Backoff,
    /// Bounds the wait for response headers only.
    pub connect_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_secs(30),
            silence_timeout: Duration::from_secs(90),
            watchdog_reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            addon_block_threshold: 2,
            backoff: Backoff::default(),
            connect_timeout: Duration::from_secs(15),
            event_capacity: 256,
        }
    }
}
