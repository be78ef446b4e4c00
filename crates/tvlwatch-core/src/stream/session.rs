//! Connection state for one subscription key.
//!
//! All counters change only through the transition methods below, so the
//! backoff and block rules can be exercised without a live connection.

use std::time::Duration;

use tokio::time::Instant;

use super::{StreamConfig, StreamStatus};
use crate::ErrorCategory;

/// What the manager must do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// The key is blocked for lack of a streaming entitlement.
    BlockAddon,
    /// Credentials must change before another attempt can succeed.
    AwaitCredentials,
    /// Reconnect after `delay`. `attempt` is 1-based.
    Retry { delay: Duration, attempt: u32 },
    /// Reconnect budget is spent.
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct StreamSession {
    subscription_key: String,
    status: StreamStatus,
    connected: bool,
    last_data_at: Option<Instant>,
    reconnect_attempts: u32,
    addon_error_detected: bool,
    addon_error_attempts: u32,
}

impl StreamSession {
    /// New idle session. `addon_error_attempts` carries over earlier failures for the key.
    pub fn new(subscription_key: impl Into<String>, addon_error_attempts: u32) -> Self {
        Self {
            subscription_key: subscription_key.into(),
            status: StreamStatus::Idle,
            connected: false,
            last_data_at: None,
            reconnect_attempts: 0,
            addon_error_detected: addon_error_attempts > 0,
            addon_error_attempts,
        }
    }

    pub fn subscription_key(&self) -> &str {
        &self.subscription_key
    }

    pub const fn status(&self) -> StreamStatus {
        self.status
    }

    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    pub const fn last_data_at(&self) -> Option<Instant> {
        self.last_data_at
    }

    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub const fn addon_error_detected(&self) -> bool {
        self.addon_error_detected
    }

    pub const fn addon_error_attempts(&self) -> u32 {
        self.addon_error_attempts
    }

    /// Connected or on its way there.
    pub const fn is_live(&self) -> bool {
        matches!(self.status, StreamStatus::Connecting | StreamStatus::Connected)
    }

    pub fn begin_connect(&mut self) {
        self.status = StreamStatus::Connecting;
        self.connected = false;
    }

    pub fn mark_connected(&mut self, now: Instant) {
        self.status = StreamStatus::Connected;
        self.connected = true;
        self.reconnect_attempts = 0;
        self.last_data_at = Some(now);
    }

    pub fn record_data(&mut self, now: Instant) {
        self.last_data_at = Some(now);
    }

    /// Apply a failed attempt and decide the follow-up.
    pub fn on_failure(&mut self, category: ErrorCategory, config: &StreamConfig) -> FailureAction {
        self.connected = false;

        match category {
            ErrorCategory::Addon => {
                self.addon_error_detected = true;
                self.addon_error_attempts = self.addon_error_attempts.saturating_add(1);
                if self.addon_error_attempts >= config.addon_block_threshold {
                    self.status = StreamStatus::AddonBlocked;
                    return FailureAction::BlockAddon;
                }
                self.schedule_retry(config)
            }
            ErrorCategory::Auth => {
                self.status = StreamStatus::Error;
                FailureAction::AwaitCredentials
            }
            ErrorCategory::Network | ErrorCategory::Unknown => self.schedule_retry(config),
        }
    }

    fn schedule_retry(&mut self, config: &StreamConfig) -> FailureAction {
        self.status = StreamStatus::Error;
        if self.reconnect_attempts >= config.max_reconnect_attempts {
            return FailureAction::GiveUp;
        }
        let delay = config.backoff.delay(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        FailureAction::Retry {
            delay,
            attempt: self.reconnect_attempts,
        }
    }

    /// Returns true when a connected session has been silent for longer
    /// than `silence_timeout`; the session then drops to `Error`.
    pub fn watchdog_check(&mut self, now: Instant, silence_timeout: Duration) -> bool {
        if !self.connected {
            return false;
        }
        let Some(last_data_at) = self.last_data_at else {
            return false;
        };
        if now.saturating_duration_since(last_data_at) <= silence_timeout {
            return false;
        }

        self.connected = false;
        self.status = StreamStatus::Error;
        true
    }

    /// Manual reconnect starts a fresh retry budget.
    pub fn reset_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    pub fn clear_addon_errors(&mut self) {
        self.addon_error_detected = false;
        self.addon_error_attempts = 0;
        if self.status == StreamStatus::AddonBlocked {
            self.status = StreamStatus::Idle;
        }
    }
}
