//! Reconnect delay strategies.

use std::time::Duration;

/// Backoff strategy between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between attempts.
    Fixed { delay: Duration },
    /// `base * factor^attempt`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        /// Spread the delay by up to +/- 50%.
        jitter: bool,
    },
}

impl Default for Backoff {
    /// 1 s doubling per attempt, capped at 30 s, no jitter.
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped = Duration::from_secs_f64(seconds.min(max.as_secs_f64()));

                if !jitter {
                    return capped;
                }

                let capped_ms = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
                let spread = capped_ms / 2;
                let offset = fastrand::u64(0..=spread.saturating_mul(2));
                Duration::from_millis(capped_ms.saturating_sub(spread).saturating_add(offset))
            }
        }
    }
}
