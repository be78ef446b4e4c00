//! Admission-controlled request queue.
//!
//! Operations are admitted in FIFO order and at most `max_concurrent` run at
//! once. Completion order is unconstrained. Every settlement, including a
//! panic inside the operation, releases its slot and drains the queue again.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub const MAX_CONCURRENT_REQUESTS: usize = 3;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A dispatched operation ended without producing an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dispatched operation was abandoned before it settled")]
pub struct DispatchError;

/// Upstream request budget: at most `limit` calls per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub window: Duration,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub max_concurrent: usize,
    pub quota: Option<RateQuota>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_REQUESTS,
            quota: None,
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    active: usize,
    draining: bool,
}

struct DispatcherInner {
    state: Mutex<QueueState>,
    max_concurrent: usize,
    limiter: Option<Arc<DirectRateLimiter>>,
}

/// Bounded-concurrency dispatcher shared by every outbound REST call.
#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("rate_limited", &self.inner.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl RequestDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let limiter = config
            .quota
            .and_then(quota_from_window)
            .map(|quota| Arc::new(RateLimiter::direct(quota)));

        Self {
            inner: Arc::new(DispatcherInner {
                state: Mutex::new(QueueState::default()),
                max_concurrent: config.max_concurrent.max(1),
                limiter,
            }),
        }
    }

    pub fn with_limit(max_concurrent: usize) -> Self {
        Self::new(DispatcherConfig {
            max_concurrent,
            quota: None,
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.lock().active
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Queue `operation` and resolve with its own outcome once it has run.
    ///
    /// The only dispatcher-originated failure is [`DispatchError`], raised
    /// when the operation panics or the runtime drops it.
    pub async fn add<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<DispatchError> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let limiter = self.inner.limiter.clone();
        let job: Job = Box::pin(async move {
            if let Some(limiter) = limiter {
                limiter.until_ready().await;
            }
            let _ = sender.send(operation().await);
        });

        {
            let mut state = self.lock();
            state.pending.push_back(job);
            debug!(pending = state.pending.len(), active = state.active, "operation queued");
        }
        self.drain();

        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("dispatched operation was abandoned");
                Err(E::from(DispatchError))
            }
        }
    }

    fn drain(&self) {
        {
            let mut state = self.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }

        loop {
            // Pulling and clearing the flag share one critical section so a
            // completion racing with the final check is never lost.
            let job = {
                let mut state = self.lock();
                if state.active >= self.inner.max_concurrent {
                    state.draining = false;
                    return;
                }
                match state.pending.pop_front() {
                    Some(job) => {
                        state.active += 1;
                        job
                    }
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            let guard = ActiveGuard {
                dispatcher: self.clone(),
            };
            tokio::spawn(async move {
                let _guard = guard;
                job.await;
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .expect("dispatcher queue mutex should not be poisoned")
    }
}

/// Releases an admission slot when the running operation settles or unwinds.
struct ActiveGuard {
    dispatcher: RequestDispatcher,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.dispatcher.inner.state.lock() {
            state.active = state.active.saturating_sub(1);
        }
        self.dispatcher.drain();
    }
}

fn quota_from_window(quota: RateQuota) -> Option<Quota> {
    let burst = NonZeroU32::new(quota.limit.max(1))?;
    let seconds_per_cell = (quota.window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    Quota::with_period(Duration::from_secs_f64(seconds_per_cell)).map(|q| q.allow_burst(burst))
}
