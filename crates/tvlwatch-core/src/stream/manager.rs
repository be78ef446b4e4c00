use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decoder::{decode_record, NdjsonDecoder, StreamRecord};
use super::session::{FailureAction, StreamSession};
use super::{StreamConfig, StreamEvent, StreamNotice, StreamStatus};
use crate::classifier::{classify, classify_transport, ClassifiedError};
use crate::http_client::{ChunkStream, HttpAuth, HttpError, HttpRequest, StreamingHttpClient};
use crate::{ErrorCategory, ValidationError};

const STREAM_PATH: &str = "/api/v1/tokens/stream";

/// Point-in-time view of the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub key: String,
    pub status: StreamStatus,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub addon_error_attempts: u32,
}

/// Identifies one connection attempt or scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    session_id: u64,
    generation: u64,
}

struct ActiveSession {
    session: StreamSession,
    session_id: u64,
    generation: u64,
    /// Cancels the watchdog, pending reconnects and the connection.
    cancel: CancellationToken,
    connection: Option<CancellationToken>,
}

impl ActiveSession {
    fn ticket(&self) -> Ticket {
        Ticket {
            session_id: self.session_id,
            generation: self.generation,
        }
    }

    fn key(&self) -> String {
        self.session.subscription_key().to_owned()
    }

    fn abort_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancel();
        }
    }

    fn teardown(mut self) {
        self.abort_connection();
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct ManagerState {
    active: Option<ActiveSession>,
    addon_attempts: HashMap<String, u32>,
    blocked: HashSet<String>,
    next_session_id: u64,
}

struct ManagerInner {
    client: Arc<dyn StreamingHttpClient>,
    config: StreamConfig,
    base_url: RwLock<String>,
    auth: RwLock<HttpAuth>,
    state: Mutex<ManagerState>,
    events: broadcast::Sender<StreamEvent>,
}

/// Owns the single streaming connection and its reconnection policy.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("config", &self.inner.config)
            .field("current_key", &self.current_key())
            .finish_non_exhaustive()
    }
}

impl StreamManager {
    pub fn new(
        client: Arc<dyn StreamingHttpClient>,
        base_url: impl Into<String>,
        auth: HttpAuth,
        config: StreamConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                client,
                config,
                base_url: RwLock::new(base_url.into()),
                auth: RwLock::new(auth),
                state: Mutex::new(ManagerState::default()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Applies to the next connection attempt.
    pub fn set_credentials(&self, auth: HttpAuth) {
        *self
            .inner
            .auth
            .write()
            .expect("stream credentials lock should not be poisoned") = auth;
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        *self
            .inner
            .base_url
            .write()
            .expect("stream base url lock should not be poisoned") = base_url.into();
    }

    /// Open a session for `key`, replacing any other session.
    ///
    /// Returns the resulting status. A key that is already connected or
    /// connecting is left untouched, and a blocked key reports
    /// [`StreamStatus::AddonBlocked`] without touching the network.
    pub fn start(&self, key: &str) -> Result<StreamStatus, ValidationError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptySubscriptionKey);
        }

        let mut guard = self.inner.lock();
        let state = &mut *guard;

        if let Some(active) = state.active.as_ref() {
            if active.session.subscription_key() == key && active.session.is_live() {
                debug!(key = %key, status = %active.session.status(), "stream already live");
                return Ok(active.session.status());
            }
        }

        if let Some(previous) = state.active.take() {
            let previous_key = previous.key();
            previous.teardown();
            self.inner.emit_status(&previous_key, StreamStatus::Idle);
        }

        if state.blocked.contains(key) {
            info!(key = %key, "stream not started, key is blocked until addon access is restored");
            self.inner.emit_status(key, StreamStatus::AddonBlocked);
            return Ok(StreamStatus::AddonBlocked);
        }

        let session_id = state.next_session_id;
        state.next_session_id += 1;
        let addon_attempts = state.addon_attempts.get(key).copied().unwrap_or_default();

        let mut active = ActiveSession {
            session: StreamSession::new(key, addon_attempts),
            session_id,
            generation: 0,
            cancel: CancellationToken::new(),
            connection: None,
        };
        self.inner.spawn_watchdog(session_id, active.cancel.clone());
        self.inner.launch_attempt(&mut active);
        state.active = Some(active);

        Ok(StreamStatus::Connecting)
    }

    /// Close the session for `key`. Returns false when `key` is not active.
    pub fn stop(&self, key: &str) -> bool {
        let mut state = self.inner.lock();
        let is_active = state
            .active
            .as_ref()
            .is_some_and(|active| active.session.subscription_key() == key.trim());
        if !is_active {
            return false;
        }

        if let Some(active) = state.active.take() {
            let key = active.key();
            active.teardown();
            info!(key = %key, "stream stopped");
            self.inner.emit_status(&key, StreamStatus::Idle);
        }
        true
    }

    /// Stop whatever session is active.
    pub fn shutdown(&self) {
        if let Some(key) = self.current_key() {
            self.stop(&key);
        }
    }

    /// Reconnect the current key now with a fresh retry budget.
    ///
    /// Returns `None` when no key has been started.
    pub fn reconnect(&self) -> Option<StreamStatus> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let active = state.active.as_mut()?;
        let key = active.key();

        if state.blocked.contains(&key) {
            self.inner.emit_status(&key, StreamStatus::AddonBlocked);
            return Some(StreamStatus::AddonBlocked);
        }

        info!(key = %key, "manual stream reconnect");
        active.session.reset_attempts();
        if active.cancel.is_cancelled() {
            active.cancel = CancellationToken::new();
            self.inner
                .spawn_watchdog(active.session_id, active.cancel.clone());
        }
        self.inner.launch_attempt(active);
        Some(StreamStatus::Connecting)
    }

    /// Forget every addon failure and block.
    pub fn reset_addon_block(&self) {
        let mut state = self.inner.lock();
        state.addon_attempts.clear();
        state.blocked.clear();
        if let Some(active) = state.active.as_mut() {
            active.session.clear_addon_errors();
        }
        info!("addon blocks cleared");
    }

    pub fn is_blocked(&self, key: &str) -> bool {
        self.inner.lock().blocked.contains(key)
    }

    pub fn status(&self) -> StreamStatus {
        self.inner
            .lock()
            .active
            .as_ref()
            .map_or(StreamStatus::Idle, |active| active.session.status())
    }

    pub fn current_key(&self) -> Option<String> {
        self.inner.lock().active.as_ref().map(ActiveSession::key)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.inner.lock().active.as_ref().map(|active| SessionSnapshot {
            key: active.key(),
            status: active.session.status(),
            connected: active.session.is_connected(),
            reconnect_attempts: active.session.reconnect_attempts(),
            addon_error_attempts: active.session.addon_error_attempts(),
        })
    }
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .expect("stream manager state should not be poisoned")
    }

    fn emit(&self, event: StreamEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_status(&self, key: &str, status: StreamStatus) {
        self.emit(StreamEvent::Status {
            key: key.to_owned(),
            status,
        });
    }

    fn emit_notice(&self, key: &str, category: ErrorCategory, message: impl Into<String>) {
        self.emit(StreamEvent::Notice(StreamNotice {
            key: key.to_owned(),
            category,
            message: message.into(),
        }));
    }

    fn stream_url(&self, key: &str) -> String {
        let base = self
            .base_url
            .read()
            .expect("stream base url lock should not be poisoned");
        format!(
            "{}{STREAM_PATH}?id={}",
            base.trim_end_matches('/'),
            urlencoding::encode(key)
        )
    }

    fn launch_attempt(self: &Arc<Self>, active: &mut ActiveSession) {
        active.abort_connection();
        active.generation += 1;
        active.session.begin_connect();

        let connection = active.cancel.child_token();
        active.connection = Some(connection.clone());

        let key = active.key();
        let ticket = active.ticket();
        self.emit_status(&key, StreamStatus::Connecting);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_connection(key, ticket, connection).await;
        });
    }

    async fn run_connection(self: Arc<Self>, key: String, ticket: Ticket, cancel: CancellationToken) {
        let url = self.stream_url(&key);
        let auth = self
            .auth
            .read()
            .expect("stream credentials lock should not be poisoned")
            .clone();
        let timeout_ms = u64::try_from(self.config.connect_timeout.as_millis()).unwrap_or(u64::MAX);
        let request = HttpRequest::get(url.clone())
            .with_header("accept", "application/x-ndjson")
            .with_auth(&auth)
            .with_timeout_ms(timeout_ms);

        debug!(key = %key, url = %url, "opening stream");
        let opened = tokio::select! {
            () = cancel.cancelled() => return,
            opened = self.client.open_stream(request) => opened,
        };

        let failure = match opened {
            Err(error) => classify_transport(&error),
            Ok(response) if !response.is_success() => {
                let status = response.status;
                let body = tokio::select! {
                    () = cancel.cancelled() => return,
                    body = response.text() => body.unwrap_or_default(),
                };
                classify(status, &body, &url)
            }
            Ok(response) => {
                if !self.on_connected(ticket) {
                    return;
                }
                match self.read_records(&key, ticket, response.body, &cancel).await {
                    Some(error) => classify_transport(&error),
                    None => return,
                }
            }
        };

        self.on_failure(ticket, &failure);
    }

    /// Returns the error that ended the body, or `None` when the attempt was
    /// cancelled or superseded.
    async fn read_records(
        &self,
        key: &str,
        ticket: Ticket,
        mut body: ChunkStream,
        cancel: &CancellationToken,
    ) -> Option<HttpError> {
        let mut decoder = NdjsonDecoder::default();
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return None,
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for line in decoder.push(&chunk) {
                        if !self.on_line(key, ticket, &line) {
                            return None;
                        }
                    }
                }
                Some(Err(error)) => return Some(error),
                None => {
                    if let Some(line) = decoder.finish() {
                        if !self.on_line(key, ticket, &line) {
                            return None;
                        }
                    }
                    return Some(HttpError::new("stream closed by server"));
                }
            }
        }
    }

    fn on_connected(&self, ticket: Ticket) -> bool {
        let mut state = self.lock();
        let Some(active) = state.active.as_mut().filter(|active| active.ticket() == ticket) else {
            return false;
        };

        active.session.mark_connected(Instant::now());
        let key = active.key();
        info!(key = %key, "stream connected");
        self.emit_status(&key, StreamStatus::Connected);
        true
    }

    fn on_line(&self, key: &str, ticket: Ticket, line: &str) -> bool {
        {
            let mut state = self.lock();
            let Some(active) = state.active.as_mut().filter(|active| active.ticket() == ticket)
            else {
                return false;
            };
            active.session.record_data(Instant::now());
        }

        match decode_record(line) {
            Ok(StreamRecord::Health(check)) => {
                debug!(key = %key, status = %check.status, "stream health check");
                self.emit(StreamEvent::Health(check));
            }
            Ok(StreamRecord::Trade(update)) if update.belongs_to(key) => {
                self.emit(StreamEvent::Trade(update));
            }
            Ok(StreamRecord::Trade(update)) => {
                debug!(key = %key, other = %update.id, "discarding update for another subscription");
            }
            Err(error) => {
                warn!(key = %key, %error, "skipping undecodable stream record");
            }
        }
        true
    }

    fn on_failure(self: &Arc<Self>, ticket: Ticket, failure: &ClassifiedError) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(active) = state.active.as_mut().filter(|active| active.ticket() == ticket) else {
            debug!(error = %failure, "ignoring failure of a superseded stream attempt");
            return;
        };

        active.connection = None;
        let key = active.key();
        let category = failure.category();
        warn!(key = %key, %category, error = %failure, "stream attempt failed");

        let action = active.session.on_failure(category, &self.config);
        if category == ErrorCategory::Addon {
            state
                .addon_attempts
                .insert(key.clone(), active.session.addon_error_attempts());
        }
        self.emit_notice(&key, category, failure.message());

        match action {
            FailureAction::BlockAddon => {
                state.blocked.insert(key.clone());
                active.cancel.cancel();
                info!(key = %key, "streaming blocked for key after repeated addon failures");
                self.emit_status(&key, StreamStatus::AddonBlocked);
            }
            FailureAction::AwaitCredentials => {
                self.emit_status(&key, StreamStatus::Error);
            }
            FailureAction::Retry { delay, attempt } => {
                self.emit_status(&key, StreamStatus::Error);
                active.generation += 1;
                info!(key = %key, attempt, delay_ms = delay.as_millis() as u64, "stream reconnect scheduled");
                self.schedule_reconnect(active.ticket(), delay, active.cancel.clone());
            }
            FailureAction::GiveUp => {
                self.emit_status(&key, StreamStatus::Error);
                self.emit_notice(
                    &key,
                    category,
                    format!(
                        "giving up after {} reconnect attempts",
                        self.config.max_reconnect_attempts
                    ),
                );
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, ticket: Ticket, delay: Duration, cancel: CancellationToken) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = time::sleep(delay) => {}
            }

            let mut state = inner.lock();
            match state.active.as_mut() {
                Some(active) if active.ticket() == ticket => inner.launch_attempt(active),
                _ => debug!("scheduled reconnect superseded"),
            }
        });
    }

    fn spawn_watchdog(self: &Arc<Self>, session_id: u64, cancel: CancellationToken) {
        let inner = Arc::clone(self);
        let period = self.config.watchdog_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => inner.watchdog_tick(session_id),
                }
            }
        });
    }

    fn watchdog_tick(self: &Arc<Self>, session_id: u64) {
        let mut state = self.lock();
        let Some(active) = state
            .active
            .as_mut()
            .filter(|active| active.session_id == session_id)
        else {
            return;
        };

        if !active
            .session
            .watchdog_check(Instant::now(), self.config.silence_timeout)
        {
            return;
        }

        let key = active.key();
        warn!(key = %key, "stream silent past the health timeout, forcing reconnect");
        active.abort_connection();
        active.generation += 1;
        self.emit_status(&key, StreamStatus::Error);
        self.emit_notice(
            &key,
            ErrorCategory::Network,
            format!(
                "no data received for more than {}s",
                self.config.silence_timeout.as_secs()
            ),
        );
        self.schedule_reconnect(
            active.ticket(),
            self.config.watchdog_reconnect_delay,
            active.cancel.clone(),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use futures_util::stream;

    use super::*;
    use crate::http_client::StreamResponse;
    use crate::TradingUpdate;

    #[derive(Debug, Clone)]
    enum Script {
        Status(u16, &'static str),
        Open(Vec<&'static str>),
    }

    impl Script {
        fn into_response(self) -> StreamResponse {
            match self {
                Self::Status(status, body) => StreamResponse {
                    status,
                    body: stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))]).boxed(),
                },
                Self::Open(lines) => {
                    let chunks: Vec<Result<Bytes, HttpError>> = lines
                        .into_iter()
                        .map(|line| Ok(Bytes::from(format!("{line}\n"))))
                        .collect();
                    StreamResponse {
                        status: 200,
                        body: stream::iter(chunks).chain(stream::pending()).boxed(),
                    }
                }
            }
        }
    }

    struct ScriptedClient {
        urls: Mutex<Vec<String>>,
        calls: AtomicUsize,
        script: Mutex<VecDeque<Script>>,
        fallback: Script,
    }

    impl ScriptedClient {
        fn new(fallback: Script) -> Arc<Self> {
            Arc::new(Self {
                urls: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                script: Mutex::new(VecDeque::new()),
                fallback,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn calls_for(&self, key: &str) -> usize {
            let suffix = format!("id={key}");
            self.urls
                .lock()
                .expect("urls")
                .iter()
                .filter(|url| url.ends_with(&suffix))
                .count()
        }
    }

    impl StreamingHttpClient for ScriptedClient {
        fn open_stream<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<StreamResponse, HttpError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().expect("urls").push(request.url);
            let step = self
                .script
                .lock()
                .expect("script")
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            Box::pin(async move { Ok(step.into_response()) })
        }
    }

    fn manager(client: Arc<ScriptedClient>) -> StreamManager {
        StreamManager::new(
            client,
            "https://api.example.test/",
            HttpAuth::BearerToken(String::from("token")),
            StreamConfig::default(),
        )
    }

    fn drain(receiver: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    async fn settle() {
        time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_key_is_rejected() {
        let manager = manager(ScriptedClient::new(Script::Open(vec![])));
        assert_eq!(manager.start("  "), Err(ValidationError::EmptySubscriptionKey));
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_a_noop_while_connected_to_the_same_key() {
        let client = ScriptedClient::new(Script::Open(vec![]));
        let manager = manager(Arc::clone(&client));

        assert_eq!(manager.start("pool-1"), Ok(StreamStatus::Connecting));
        settle().await;
        assert_eq!(manager.start("pool-1"), Ok(StreamStatus::Connected));
        settle().await;

        assert_eq!(client.calls(), 1);
        assert_eq!(manager.status(), StreamStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_matching_trades_and_health_checks() {
        let client = ScriptedClient::new(Script::Open(vec![
            r#"{"status":"ok","timestamp":1}"#,
            r#"{"id":"pool-1","price_usd":1.25}"#,
            r#"{"id":"pool-2","price_usd":9.0}"#,
            "not json",
        ]));
        let manager = manager(Arc::clone(&client));
        let mut receiver = manager.subscribe();

        manager.start("pool-1").expect("start");
        settle().await;

        let events = drain(&mut receiver);
        let trades: Vec<&TradingUpdate> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Trade(update) => Some(update),
                _ => None,
            })
            .collect();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, "pool-1");
        assert!(events
            .iter()
            .any(|event| matches!(event, StreamEvent::Health(check) if check.status == "ok")));
        assert_eq!(manager.status(), StreamStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_five_reconnects() {
        let client = ScriptedClient::new(Script::Status(503, "unavailable"));
        let manager = manager(Arc::clone(&client));
        let mut receiver = manager.subscribe();

        manager.start("pool-1").expect("start");
        time::sleep(Duration::from_secs(300)).await;

        assert_eq!(client.calls(), 6);
        let snapshot = manager.snapshot().expect("snapshot");
        assert_eq!(snapshot.status, StreamStatus::Error);
        assert_eq!(snapshot.reconnect_attempts, 5);
        assert!(drain(&mut receiver).iter().any(|event| matches!(
            event,
            StreamEvent::Notice(notice) if notice.message.contains("giving up")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn second_addon_failure_blocks_the_key() {
        let client = ScriptedClient::new(Script::Status(403, "addon required"));
        let manager = manager(Arc::clone(&client));

        manager.start("pool-1").expect("start");
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(client.calls(), 2);
        assert!(manager.is_blocked("pool-1"));
        assert_eq!(manager.start("pool-1"), Ok(StreamStatus::AddonBlocked));
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.calls(), 2);

        manager.reset_addon_block();
        assert_eq!(manager.start("pool-1"), Ok(StreamStatus::Connecting));
        settle().await;
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_not_retried() {
        let client = ScriptedClient::new(Script::Status(401, "bad token"));
        let manager = manager(Arc::clone(&client));
        let mut receiver = manager.subscribe();

        manager.start("pool-1").expect("start");
        time::sleep(Duration::from_secs(120)).await;

        assert_eq!(client.calls(), 1);
        assert_eq!(manager.status(), StreamStatus::Error);
        assert!(drain(&mut receiver).iter().any(|event| matches!(
            event,
            StreamEvent::Notice(notice) if notice.category == ErrorCategory::Auth
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_forces_exactly_one_reconnect_on_silence() {
        let client = ScriptedClient::new(Script::Open(vec![]));
        let manager = manager(Arc::clone(&client));
        let mut receiver = manager.subscribe();

        manager.start("pool-1").expect("start");
        settle().await;
        assert_eq!(manager.status(), StreamStatus::Connected);

        // Ticks at 30, 60 and 90 s see at most 90 s of silence.
        time::sleep(Duration::from_secs(100)).await;
        assert_eq!(client.calls(), 1);

        // The 120 s tick trips, the reconnect follows 5 s later.
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.calls(), 2);
        assert_eq!(manager.status(), StreamStatus::Connected);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.calls(), 2);

        let errors = drain(&mut receiver)
            .into_iter()
            .filter(|event| {
                matches!(event, StreamEvent::Status { status: StreamStatus::Error, .. })
            })
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_key_supersedes_pending_retry() {
        let client = ScriptedClient::new(Script::Status(500, ""));
        let manager = manager(Arc::clone(&client));

        manager.start("pool-a").expect("start");
        settle().await;
        manager.start("pool-b").expect("start");
        time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(client.calls_for("pool-a"), 1);
        assert_eq!(client.calls_for("pool-b"), 2);
        assert_eq!(manager.current_key().as_deref(), Some("pool-b"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_retries_and_ignores_other_keys() {
        let client = ScriptedClient::new(Script::Status(500, ""));
        let manager = manager(Arc::clone(&client));

        manager.start("pool-1").expect("start");
        settle().await;

        assert!(!manager.stop("pool-2"));
        assert!(manager.stop("pool-1"));
        assert!(!manager.stop("pool-1"));

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.calls(), 1);
        assert_eq!(manager.status(), StreamStatus::Idle);
        assert_eq!(manager.current_key(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_restores_the_retry_budget() {
        let client = ScriptedClient::new(Script::Status(503, ""));
        let manager = manager(Arc::clone(&client));

        manager.start("pool-1").expect("start");
        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(client.calls(), 6);

        client
            .script
            .lock()
            .expect("script")
            .push_back(Script::Open(vec![]));
        assert_eq!(manager.reconnect(), Some(StreamStatus::Connecting));
        settle().await;

        assert_eq!(client.calls(), 7);
        let snapshot = manager.snapshot().expect("snapshot");
        assert!(snapshot.connected);
        assert_eq!(snapshot.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_key_is_encoded_into_the_stream_url() {
        let client = ScriptedClient::new(Script::Open(vec![]));
        let manager = manager(Arc::clone(&client));

        manager.start("pool/1").expect("start");
        settle().await;

        let urls = client.urls.lock().expect("urls").clone();
        assert_eq!(
            urls,
            vec![String::from("https://api.example.test/api/v1/tokens/stream?id=pool%2F1")]
        );
    }
}
