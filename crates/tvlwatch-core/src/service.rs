//! Cache-then-fetch facade over the remote REST API.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use tvlwatch_warehouse::{HistorySnapshot, Warehouse, WarehouseError};

use crate::cache::{CacheError, CacheStore};
use crate::classifier::{classify, ClassifiedError};
use crate::dispatcher::{DispatchError, RequestDispatcher};
use crate::http_client::{HttpAuth, HttpClient, HttpError, HttpRequest};
use crate::{
    CacheTtls, HistoryBar, HistorySeries, LogoAsset, Resolution, SymbolInfo, TimeRange,
    TokenSnapshot, ValidationError,
};

pub const STORE_SYMBOLS: &str = "symbols";
pub const STORE_TOKENS: &str = "tokens";
pub const STORE_HISTORY: &str = "history";
pub const STORE_LOGOS: &str = "logos";

/// Where a fetched value is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Process memory only.
    Memory,
    /// Warehouse-backed, survives restarts.
    Durable,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Upstream(#[from] ClassifiedError),

    #[error("transport error: {0}")]
    Transport(#[from] HttpError),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Upstream(error) => error.code(),
            Self::Transport(_) => "service.transport",
            Self::Decode(_) => "service.decode",
            Self::Dispatch(_) => "service.dispatch",
            Self::Validation(_) => "service.validation",
            Self::Warehouse(_) => "service.warehouse",
            Self::Cache(_) => "service.cache",
        }
    }
}

type FetchFuture<T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send>>;

#[derive(Debug, Deserialize)]
struct LogoResponse {
    url: String,
}

struct ServiceInner {
    http: Arc<dyn HttpClient>,
    cache: CacheStore,
    dispatcher: RequestDispatcher,
    warehouse: Option<Warehouse>,
    base_url: RwLock<String>,
    auth: RwLock<HttpAuth>,
    ttls: CacheTtls,
}

/// Data service facade. Cheap to clone.
#[derive(Clone)]
pub struct DataService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for DataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataService")
            .field("base_url", &self.base_url())
            .field("ttls", &self.inner.ttls)
            .finish_non_exhaustive()
    }
}

impl DataService {
    pub fn new(
        http: Arc<dyn HttpClient>,
        cache: CacheStore,
        dispatcher: RequestDispatcher,
        warehouse: Option<Warehouse>,
        base_url: impl Into<String>,
        auth: HttpAuth,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                http,
                cache,
                dispatcher,
                warehouse,
                base_url: RwLock::new(base_url.into()),
                auth: RwLock::new(auth),
                ttls,
            }),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.inner.dispatcher
    }

    pub fn base_url(&self) -> String {
        self.inner
            .base_url
            .read()
            .expect("service base url lock should not be poisoned")
            .clone()
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        *self
            .inner
            .base_url
            .write()
            .expect("service base url lock should not be poisoned") = base_url.into();
    }

    pub fn set_credentials(&self, auth: HttpAuth) {
        *self
            .inner
            .auth
            .write()
            .expect("service credentials lock should not be poisoned") = auth;
    }

    /// Return the cached value for `(store, key)` or fetch, cache and return it.
    ///
    /// Hits make no outbound call. Misses run `fetch` through the dispatcher;
    /// failures propagate and are never cached. A failed cache write is
    /// logged and the fetched value is still returned.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        tier: CacheTier,
        store: &str,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, ServiceError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        let cache = &self.inner.cache;
        let memory_key = format!("{store}:{key}");

        let cached = match tier {
            CacheTier::Memory => cache.get_memory(&memory_key).await,
            CacheTier::Durable if !cache.is_expired(store, key).await => cache.get(store, key).await,
            CacheTier::Durable => None,
        };
        if let Some(value) = cached {
            debug!(store, key, "cache hit");
            return Ok(value);
        }

        debug!(store, key, "cache miss, fetching");
        let value = self.inner.dispatcher.add(fetch).await?;

        let written = match tier {
            CacheTier::Memory => cache.set_memory(&memory_key, &value, ttl).await,
            CacheTier::Durable => cache.set_with_expiry(store, key, &value, ttl).await,
        };
        if let Err(error) = written {
            warn!(store, key, %error, "failed to cache fetched value");
        }

        Ok(value)
    }

    /// Symbol list for a group, cached for the symbols TTL.
    pub async fn symbols(&self, group: &str) -> Result<Vec<SymbolInfo>, ServiceError> {
        let url = format!(
            "{}/api/v1/symbols?group={}",
            self.base_url(),
            urlencoding::encode(group)
        );
        let fetch = self.json_fetcher(url);
        self.get_or_fetch(
            CacheTier::Durable,
            STORE_SYMBOLS,
            group,
            self.inner.ttls.symbols,
            fetch,
        )
        .await
    }

    /// Current token snapshot, cached in memory.
    pub async fn current_token(&self, id: &str) -> Result<TokenSnapshot, ServiceError> {
        let id = non_empty_id(id)?;
        let url = format!("{}/api/v1/tokens/{}", self.base_url(), urlencoding::encode(id));
        let fetch = self.json_fetcher(url);
        self.get_or_fetch(
            CacheTier::Memory,
            STORE_TOKENS,
            id,
            self.inner.ttls.token_snapshot,
            fetch,
        )
        .await
    }

    /// OHLCV series for `id` at `resolution` over `range`.
    ///
    /// Every fresh fetch also replaces the stored snapshot for
    /// `(id, resolution)`.
    pub async fn history(
        &self,
        id: &str,
        resolution: Resolution,
        range: TimeRange,
    ) -> Result<HistorySeries, ServiceError> {
        let id = non_empty_id(id)?.to_owned();
        let url = format!(
            "{}/api/v1/history?id={}&resolution={}&from={}&to={}",
            self.base_url(),
            urlencoding::encode(&id),
            resolution,
            range.from(),
            range.to()
        );
        let key = format!("{id}:{resolution}:{}:{}", range.from(), range.to());
        let bars = self.json_fetcher::<Vec<HistoryBar>>(url);
        let warehouse = self.inner.warehouse.clone();
        let clock_cache = self.inner.cache.clone();

        let fetch = move || async move {
            let series = HistorySeries {
                id,
                resolution,
                bars: bars().await?,
            };
            if let Some(warehouse) = warehouse {
                let snapshot = HistorySnapshot {
                    series_id: series.id.clone(),
                    resolution: resolution.as_str().to_owned(),
                    payload: serde_json::to_string(&series)?,
                    written_at_ms: clock_cache.now_ms(),
                };
                if let Err(error) = warehouse.put_history_snapshot(&snapshot) {
                    warn!(%error, "failed to record history snapshot");
                }
            }
            Ok::<_, ServiceError>(series)
        };

        self.get_or_fetch(
            CacheTier::Durable,
            STORE_HISTORY,
            &key,
            self.inner.ttls.history,
            fetch,
        )
        .await
    }

    /// Latest recorded series for `(id, resolution)`, regardless of range.
    pub fn last_history_snapshot(
        &self,
        id: &str,
        resolution: Resolution,
    ) -> Result<Option<HistorySeries>, ServiceError> {
        let Some(warehouse) = &self.inner.warehouse else {
            return Ok(None);
        };
        match warehouse.get_history_snapshot(id, resolution.as_str())? {
            Some(snapshot) => Ok(Some(serde_json::from_str(&snapshot.payload)?)),
            None => Ok(None),
        }
    }

    /// Logo location for a symbol, cached for a day.
    pub async fn logo(&self, symbol: &str) -> Result<LogoAsset, ServiceError> {
        let symbol = non_empty_id(symbol)?.to_owned();
        let url = format!(
            "{}/api/v1/logos/{}",
            self.base_url(),
            urlencoding::encode(&symbol)
        );
        let response = self.json_fetcher::<LogoResponse>(url);
        let owned_symbol = symbol.clone();
        let fetch = move || async move {
            Ok::<_, ServiceError>(LogoAsset {
                symbol: owned_symbol,
                url: response().await?.url,
            })
        };

        self.get_or_fetch(
            CacheTier::Durable,
            STORE_LOGOS,
            &symbol,
            self.inner.ttls.logos,
            fetch,
        )
        .await
    }

    /// Build a `'static` fetch closure for a GET returning JSON.
    fn json_fetcher<T>(&self, url: String) -> impl FnOnce() -> FetchFuture<T> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let http = Arc::clone(&self.inner.http);
        let auth = self
            .inner
            .auth
            .read()
            .expect("service credentials lock should not be poisoned")
            .clone();

        move || -> FetchFuture<T> {
            Box::pin(async move { fetch_json(http.as_ref(), &auth, &url).await })
        }
    }
}

async fn fetch_json<T: DeserializeOwned>(
    http: &dyn HttpClient,
    auth: &HttpAuth,
    url: &str,
) -> Result<T, ServiceError> {
    let request = HttpRequest::get(url)
        .with_header("accept", "application/json")
        .with_auth(auth);
    let response = http.execute(request).await?;
    if !response.is_success() {
        return Err(classify(response.status, &response.body, url).into());
    }
    Ok(serde_json::from_str(&response.body)?)
}

fn non_empty_id(id: &str) -> Result<&str, ValidationError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyIdentifier);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::clock::ManualClock;
    use crate::http_client::HttpResponse;
    use crate::ErrorCategory;

    #[derive(Default)]
    struct RecordingClient {
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
        responses: Mutex<VecDeque<HttpResponse>>,
    }

    impl RecordingClient {
        fn with_responses(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            })
        }
    }

    impl HttpClient for RecordingClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().expect("urls").push(request.url);
            let next = self.responses.lock().expect("responses").pop_front();
            Box::pin(async move { next.ok_or_else(|| HttpError::new("no scripted response")) })
        }
    }

    fn service(client: Arc<RecordingClient>) -> (DataService, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let cache = CacheStore::ephemeral(Arc::new(clock.clone()));
        let service = DataService::new(
            client,
            cache,
            RequestDispatcher::default(),
            None,
            "https://api.example.test",
            HttpAuth::BearerToken(String::from("t")),
            CacheTtls::default(),
        );
        (service, clock)
    }

    #[tokio::test]
    async fn token_snapshot_uses_the_memory_tier() {
        let client = RecordingClient::with_responses(vec![
            HttpResponse::ok_json(r#"{"id":"pool-1","price_usd":2.0}"#),
            HttpResponse::ok_json(r#"{"id":"pool-1","price_usd":3.0}"#),
        ]);
        let (service, clock) = service(Arc::clone(&client));

        assert_eq!(service.current_token("pool-1").await.expect("fetch").price_usd, 2.0);
        assert_eq!(service.current_token("pool-1").await.expect("hit").price_usd, 2.0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cache().durable_len().await.expect("len"), 0);

        clock.advance(Duration::from_secs(601));
        assert_eq!(service.current_token("pool-1").await.expect("refetch").price_usd, 3.0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upstream_errors_are_classified_and_not_cached() {
        let client = RecordingClient::with_responses(vec![
            HttpResponse::with_status(401, "bad token"),
            HttpResponse::ok_json("[]"),
        ]);
        let (service, _) = service(Arc::clone(&client));

        let err = service.symbols("Aggregate").await.expect_err("must fail");
        match err {
            ServiceError::Upstream(classified) => {
                assert_eq!(classified.category(), ErrorCategory::Auth);
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(service.symbols("Aggregate").await.expect("retry").is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn history_request_carries_resolution_and_range() {
        let client = RecordingClient::with_responses(vec![HttpResponse::ok_json(
            r#"[{"time":60,"open":1,"high":2,"low":0.5,"close":1.5}]"#,
        )]);
        let (service, _) = service(Arc::clone(&client));
        let range = TimeRange::new(0, 600).expect("range");

        let series = service
            .history("pool 1", Resolution::OneMinute, range)
            .await
            .expect("history");
        assert_eq!(series.bars.len(), 1);
        assert_eq!(series.resolution, Resolution::OneMinute);

        let urls = client.urls.lock().expect("urls").clone();
        assert_eq!(
            urls,
            vec![String::from(
                "https://api.example.test/api/v1/history?id=pool%201&resolution=1m&from=0&to=600"
            )]
        );
    }

    #[tokio::test]
    async fn logo_is_cached_by_symbol() {
        let client = RecordingClient::with_responses(vec![HttpResponse::ok_json(
            r#"{"url":"https://cdn.example.test/eth.png"}"#,
        )]);
        let (service, _) = service(Arc::clone(&client));

        let first = service.logo("ETH").await.expect("logo");
        let second = service.logo("ETH").await.expect("cached");
        assert_eq!(first, second);
        assert_eq!(first.symbol, "ETH");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let client = RecordingClient::with_responses(vec![HttpResponse::ok_json("{}")]);
        let (service, _) = service(Arc::clone(&client));

        let err = service.symbols("Aggregate").await.expect_err("must fail");
        assert!(matches!(err, ServiceError::Decode(_)));
        assert_eq!(err.code(), "service.decode");
    }

    #[tokio::test]
    async fn empty_token_id_is_rejected_without_a_call() {
        let client = RecordingClient::with_responses(Vec::new());
        let (service, _) = service(Arc::clone(&client));

        let err = service.current_token(" ").await.expect_err("must fail");
        assert!(matches!(err, ServiceError::Validation(ValidationError::EmptyIdentifier)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn history_snapshot_is_recorded_in_the_warehouse() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse =
            Warehouse::open(tvlwatch_warehouse::WarehouseConfig::in_home(temp.path())).expect("open");
        let client = RecordingClient::with_responses(vec![HttpResponse::ok_json(
            r#"[{"time":0,"open":1,"high":1,"low":1,"close":1,"volume":10}]"#,
        )]);
        let service = DataService::new(
            client,
            CacheStore::with_warehouse(warehouse.clone()),
            RequestDispatcher::default(),
            Some(warehouse),
            "https://api.example.test",
            HttpAuth::None,
            CacheTtls::default(),
        );

        assert_eq!(
            service
                .last_history_snapshot("pool-1", Resolution::OneDay)
                .expect("read"),
            None
        );
        let fetched = service
            .history("pool-1", Resolution::OneDay, TimeRange::new(0, 86_400).expect("range"))
            .await
            .expect("history");
        let snapshot = service
            .last_history_snapshot("pool-1", Resolution::OneDay)
            .expect("read")
            .expect("snapshot");
        assert_eq!(snapshot, fetched);
    }
}
