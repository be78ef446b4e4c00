//! Two-tier cache: a durable keyed store with expiry metadata plus a
//! process-local memory tier.
//!
//! Durable entries are grouped by store name (`symbols`, `history`, ...)
//! and paired with a metadata record `{timestamp, expiry}`. An entry with no
//! metadata counts as expired, so callers refetch on both "missing" and
//! "stale".

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use tvlwatch_warehouse::{metadata_id, CacheMetadata, Warehouse, WarehouseError};

use crate::clock::{duration_ms, Clock, SystemClock};

/// Failure of a durable cache write or maintenance call.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend failed: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("failed to encode cache value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Storage contract for the durable tier.
///
/// Implementations must write and delete a value together with its metadata
/// record so readers never observe one without the other.
pub trait DurableBackend: Send + Sync + Debug {
    fn put(
        &self,
        store: &str,
        key: &str,
        value: &str,
        timestamp_ms: i64,
        expiry_ms: i64,
    ) -> Result<(), CacheError>;

    fn value(&self, store: &str, key: &str) -> Result<Option<String>, CacheError>;

    fn metadata(&self, store: &str, key: &str) -> Result<Option<CacheMetadata>, CacheError>;

    fn remove(&self, store: &str, key: &str) -> Result<bool, CacheError>;

    /// Delete every pair whose expiry lies strictly before `now_ms`.
    fn remove_expired(&self, now_ms: i64) -> Result<usize, CacheError>;

    fn clear(&self) -> Result<(), CacheError>;

    fn len(&self) -> Result<usize, CacheError>;
}

impl DurableBackend for Warehouse {
    fn put(
        &self,
        store: &str,
        key: &str,
        value: &str,
        timestamp_ms: i64,
        expiry_ms: i64,
    ) -> Result<(), CacheError> {
        Ok(self.put_cache_entry(store, key, value, timestamp_ms, expiry_ms)?)
    }

    fn value(&self, store: &str, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.get_cache_value(store, key)?)
    }

    fn metadata(&self, store: &str, key: &str) -> Result<Option<CacheMetadata>, CacheError> {
        Ok(self.get_cache_metadata(store, key)?)
    }

    fn remove(&self, store: &str, key: &str) -> Result<bool, CacheError> {
        Ok(self.delete_cache_entry(store, key)?)
    }

    fn remove_expired(&self, now_ms: i64) -> Result<usize, CacheError> {
        Ok(self.delete_expired(now_ms)?)
    }

    fn clear(&self) -> Result<(), CacheError> {
        Ok(self.clear_cache()?)
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.cache_len()?)
    }
}

/// In-process durable backend for ephemeral contexts and tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, CacheMetadata)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, CacheMetadata)>> {
        self.entries
            .lock()
            .expect("memory backend lock should not be poisoned")
    }
}

impl DurableBackend for MemoryBackend {
    fn put(
        &self,
        store: &str,
        key: &str,
        value: &str,
        timestamp_ms: i64,
        expiry_ms: i64,
    ) -> Result<(), CacheError> {
        let metadata = CacheMetadata {
            store: store.to_owned(),
            key: key.to_owned(),
            timestamp_ms,
            expiry_ms,
        };
        self.lock()
            .insert(metadata_id(store, key), (value.to_owned(), metadata));
        Ok(())
    }

    fn value(&self, store: &str, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .lock()
            .get(&metadata_id(store, key))
            .map(|(value, _)| value.clone()))
    }

    fn metadata(&self, store: &str, key: &str) -> Result<Option<CacheMetadata>, CacheError> {
        Ok(self
            .lock()
            .get(&metadata_id(store, key))
            .map(|(_, metadata)| metadata.clone()))
    }

    fn remove(&self, store: &str, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock().remove(&metadata_id(store, key)).is_some())
    }

    fn remove_expired(&self, now_ms: i64) -> Result<usize, CacheError> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, metadata)| metadata.expiry_ms >= now_ms);
        Ok(before - entries.len())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.lock().clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.lock().len())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at_ms: i64,
}

#[derive(Debug)]
struct CacheInner {
    durable: Arc<dyn DurableBackend>,
    memory: tokio::sync::RwLock<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
}

/// Thread-safe cache over a durable backend and a memory tier.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
}

impl CacheStore {
    pub fn new(durable: Arc<dyn DurableBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                durable,
                memory: tokio::sync::RwLock::new(HashMap::new()),
                clock,
            }),
        }
    }

    /// Cache backed by an open warehouse and the system clock.
    pub fn with_warehouse(warehouse: Warehouse) -> Self {
        Self::new(Arc::new(warehouse), Arc::new(SystemClock))
    }

    /// Cache that keeps everything in process memory.
    pub fn ephemeral(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), clock)
    }

    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Read a durable value regardless of its expiry.
    ///
    /// Returns `None` when the key is missing, the payload cannot be decoded
    /// as `T`, or the backend fails.
    pub async fn get<T: DeserializeOwned>(&self, store: &str, key: &str) -> Option<T> {
        let raw = match self.inner.durable.value(store, key) {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(store, key, %error, "durable cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(store, key, %error, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Write a durable value and its metadata `{now, now + ttl}`.
    pub async fn set_with_expiry<T: Serialize + ?Sized>(
        &self,
        store: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        let now = self.now_ms();
        let expiry = now.saturating_add(duration_ms(ttl));
        self.inner.durable.put(store, key, &payload, now, expiry)?;
        debug!(store, key, expiry_ms = expiry, "cache entry written");
        Ok(())
    }

    /// True when no metadata exists for the key or its expiry has passed.
    pub async fn is_expired(&self, store: &str, key: &str) -> bool {
        match self.inner.durable.metadata(store, key) {
            Ok(Some(metadata)) => self.now_ms() > metadata.expiry_ms,
            Ok(None) => true,
            Err(error) => {
                warn!(store, key, %error, "cache metadata read failed");
                true
            }
        }
    }

    /// Remove one durable entry and its metadata.
    pub async fn remove(&self, store: &str, key: &str) -> Result<bool, CacheError> {
        self.inner.durable.remove(store, key)
    }

    /// Sweep every expired durable entry. Returns how many were removed.
    ///
    /// Stale memory entries are dropped too but not counted.
    pub async fn clear_expired(&self) -> Result<usize, CacheError> {
        let now = self.now_ms();
        let removed = self.inner.durable.remove_expired(now)?;
        self.inner
            .memory
            .write()
            .await
            .retain(|_, entry| entry.expires_at_ms >= now);
        debug!(removed, "expired cache entries swept");
        Ok(removed)
    }

    /// Drop every durable store and the memory tier.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        self.inner.memory.write().await.clear();
        self.inner.durable.clear()
    }

    pub async fn durable_len(&self) -> Result<usize, CacheError> {
        self.inner.durable.len()
    }

    /// Write a process-local value with the same expiry rules as the durable tier.
    pub async fn set_memory<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = MemoryEntry {
            value: serde_json::to_string(value)?,
            expires_at_ms: self.now_ms().saturating_add(duration_ms(ttl)),
        };
        self.inner.memory.write().await.insert(key.to_owned(), entry);
        Ok(())
    }

    /// Read a process-local value, evicting it when stale.
    pub async fn get_memory<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.now_ms();
        let entry = {
            let memory = self.inner.memory.read().await;
            memory.get(key).cloned()?
        };

        if now > entry.expires_at_ms {
            let mut memory = self.inner.memory.write().await;
            if memory
                .get(key)
                .is_some_and(|current| now > current.expires_at_ms)
            {
                memory.remove(key);
            }
            debug!(key, "evicted stale memory entry");
            return None;
        }

        serde_json::from_str(&entry.value).ok()
    }

    /// Number of memory entries, stale ones included.
    pub async fn len_memory(&self) -> usize {
        self.inner.memory.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache_with_clock() -> (CacheStore, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        (CacheStore::ephemeral(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn fresh_entry_is_readable_and_not_expired() {
        let (cache, _) = cache_with_clock();
        cache
            .set_with_expiry("symbols", "Aggregate", &vec!["AAA", "BBB"], Duration::from_secs(60))
            .await
            .expect("write");

        assert!(!cache.is_expired("symbols", "Aggregate").await);
        let value: Option<Vec<String>> = cache.get("symbols", "Aggregate").await;
        assert_eq!(value, Some(vec![String::from("AAA"), String::from("BBB")]));
    }

    #[tokio::test]
    async fn entry_expires_once_ttl_has_passed() {
        let (cache, clock) = cache_with_clock();
        cache
            .set_with_expiry("history", "k", &1_u32, Duration::from_secs(60))
            .await
            .expect("write");

        clock.advance(Duration::from_secs(60));
        assert!(!cache.is_expired("history", "k").await);

        clock.advance(Duration::from_millis(1));
        assert!(cache.is_expired("history", "k").await);
        // Expired values stay readable until swept.
        assert_eq!(cache.get::<u32>("history", "k").await, Some(1));
    }

    #[tokio::test]
    async fn missing_key_reads_absent_and_counts_as_expired() {
        let (cache, _) = cache_with_clock();
        assert_eq!(cache.get::<String>("symbols", "nope").await, None);
        assert!(cache.is_expired("symbols", "nope").await);
    }

    #[tokio::test]
    async fn undecodable_value_reads_absent() {
        let (cache, _) = cache_with_clock();
        cache
            .set_with_expiry("symbols", "k", "not a number", Duration::from_secs(5))
            .await
            .expect("write");

        assert_eq!(cache.get::<u64>("symbols", "k").await, None);
    }

    #[tokio::test]
    async fn clear_expired_removes_only_stale_pairs() {
        let (cache, clock) = cache_with_clock();
        cache
            .set_with_expiry("a", "short", &1, Duration::from_secs(1))
            .await
            .expect("write");
        cache
            .set_with_expiry("a", "long", &2, Duration::from_secs(600))
            .await
            .expect("write");

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.clear_expired().await.expect("sweep"), 1);
        assert_eq!(cache.clear_expired().await.expect("sweep"), 0);
        assert_eq!(cache.get::<i32>("a", "short").await, None);
        assert_eq!(cache.get::<i32>("a", "long").await, Some(2));
    }

    #[tokio::test]
    async fn memory_tier_evicts_lazily() {
        let (cache, clock) = cache_with_clock();
        cache
            .set_memory("token:abc", &42_u64, Duration::from_secs(10))
            .await
            .expect("write");
        assert_eq!(cache.get_memory::<u64>("token:abc").await, Some(42));

        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.len_memory().await, 1);
        assert_eq!(cache.get_memory::<u64>("token:abc").await, None);
        assert_eq!(cache.len_memory().await, 0);
    }

    #[tokio::test]
    async fn clear_all_empties_both_tiers() {
        let (cache, _) = cache_with_clock();
        cache
            .set_with_expiry("symbols", "k", &1, Duration::from_secs(5))
            .await
            .expect("write");
        cache
            .set_memory("m", &1, Duration::from_secs(5))
            .await
            .expect("write");

        cache.clear_all().await.expect("clear");
        assert_eq!(cache.durable_len().await.expect("len"), 0);
        assert_eq!(cache.len_memory().await, 0);
    }

    #[tokio::test]
    async fn warehouse_backend_honours_the_same_contract() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(tvlwatch_warehouse::WarehouseConfig::in_home(temp.path()))
            .expect("warehouse");
        let clock = ManualClock::new(5_000);
        let cache = CacheStore::new(Arc::new(warehouse), Arc::new(clock.clone()));

        cache
            .set_with_expiry("logos", "ETH", "https://cdn.example/eth.png", Duration::from_secs(1))
            .await
            .expect("write");
        assert!(!cache.is_expired("logos", "ETH").await);

        clock.advance(Duration::from_millis(1_001));
        assert!(cache.is_expired("logos", "ETH").await);
        assert_eq!(cache.clear_expired().await.expect("sweep"), 1);
        assert_eq!(cache.get::<String>("logos", "ETH").await, None);
    }
}
