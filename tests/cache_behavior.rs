//! Behavior-driven tests for the two-tier cache.
//!
//! These tests verify expiry, absence and persistence as seen by a caller,
//! using a manually advanced clock and a real DuckDB file.

use std::sync::Arc;
use std::time::Duration;

use tvlwatch_core::{CacheStore, ManualClock, SymbolInfo, Warehouse, WarehouseConfig};

const START_MS: i64 = 1_700_000_000_000;

fn symbol(id: &str) -> SymbolInfo {
    SymbolInfo {
        id: id.to_owned(),
        symbol: id.to_uppercase(),
        name: None,
        group: Some(String::from("Aggregate")),
        logo_url: None,
    }
}

fn store_on(warehouse: &Warehouse, clock: &ManualClock) -> CacheStore {
    CacheStore::new(Arc::new(warehouse.clone()), Arc::new(clock.clone()))
}

// =============================================================================
// Cache: Expiry
// =============================================================================

#[tokio::test]
async fn when_a_value_is_written_it_is_fresh_until_its_ttl_passes() {
    // Given: A durable cache on a fresh warehouse
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::in_home(temp.path())).expect("open");
    let clock = ManualClock::new(START_MS);
    let cache = store_on(&warehouse, &clock);
    let ttl = Duration::from_secs(30 * 60);

    // When: A symbol list is written with a 30 minute TTL
    let symbols = vec![symbol("eth"), symbol("btc")];
    cache
        .set_with_expiry("symbols", "Aggregate", &symbols, ttl)
        .await
        .expect("write");

    // Then: It is readable and fresh right away and up to the expiry instant
    assert!(!cache.is_expired("symbols", "Aggregate").await);
    assert_eq!(
        cache.get::<Vec<SymbolInfo>>("symbols", "Aggregate").await,
        Some(symbols.clone())
    );
    clock.advance(ttl);
    assert!(!cache.is_expired("symbols", "Aggregate").await);

    // And: One millisecond later it is expired but the stale value is still readable
    clock.advance(Duration::from_millis(1));
    assert!(cache.is_expired("symbols", "Aggregate").await);
    assert_eq!(
        cache.get::<Vec<SymbolInfo>>("symbols", "Aggregate").await,
        Some(symbols)
    );
}

#[tokio::test]
async fn when_a_key_was_never_written_reads_are_absent_not_errors() {
    // Given: An empty cache
    let clock = ManualClock::new(START_MS);
    let cache = CacheStore::ephemeral(Arc::new(clock));

    // When / Then: Missing keys read as absent and count as expired
    assert_eq!(cache.get::<Vec<SymbolInfo>>("symbols", "Nope").await, None);
    assert!(cache.is_expired("symbols", "Nope").await);
    assert_eq!(cache.get_memory::<u32>("tokens:nope").await, None);
}

#[tokio::test]
async fn when_expired_entries_are_swept_only_fresh_ones_remain() {
    // Given: One short-lived and one long-lived entry
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::in_home(temp.path())).expect("open");
    let clock = ManualClock::new(START_MS);
    let cache = store_on(&warehouse, &clock);
    cache
        .set_with_expiry("history", "short", &1_u8, Duration::from_secs(60))
        .await
        .expect("write");
    cache
        .set_with_expiry("logos", "long", &2_u8, Duration::from_secs(86_400))
        .await
        .expect("write");

    // When: Time passes beyond the short TTL and expired entries are swept
    clock.advance(Duration::from_secs(120));
    let removed = cache.clear_expired().await.expect("sweep");

    // Then: Only the short-lived entry is gone
    assert_eq!(removed, 1);
    assert_eq!(cache.durable_len().await.expect("len"), 1);
    assert_eq!(cache.get::<u8>("history", "short").await, None);
    assert_eq!(cache.get::<u8>("logos", "long").await, Some(2));
}

// =============================================================================
// Cache: Persistence
// =============================================================================

#[tokio::test]
async fn when_the_process_restarts_durable_entries_survive_and_memory_does_not() {
    let temp = tempfile::tempdir().expect("tempdir");
    let clock = ManualClock::new(START_MS);
    let ttl = Duration::from_secs(600);

    // Given: A durable and a memory entry written before a restart
    {
        let warehouse = Warehouse::open(WarehouseConfig::in_home(temp.path())).expect("open");
        let cache = store_on(&warehouse, &clock);
        cache
            .set_with_expiry("symbols", "Aggregate", &vec![symbol("eth")], ttl)
            .await
            .expect("durable write");
        cache
            .set_memory("tokens:eth", &symbol("eth"), ttl)
            .await
            .expect("memory write");
    }

    // When: The warehouse is reopened from the same directory
    let warehouse = Warehouse::open(WarehouseConfig::in_home(temp.path())).expect("reopen");
    let cache = store_on(&warehouse, &clock);

    // Then: The durable entry is still fresh and the memory tier starts empty
    assert!(!cache.is_expired("symbols", "Aggregate").await);
    assert_eq!(
        cache.get::<Vec<SymbolInfo>>("symbols", "Aggregate").await,
        Some(vec![symbol("eth")])
    );
    assert_eq!(cache.get_memory::<SymbolInfo>("tokens:eth").await, None);
}

#[tokio::test]
async fn when_a_value_is_rewritten_the_latest_write_wins() {
    // Given: A cached value
    let clock = ManualClock::new(START_MS);
    let cache = CacheStore::ephemeral(Arc::new(clock.clone()));
    cache
        .set_with_expiry("symbols", "Aggregate", &vec![symbol("eth")], Duration::from_secs(60))
        .await
        .expect("write");

    // When: The same key is written again later with a new TTL
    clock.advance(Duration::from_secs(59));
    cache
        .set_with_expiry("symbols", "Aggregate", &vec![symbol("btc")], Duration::from_secs(60))
        .await
        .expect("rewrite");

    // Then: The new value and the new expiry apply
    clock.advance(Duration::from_secs(30));
    assert!(!cache.is_expired("symbols", "Aggregate").await);
    assert_eq!(
        cache.get::<Vec<SymbolInfo>>("symbols", "Aggregate").await,
        Some(vec![symbol("btc")])
    );
}
