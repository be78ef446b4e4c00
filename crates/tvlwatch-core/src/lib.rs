//! # tvlwatch Core
//!
//! Client core for the tvlwatch market-data API.
//!
//! ## Overview
//!
//! - **Two-tier cache** with per-entry expiry (DuckDB-backed durable tier and
//!   a process memory tier)
//! - **Request dispatcher** that runs at most three fetches at a time, FIFO
//! - **Error classifier** mapping failed responses to auth / addon / network
//! - **Streaming session manager** with backoff, addon blocking and a
//!   silence watchdog
//! - **Data service facade** composing cache and dispatcher into
//!   cache-then-fetch reads
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Durable and memory cache tiers |
//! | [`classifier`] | Failure categorization |
//! | [`clock`] | Wall-clock abstraction used for expiry |
//! | [`config`] | Layered client configuration |
//! | [`context`] | Startup wiring of every component |
//! | [`dispatcher`] | Bounded-concurrency FIFO queue |
//! | [`domain`] | Market and streaming data types |
//! | [`error`] | Validation errors |
//! | [`http_client`] | HTTP client abstraction |
//! | [`retry`] | Backoff policies |
//! | [`service`] | Cache-then-fetch facade |
//! | [`stream`] | Streaming session manager |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tvlwatch_core::{ClientConfigBuilder, TvlContext, WarehouseConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = TvlContext::open(
//!         ClientConfigBuilder::new().with_env(),
//!         WarehouseConfig::default(),
//!     )?;
//!
//!     let symbols = context.service().symbols("Aggregate").await?;
//!     println!("{} symbols", symbols.len());
//!
//!     let mut events = context.stream().subscribe();
//!     context.stream().start("pool-1")?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Fetch failures surface as [`ServiceError`]; upstream statuses are
//! classified first:
//!
//! ```rust
//! use tvlwatch_core::{ErrorCategory, ServiceError};
//!
//! fn describe(error: &ServiceError) -> &'static str {
//!     match error {
//!         ServiceError::Upstream(classified) => match classified.category() {
//!             ErrorCategory::Auth => "check the API token",
//!             ErrorCategory::Addon => "the plan lacks streaming access",
//!             _ => "try again later",
//!         },
//!         _ => "request failed",
//!     }
//! }
//! ```
//!
//! Streaming failures never escape the manager; they arrive as
//! [`StreamEvent::Notice`] events.

pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod retry;
pub mod service;
pub mod stream;

// Caching
pub use cache::{CacheError, CacheStore, DurableBackend, MemoryBackend};

// Classification
pub use classifier::{classify, classify_transport, ClassifiedError, ErrorCategory};

// Time
pub use clock::{Clock, ManualClock, SystemClock};

// Configuration
pub use config::{CacheTtls, ClientConfig, ClientConfigBuilder, ConfigError, DEFAULT_BASE_URL};

pub use context::TvlContext;

// Dispatching
pub use dispatcher::{
    DispatchError, DispatcherConfig, RateQuota, RequestDispatcher, MAX_CONCURRENT_REQUESTS,
};

// Domain models
pub use domain::{
    HealthCheck, HistoryBar, HistorySeries, LogoAsset, Resolution, SymbolInfo, TimeRange,
    TokenSnapshot, TradingUpdate,
};

pub use error::ValidationError;

// HTTP client types
pub use http_client::{
    ChunkStream, HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    StreamResponse, StreamingHttpClient,
};

pub use retry::Backoff;

// Data service
pub use service::{CacheTier, DataService, ServiceError};

// Streaming
pub use stream::{
    FailureAction, SessionSnapshot, StreamConfig, StreamEvent, StreamManager, StreamNotice,
    StreamSession, StreamStatus,
};

// Warehouse (re-exported from tvlwatch-warehouse)
pub use tvlwatch_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
