//! Process-wide wiring of the client components.

use std::sync::Arc;

use tracing::info;
use tvlwatch_warehouse::{Warehouse, WarehouseConfig};

use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{
    normalize_base_url, ClientConfig, ClientConfigBuilder, ConfigError, SETTING_API_TOKEN,
    SETTING_API_URL,
};
use crate::dispatcher::RequestDispatcher;
use crate::http_client::{HttpClient, ReqwestHttpClient, StreamingHttpClient};
use crate::service::{DataService, ServiceError};
use crate::stream::StreamManager;

/// Owns one instance of every component; built once at startup.
#[derive(Debug)]
pub struct TvlContext {
    config: ClientConfig,
    warehouse: Option<Warehouse>,
    cache: CacheStore,
    dispatcher: RequestDispatcher,
    service: DataService,
    stream: StreamManager,
}

impl TvlContext {
    /// Open the warehouse, layer its persisted settings under `builder`, and
    /// wire the production HTTP client.
    pub fn open(
        builder: ClientConfigBuilder,
        warehouse_config: WarehouseConfig,
    ) -> Result<Self, ConfigError> {
        let warehouse = Warehouse::open(warehouse_config)?;
        let config = builder.with_settings(&warehouse)?.build()?;
        let client = Arc::new(ReqwestHttpClient::new());

        info!(base_url = %config.base_url, db = %warehouse.db_path().display(), "context opened");
        Ok(Self::from_parts(
            config,
            Some(warehouse),
            client.clone(),
            client,
            Arc::new(SystemClock),
        ))
    }

    /// Wire the components from explicit parts. Without a warehouse the
    /// durable tier lives in memory.
    pub fn from_parts(
        config: ClientConfig,
        warehouse: Option<Warehouse>,
        http: Arc<dyn HttpClient>,
        streaming: Arc<dyn StreamingHttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = match &warehouse {
            Some(warehouse) => CacheStore::new(Arc::new(warehouse.clone()), clock),
            None => CacheStore::ephemeral(clock),
        };
        let dispatcher = RequestDispatcher::new(config.dispatcher);
        let service = DataService::new(
            http,
            cache.clone(),
            dispatcher.clone(),
            warehouse.clone(),
            config.base_url.clone(),
            config.auth(),
            config.ttls,
        );
        let stream = StreamManager::new(
            streaming,
            config.base_url.clone(),
            config.auth(),
            config.stream,
        );

        Self {
            config,
            warehouse,
            cache,
            dispatcher,
            service,
            stream,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn warehouse(&self) -> Option<&Warehouse> {
        self.warehouse.as_ref()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    pub fn service(&self) -> &DataService {
        &self.service
    }

    pub fn stream(&self) -> &StreamManager {
        &self.stream
    }

    /// Rotate the bearer credential.
    ///
    /// Persists the token (a blank token removes it), clears both cache tiers
    /// and lifts every addon block.
    pub async fn update_credentials(&mut self, token: Option<&str>) -> Result<(), ServiceError> {
        let token = token.map(str::trim).filter(|token| !token.is_empty());

        if let Some(warehouse) = &self.warehouse {
            match token {
                Some(token) => warehouse.put_setting(SETTING_API_TOKEN, token)?,
                None => warehouse.remove_setting(SETTING_API_TOKEN)?,
            }
        }

        self.config.api_token = token.map(str::to_owned);
        let auth = self.config.auth();
        self.service.set_credentials(auth.clone());
        self.stream.set_credentials(auth);
        self.cache.clear_all().await?;
        self.stream.reset_addon_block();

        info!(has_token = token.is_some(), "credentials updated");
        Ok(())
    }

    /// Validate, persist and apply a new API base URL.
    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), ServiceError> {
        let base_url = normalize_base_url(base_url)?;
        if let Some(warehouse) = &self.warehouse {
            warehouse.put_setting(SETTING_API_URL, &base_url)?;
        }

        self.service.set_base_url(base_url.clone());
        self.stream.set_base_url(base_url.clone());
        info!(base_url = %base_url, "base url updated");
        self.config.base_url = base_url;
        Ok(())
    }
}
