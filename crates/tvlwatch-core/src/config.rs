//! Client configuration.
//!
//! Values resolve in this order, first hit wins:
//!
//! | Layer | Source |
//! |-------|--------|
//! | explicit | `with_base_url` / `with_api_token` (CLI flags) |
//! | persisted | `settings` table of the warehouse |
//! | environment | `TVLWATCH_API_URL` / `TVLWATCH_API_TOKEN` |
//! | default | [`DEFAULT_BASE_URL`], no token |

use std::env;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

use thiserror::Error;
use tvlwatch_warehouse::{Warehouse, WarehouseError};

use crate::{DispatcherConfig, HttpAuth, StreamConfig, ValidationError};

pub const DEFAULT_BASE_URL: &str = "https://api.tvlwatch.dev";
pub const SETTING_API_URL: &str = "api_url";
pub const SETTING_API_TOKEN: &str = "api_token";

const ENV_API_URL: &str = "TVLWATCH_API_URL";
const ENV_API_TOKEN: &str = "TVLWATCH_API_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Expiry applied to each cached resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub symbols: Duration,
    pub token_snapshot: Duration,
    pub history: Duration,
    pub logos: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            symbols: Duration::from_secs(30 * 60),
            token_snapshot: Duration::from_secs(10 * 60),
            history: Duration::from_secs(5 * 60),
            logos: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Resolved client configuration.
#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub ttls: CacheTtls,
    pub dispatcher: DispatcherConfig,
    pub stream: StreamConfig,
}

impl ClientConfig {
    pub fn auth(&self) -> HttpAuth {
        HttpAuth::bearer(self.api_token.as_deref())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            api_token: None,
            ttls: CacheTtls::default(),
            dispatcher: DispatcherConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Debug for ClientConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("ttls", &self.ttls)
            .field("dispatcher", &self.dispatcher)
            .field("stream", &self.stream)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Layer {
    base_url: Option<String>,
    api_token: Option<String>,
}

/// Layered builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    explicit: Layer,
    persisted: Layer,
    environment: Layer,
    ttls: CacheTtls,
    dispatcher: DispatcherConfig,
    stream: StreamConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `TVLWATCH_API_URL` and `TVLWATCH_API_TOKEN`.
    pub fn with_env(mut self) -> Self {
        self.environment = Layer {
            base_url: env::var(ENV_API_URL).ok(),
            api_token: env::var(ENV_API_TOKEN).ok(),
        };
        self
    }

    /// Read settings persisted by `config set-url` / `config set-token`.
    pub fn with_settings(mut self, warehouse: &Warehouse) -> Result<Self, WarehouseError> {
        self.persisted = Layer {
            base_url: warehouse.get_setting(SETTING_API_URL)?,
            api_token: warehouse.get_setting(SETTING_API_TOKEN)?,
        };
        Ok(self)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.explicit.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.explicit.api_token = Some(token.into());
        self
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let layers = [&self.explicit, &self.persisted, &self.environment];

        let base_url = match pick(&layers, |layer| layer.base_url.as_deref()) {
            Some(url) => normalize_base_url(&url)?,
            None => String::from(DEFAULT_BASE_URL),
        };

        Ok(ClientConfig {
            base_url,
            api_token: pick(&layers, |layer| layer.api_token.as_deref()),
            ttls: self.ttls,
            dispatcher: self.dispatcher,
            stream: self.stream,
        })
    }
}

fn pick(layers: &[&Layer], field: impl Fn(&Layer) -> Option<&str>) -> Option<String> {
    layers
        .iter()
        .filter_map(|layer| field(layer))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Validate an HTTP(S) base URL and strip trailing slashes.
pub fn normalize_base_url(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim().trim_end_matches('/');
    let invalid = |reason| ValidationError::InvalidBaseUrl {
        value: value.to_owned(),
        reason,
    };

    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| invalid("scheme must be http or https"))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(invalid("host is missing"));
    }
    if trimmed.contains(['?', '#', ' ']) {
        return Err(invalid("query, fragment and spaces are not allowed"));
    }

    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_any_layer() {
        let config = ClientConfigBuilder::new().build().expect("config");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api_token, None);
        assert_eq!(config.auth(), HttpAuth::None);
        assert_eq!(config.ttls.symbols, Duration::from_secs(1_800));
    }

    #[test]
    fn explicit_beats_persisted_beats_environment() {
        let mut builder = ClientConfigBuilder::new();
        builder.environment = Layer {
            base_url: Some(String::from("https://env.example")),
            api_token: Some(String::from("env-token")),
        };
        builder.persisted = Layer {
            base_url: Some(String::from("https://saved.example/")),
            api_token: None,
        };

        let config = builder.build().expect("config");
        assert_eq!(config.base_url, "https://saved.example");
        assert_eq!(config.api_token.as_deref(), Some("env-token"));

        let mut builder = ClientConfigBuilder::new().with_api_token("cli-token");
        builder.persisted.api_token = Some(String::from("saved-token"));
        let config = builder.build().expect("config");
        assert_eq!(config.api_token.as_deref(), Some("cli-token"));
    }

    #[test]
    fn blank_values_fall_through() {
        let mut builder = ClientConfigBuilder::new().with_api_token("   ");
        builder.environment.api_token = Some(String::from("env-token"));
        let config = builder.build().expect("config");
        assert_eq!(config.api_token.as_deref(), Some("env-token"));
    }

    #[test]
    fn rejects_invalid_base_urls() {
        for value in ["ftp://host", "https://", "api.example", "https://x.test/?q=1"] {
            let err = normalize_base_url(value).expect_err(value);
            assert!(matches!(err, ValidationError::InvalidBaseUrl { .. }), "{value}");
        }
        assert_eq!(
            normalize_base_url(" http://localhost:8080/ ").expect("valid"),
            "http://localhost:8080"
        );
    }

    #[test]
    fn settings_layer_reads_the_warehouse() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse =
            Warehouse::open(tvlwatch_warehouse::WarehouseConfig::in_home(temp.path())).expect("open");
        warehouse
            .put_setting(SETTING_API_URL, "https://persisted.example")
            .expect("setting");

        let config = ClientConfigBuilder::new()
            .with_settings(&warehouse)
            .expect("settings")
            .build()
            .expect("config");
        assert_eq!(config.base_url, "https://persisted.example");
    }

    #[test]
    fn debug_output_redacts_the_token() {
        let config = ClientConfigBuilder::new()
            .with_api_token("super-secret")
            .build()
            .expect("config");
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
