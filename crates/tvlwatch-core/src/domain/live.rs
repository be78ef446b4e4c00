use serde::{Deserialize, Serialize};

/// Live delta pushed over the streaming endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingUpdate {
    /// Subscription identity the update belongs to.
    #[serde(alias = "pool_id", alias = "token_id")]
    pub id: String,
    pub price_usd: f64,
    #[serde(default)]
    pub tvl_usd: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    /// Unix seconds.
    #[serde(default)]
    pub time: Option<i64>,
}

impl TradingUpdate {
    pub fn belongs_to(&self, subscription_key: &str) -> bool {
        self.id == subscription_key
    }
}

/// Keep-alive record emitted by the stream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}
