//! Domain types shared by the facade, the stream manager and the CLI.

mod live;
mod market;
mod resolution;

pub use live::{HealthCheck, TradingUpdate};
pub use market::{HistoryBar, HistorySeries, LogoAsset, SymbolInfo, TimeRange, TokenSnapshot};
pub use resolution::Resolution;
