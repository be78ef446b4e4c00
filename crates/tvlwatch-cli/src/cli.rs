//! CLI argument definitions for tvlwatch.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `symbols` | List symbols of a group |
//! | `token` | Current snapshot of one token |
//! | `history` | OHLCV series for a token |
//! | `stream` | Follow live trading updates as NDJSON |
//! | `cache` | Cache maintenance |
//! | `config` | Persisted settings |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--api-url` | persisted / env / built-in | API base URL override |
//! | `--api-token` | persisted / env | Bearer token override |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `warn` | Log filter when `RUST_LOG` is unset |
//!
//! # Examples
//!
//! ```bash
//! tvlwatch symbols --group Aggregate --pretty
//! tvlwatch history pool-1 --resolution 1h --bars 48
//! tvlwatch stream pool-1 --duration-secs 60
//! tvlwatch config set-token "$TOKEN"
//! ```

use clap::{Args, Parser, Subcommand};
use tvlwatch_core::Resolution;

/// tvlwatch - cached market data and live trading updates
#[derive(Debug, Parser)]
#[command(name = "tvlwatch", author, version, about = "Cached market data and live trading updates")]
pub struct Cli {
    /// API base URL for this invocation only.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Bearer token for this invocation only.
    #[arg(long, global = true)]
    pub api_token: Option<String>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the symbols of a group.
    Symbols(SymbolsArgs),

    /// Show the current snapshot of a token.
    Token(TokenArgs),

    /// Fetch an OHLCV series.
    ///
    /// Either pass both --from and --to as RFC3339 UTC timestamps, or let
    /// --bars pick the most recent candles.
    History(HistoryArgs),

    /// Follow live updates for a subscription key, one JSON event per line.
    Stream(StreamArgs),

    /// Cache maintenance commands.
    Cache(CacheArgs),

    /// Persisted settings.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct SymbolsArgs {
    #[arg(long, default_value = "Aggregate")]
    pub group: String,
}

#[derive(Debug, Args)]
pub struct TokenArgs {
    pub id: String,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub id: String,

    /// Candle size: 1m, 5m, 15m, 1h, 4h or 1d.
    #[arg(long, default_value = "1h")]
    pub resolution: Resolution,

    /// Range start, RFC3339 UTC (e.g. 2024-01-01T00:00:00Z).
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// Range end, RFC3339 UTC.
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Number of trailing candles when no explicit range is given.
    #[arg(long, default_value_t = 100, conflicts_with_all = ["from", "to"])]
    pub bars: u32,
}

#[derive(Debug, Args)]
pub struct StreamArgs {
    pub key: String,

    /// Stop after this many seconds; runs until interrupted when omitted.
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Delete durable entries whose expiry has passed.
    ClearExpired,
    /// Delete every cached entry and history snapshot.
    Clear,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Persist the bearer token; an empty value removes it.
    SetToken(SetTokenArgs),
    /// Persist the API base URL.
    SetUrl(SetUrlArgs),
    /// Print the resolved configuration.
    Show,
}

#[derive(Debug, Args)]
pub struct SetTokenArgs {
    pub token: String,
}

#[derive(Debug, Args)]
pub struct SetUrlArgs {
    pub url: String,
}
