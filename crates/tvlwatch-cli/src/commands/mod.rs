mod cache;
mod config;
mod history;
mod stream;
mod symbols;
mod token;

use serde_json::Value;
use tvlwatch_core::{ClientConfigBuilder, TvlContext, WarehouseConfig};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Run the selected command. `None` means the command wrote its own output.
pub async fn run(cli: &Cli) -> Result<Option<Value>, CliError> {
    let mut context = open_context(cli)?;

    match &cli.command {
        Command::Symbols(args) => symbols::run(args, &context).await.map(Some),
        Command::Token(args) => token::run(args, &context).await.map(Some),
        Command::History(args) => history::run(args, &context).await.map(Some),
        Command::Stream(args) => stream::run(args, &context).await.map(|()| None),
        Command::Cache(args) => cache::run(args, &context).await.map(Some),
        Command::Config(args) => config::run(args, &mut context).await.map(Some),
    }
}

fn open_context(cli: &Cli) -> Result<TvlContext, CliError> {
    let mut builder = ClientConfigBuilder::new().with_env();
    if let Some(url) = &cli.api_url {
        builder = builder.with_base_url(url.as_str());
    }
    if let Some(token) = &cli.api_token {
        builder = builder.with_api_token(token.as_str());
    }

    Ok(TvlContext::open(builder, WarehouseConfig::default())?)
}
