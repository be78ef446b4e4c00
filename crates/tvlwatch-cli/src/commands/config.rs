use serde_json::{json, Value};
use tvlwatch_core::TvlContext;

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::error::CliError;

pub async fn run(args: &ConfigArgs, context: &mut TvlContext) -> Result<Value, CliError> {
    match &args.command {
        ConfigCommand::SetToken(set) => {
            let token = Some(set.token.as_str()).filter(|token| !token.trim().is_empty());
            context.update_credentials(token).await?;
            Ok(json!({ "api_token": if token.is_some() { "stored" } else { "removed" } }))
        }
        ConfigCommand::SetUrl(set) => {
            context.set_base_url(&set.url)?;
            Ok(json!({ "base_url": context.config().base_url }))
        }
        ConfigCommand::Show => Ok(show(context)),
    }
}

fn show(context: &TvlContext) -> Value {
    let config = context.config();
    json!({
        "base_url": config.base_url,
        "api_token": config.api_token.as_ref().map(|_| "<redacted>"),
        "database": context.warehouse().map(|warehouse| warehouse.db_path().display().to_string()),
        "ttl_secs": {
            "symbols": config.ttls.symbols.as_secs(),
            "token_snapshot": config.ttls.token_snapshot.as_secs(),
            "history": config.ttls.history.as_secs(),
            "logos": config.ttls.logos.as_secs(),
        },
        "max_concurrent_requests": config.dispatcher.max_concurrent,
    })
}
