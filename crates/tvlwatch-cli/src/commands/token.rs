use serde_json::Value;
use tvlwatch_core::TvlContext;

use crate::cli::TokenArgs;
use crate::error::CliError;

pub async fn run(args: &TokenArgs, context: &TvlContext) -> Result<Value, CliError> {
    let snapshot = context.service().current_token(&args.id).await?;
    Ok(serde_json::to_value(snapshot)?)
}
