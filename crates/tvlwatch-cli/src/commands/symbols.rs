use serde_json::{json, Value};
use tvlwatch_core::TvlContext;

use crate::cli::SymbolsArgs;
use crate::error::CliError;

pub async fn run(args: &SymbolsArgs, context: &TvlContext) -> Result<Value, CliError> {
    let symbols = context.service().symbols(&args.group).await?;
    Ok(json!({
        "group": args.group,
        "count": symbols.len(),
        "symbols": symbols,
    }))
}
