use serde_json::{json, Value};
use tvlwatch_core::{ServiceError, TvlContext};

use crate::cli::{CacheArgs, CacheCommand};
use crate::error::CliError;

pub async fn run(args: &CacheArgs, context: &TvlContext) -> Result<Value, CliError> {
    let cache = context.cache();
    match args.command {
        CacheCommand::ClearExpired => {
            let removed = cache.clear_expired().await.map_err(ServiceError::from)?;
            Ok(json!({ "removed": removed }))
        }
        CacheCommand::Clear => {
            cache.clear_all().await.map_err(ServiceError::from)?;
            Ok(json!({ "cleared": true }))
        }
    }
}
