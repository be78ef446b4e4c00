use serde_json::{json, Value};
use time::OffsetDateTime;
use tvlwatch_core::{TimeRange, TvlContext};

use crate::cli::HistoryArgs;
use crate::error::CliError;

pub async fn run(args: &HistoryArgs, context: &TvlContext) -> Result<Value, CliError> {
    let range = requested_range(args, OffsetDateTime::now_utc().unix_timestamp())?;
    let series = context
        .service()
        .history(&args.id, args.resolution, range)
        .await?;

    Ok(json!({
        "from": range.from(),
        "to": range.to(),
        "series": series,
    }))
}

fn requested_range(args: &HistoryArgs, now: i64) -> Result<TimeRange, CliError> {
    match (&args.from, &args.to) {
        (Some(from), Some(to)) => Ok(TimeRange::parse_rfc3339(from, to)?),
        _ => Ok(TimeRange::trailing(now, args.resolution, args.bars)),
    }
}
