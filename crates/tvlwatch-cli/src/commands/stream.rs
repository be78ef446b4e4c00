use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tvlwatch_core::{ErrorCategory, StreamEvent, StreamStatus, TvlContext};

use crate::cli::StreamArgs;
use crate::error::CliError;
use crate::output::NdjsonWriter;

pub async fn run(args: &StreamArgs, context: &TvlContext) -> Result<(), CliError> {
    let manager = context.stream();
    let mut events = manager.subscribe();
    let mut writer = NdjsonWriter::stdout();

    manager.start(&args.key)?;

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            _ = &mut deadline => break Ok(()),
            _ = tokio::signal::ctrl_c() => break Ok(()),
            received = events.recv() => match received {
                Ok(event) => {
                    writer.emit(&event)?;
                    if let Some(reason) = terminal_reason(&event) {
                        break Err(CliError::Stream(reason));
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "stream output fell behind"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    manager.shutdown();
    outcome
}

/// Events after which the session cannot recover without user action.
fn terminal_reason(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Status {
            status: StreamStatus::AddonBlocked,
            key,
        } => Some(format!("streaming is not included in the plan for '{key}'")),
        StreamEvent::Notice(notice) if notice.category == ErrorCategory::Auth => {
            Some(notice.message.clone())
        }
        _ => None,
    }
}
