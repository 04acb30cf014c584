use rota_core::DrainControl;

use super::common::{format_report_lines, open_queue, OpenQueueMode, QueueOptions};
use crate::error::CliError;

/// Drain the queue once. Ctrl-C stops the pass after in-flight records
/// settle; anything left stays queued.
pub async fn run_drain(json: bool, options: &QueueOptions) -> Result<(), CliError> {
    let queue = open_queue(options, OpenQueueMode::RequireRemote).await?;
    let control = DrainControl::new();

    let interrupt = control.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight records");
            interrupt.cancel();
        }
    });

    let result = queue.drain_with(&control).await;
    watcher.abort();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}
