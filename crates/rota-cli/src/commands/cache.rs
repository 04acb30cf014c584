use rota_core::models::normalize_barcode;

use super::common::{format_handled_line, open_queue, OpenQueueMode, QueueOptions};
use crate::error::CliError;

pub async fn run_handled(barcode: &str, options: &QueueOptions) -> Result<(), CliError> {
    let queue = open_queue(options, OpenQueueMode::Local).await?;
    let barcode = normalize_barcode(barcode);
    let entry = queue.handled_entry(&barcode);
    println!("{}", format_handled_line(&barcode, entry.as_ref()));
    Ok(())
}

pub async fn run_reset_cache(rebuild: bool, options: &QueueOptions) -> Result<(), CliError> {
    let queue = open_queue(options, OpenQueueMode::Local).await?;
    if rebuild {
        queue.rebuild_cache().await?;
        println!("Handled barcodes rebuilt from the queue");
    } else {
        queue.reset_all().await?;
        println!("Handled barcodes cleared");
    }
    Ok(())
}

pub async fn run_reconcile(options: &QueueOptions) -> Result<(), CliError> {
    let queue = open_queue(options, OpenQueueMode::RequireRemote).await?;
    let confirmed = queue.reconcile().await?;
    if confirmed.is_empty() {
        println!("Nothing to confirm");
    } else {
        for barcode in confirmed {
            println!("Confirmed {barcode}");
        }
    }
    Ok(())
}
