use rota_core::{ActionRecord, RecordId};

use super::common::{format_record_lines, open_queue, OpenQueueMode, QueueOptions};
use crate::error::CliError;

pub async fn run_queue(json: bool, options: &QueueOptions) -> Result<(), CliError> {
    let queue = open_queue(options, OpenQueueMode::Local).await?;
    print_records(&queue.list().await?, json, "Queue is empty")
}

pub async fn run_failed(json: bool, options: &QueueOptions) -> Result<(), CliError> {
    let queue = open_queue(options, OpenQueueMode::Local).await?;
    print_records(&queue.failed().await?, json, "No failed actions")
}

pub async fn run_discard(id: &str, options: &QueueOptions) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;
    let queue = open_queue(options, OpenQueueMode::Local).await?;
    queue.discard(&record_id).await?;
    println!("Discarded {record_id}");
    Ok(())
}

pub fn parse_record_id(id: &str) -> Result<RecordId, CliError> {
    let trimmed = id.trim();
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidRecordId(trimmed.to_string()))
}

fn print_records(
    records: &[ActionRecord],
    json: bool,
    empty_message: &str,
) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{empty_message}");
        return Ok(());
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    for line in format_record_lines(records, now_ms) {
        println!("{line}");
    }
    Ok(())
}
