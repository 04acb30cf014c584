use std::env;
use std::path::PathBuf;

use chrono::DateTime;
use rota_core::models::{HandledEntry, RemoteOrder, RemoteRef};
use rota_core::remote::{
    ApplyOutcome, ApplyRequest, RemoteError, RemoteLedger, RemoteResult, RestLedgerClient,
};
use rota_core::storage::{AssetError, AssetStore, HttpAssetStore, R2AssetStore, R2Config};
use rota_core::{
    ActionFields, ActionRecord, CourierIdentity, CourierQueue, RecordOutcome, RemoteConfig,
    SyncReport, SyncSettings, SyncState,
};

use crate::error::CliError;

const ENV_DB_PATH: &str = "ROTA_DB_PATH";
const OFFLINE_COURIER: &str = "unknown";

pub type CliQueue = CourierQueue<CliLedger, CliAssetStore>;

/// Where the queue lives and how it is tuned.
pub struct QueueOptions {
    pub db_path: PathBuf,
    pub settings_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenQueueMode {
    /// Capture and inspection; no network needed.
    Local,
    /// Drain and reconcile; fails without remote configuration.
    RequireRemote,
}

/// Remote ledger selected from the environment.
pub enum CliLedger {
    Rest(RestLedgerClient),
    Unconfigured,
}

impl RemoteLedger for CliLedger {
    async fn fetch_status(&self, barcode: &str) -> RemoteResult<Option<RemoteOrder>> {
        match self {
            Self::Rest(client) => client.fetch_status(barcode).await,
            Self::Unconfigured => Err(unconfigured()),
        }
    }

    async fn apply(&self, request: &ApplyRequest) -> RemoteResult<ApplyOutcome> {
        match self {
            Self::Rest(client) => client.apply(request).await,
            Self::Unconfigured => Err(unconfigured()),
        }
    }
}

fn unconfigured() -> RemoteError {
    RemoteError::Network("remote ledger is not configured".to_string())
}

/// Photo store selected from the environment. R2 wins when configured.
pub enum CliAssetStore {
    R2(R2AssetStore),
    Http(HttpAssetStore),
    Unconfigured,
}

impl AssetStore for CliAssetStore {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<RemoteRef, AssetError> {
        match self {
            Self::R2(store) => store.put(name, bytes, content_type).await,
            Self::Http(store) => store.put(name, bytes, content_type).await,
            Self::Unconfigured => Err(AssetError::NetworkUnavailable(
                "photo store is not configured".to_string(),
            )),
        }
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path().ok_or(CliError::NoDataDir)
}

pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("rota").join("rota.db"))
}

pub fn load_settings(options: &QueueOptions) -> Result<SyncSettings, CliError> {
    match &options.settings_path {
        Some(path) => Ok(SyncSettings::load(path)?),
        None => Ok(SyncSettings::default()),
    }
}

pub async fn open_queue(options: &QueueOptions, mode: OpenQueueMode) -> Result<CliQueue, CliError> {
    let settings = load_settings(options)?;
    let remote = RemoteConfig::from_env()?;
    let identity = CourierIdentity::from_env().ok();

    let (ledger, store, courier_id) = match (remote, identity) {
        (Some(remote), Some(identity)) => {
            let token = identity.access_token.as_deref();
            let ledger = CliLedger::Rest(RestLedgerClient::new(&remote, token)?);
            let store = match R2Config::from_env()? {
                Some(r2) => CliAssetStore::R2(R2AssetStore::new(r2)),
                None => CliAssetStore::Http(HttpAssetStore::new(&remote, token)?),
            };
            (ledger, store, identity.courier_id)
        }
        _ if mode == OpenQueueMode::RequireRemote => return Err(CliError::RemoteNotConfigured),
        (_, identity) => (
            CliLedger::Unconfigured,
            CliAssetStore::Unconfigured,
            identity.map_or_else(|| OFFLINE_COURIER.to_string(), |id| id.courier_id),
        ),
    };

    Ok(CourierQueue::open_path(&options.db_path, ledger, store, settings, courier_id).await?)
}

pub fn format_record_lines(records: &[ActionRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let mut line = format!(
                "{} {} {} [{}] {}",
                short_id(&record.id.to_string()),
                record.barcode,
                record.kind,
                state_label(&record.sync_state),
                format_relative_time(record.created_at, now_ms),
            );
            if let Some(summary) = fields_summary(&record.fields) {
                line.push_str(" - ");
                line.push_str(&summary);
            }
            if record.attempts > 0 {
                line.push_str(&format!(" (attempts: {})", record.attempts));
            }
            if let Some(next) = record.next_attempt_at.filter(|next| *next > now_ms) {
                line.push_str(&format!(", next try {}", format_timestamp(next)));
            }
            if let Some(error) = record.last_error.as_deref() {
                line.push_str(&format!(", last error: {error}"));
            }
            line
        })
        .collect()
}

fn state_label(state: &SyncState) -> String {
    match state {
        SyncState::Failed(reason) => format!("failed: {reason}"),
        other => other.tag().to_string(),
    }
}

fn fields_summary(fields: &ActionFields) -> Option<String> {
    match fields {
        ActionFields::Receiver {
            receiver_name,
            receiver_type,
        } => Some(format!("{receiver_name} ({})", receiver_type.ledger_label())),
        ActionFields::Failure { reason } => Some(reason.clone()),
        ActionFields::Empty => None,
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Applied {}, skipped {}, conflicts {}, failed {}, retrying {}, deferred {}",
        report.applied.len(),
        report.skipped.len(),
        report.conflicts.len(),
        report.failed.len(),
        report.retrying.len(),
        report.deferred.len(),
    )];

    let sections: [(&str, &[RecordOutcome]); 6] = [
        ("applied", &report.applied),
        ("skipped", &report.skipped),
        ("conflict", &report.conflicts),
        ("failed", &report.failed),
        ("retrying", &report.retrying),
        ("deferred", &report.deferred),
    ];
    for (label, outcomes) in sections {
        for outcome in outcomes {
            let mut line = format!("  {label} {} {}", outcome.barcode, outcome.kind);
            if !outcome.detail.is_empty() {
                line.push_str(": ");
                line.push_str(&outcome.detail);
            }
            lines.push(line);
        }
    }

    if report.cancelled {
        lines.push("Drain cancelled before the queue was exhausted".to_string());
    }
    lines
}

pub fn format_handled_line(barcode: &str, entry: Option<&HandledEntry>) -> String {
    match entry {
        Some(entry) if entry.remotely_synced => {
            format!(
                "{barcode}: handled, confirmed by ledger {}",
                format_timestamp(entry.updated_at)
            )
        }
        Some(entry) if entry.locally_completed => {
            format!("{barcode}: handled on this device, waiting for sync")
        }
        _ => format!("{barcode}: not handled"),
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |value| value.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}
