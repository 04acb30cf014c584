//! Runtime configuration.
//!
//! `SyncSettings` tunes the queue and drain loop and can be loaded from a
//! JSON file. `RemoteConfig` and `CourierIdentity` come from the environment
//! and describe where the ledger lives and who is talking to it.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::DEFAULT_BARCODE_PATTERN;
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const ENV_LEDGER_URL: &str = "ROTA_LEDGER_URL";
const ENV_LEDGER_API_KEY: &str = "ROTA_LEDGER_API_KEY";
const ENV_LEDGER_TABLE: &str = "ROTA_LEDGER_TABLE";
const ENV_ASSET_BUCKET: &str = "ROTA_ASSET_BUCKET";
const ENV_COURIER_ID: &str = "ROTA_COURIER_ID";
const ENV_ACCESS_TOKEN: &str = "ROTA_ACCESS_TOKEN";

const DEFAULT_LEDGER_TABLE: &str = "pedidos";
const DEFAULT_ASSET_BUCKET: &str = "imagens-entregas";

/// Queue and drain tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Retry-later outcomes tolerated before a record is marked failed.
    pub max_attempts: u32,
    /// First backoff delay in milliseconds; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub backoff_max_ms: u64,
    /// Barcodes drained concurrently.
    pub max_workers: usize,
    /// Queue capacity; appends past it fail with `StorageError::Full`.
    pub max_queue_len: usize,
    /// Largest photo accepted for upload.
    pub max_photo_bytes: u64,
    /// Regex a normalized barcode must match.
    pub barcode_pattern: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 2_000,
            backoff_max_ms: 300_000,
            max_workers: 4,
            max_queue_len: 10_000,
            max_photo_bytes: 10 * 1024 * 1024,
            barcode_pattern: DEFAULT_BARCODE_PATTERN.to_string(),
        }
    }
}

impl SyncSettings {
    /// Load settings from a JSON file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(Error::InvalidInput(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(Error::InvalidInput(
                "backoff_max_ms must not be below backoff_base_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the remote ledger and its photo bucket live.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Project base URL, without trailing slash.
    pub ledger_url: String,
    pub api_key: String,
    /// Orders table name.
    pub table: String,
    /// Storage bucket for delivery photos.
    pub asset_bucket: String,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("ledger_url", &self.ledger_url)
            .field("api_key", &"[REDACTED]")
            .field("table", &self.table)
            .field("asset_bucket", &self.asset_bucket)
            .finish()
    }
}

impl RemoteConfig {
    /// Load remote configuration from environment variables.
    ///
    /// Returns `Ok(None)` when neither URL nor key is set, and an error when
    /// only one of them is.
    pub fn from_env() -> Result<Option<Self>> {
        parse_remote_config(|key| env::var(key).ok())
    }
}

/// The courier this device acts for.
#[derive(Clone, PartialEq, Eq)]
pub struct CourierIdentity {
    pub courier_id: String,
    /// Session token issued by the auth layer, used as the HTTP bearer.
    pub access_token: Option<String>,
}

impl std::fmt::Debug for CourierIdentity {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CourierIdentity")
            .field("courier_id", &self.courier_id)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl CourierIdentity {
    pub fn new(courier_id: impl Into<String>) -> Self {
        Self {
            courier_id: courier_id.into(),
            access_token: None,
        }
    }

    /// Load the courier identity from `ROTA_COURIER_ID` / `ROTA_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        parse_identity(|key| env::var(key).ok())
    }
}

fn parse_remote_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<RemoteConfig>> {
    let ledger_url = normalize_text_option(lookup(ENV_LEDGER_URL));
    let api_key = normalize_text_option(lookup(ENV_LEDGER_API_KEY));

    let (ledger_url, api_key) = match (ledger_url, api_key) {
        (None, None) => return Ok(None),
        (Some(url), Some(key)) => (url, key),
        (None, Some(_)) => {
            return Err(Error::InvalidInput(format!(
                "Remote configuration is incomplete. Missing: {ENV_LEDGER_URL}"
            )))
        }
        (Some(_), None) => {
            return Err(Error::InvalidInput(format!(
                "Remote configuration is incomplete. Missing: {ENV_LEDGER_API_KEY}"
            )))
        }
    };

    if !is_http_url(&ledger_url) {
        return Err(Error::InvalidInput(format!(
            "{ENV_LEDGER_URL} must start with http:// or https://"
        )));
    }

    Ok(Some(RemoteConfig {
        ledger_url: ledger_url.trim_end_matches('/').to_string(),
        api_key,
        table: normalize_text_option(lookup(ENV_LEDGER_TABLE))
            .unwrap_or_else(|| DEFAULT_LEDGER_TABLE.to_string()),
        asset_bucket: normalize_text_option(lookup(ENV_ASSET_BUCKET))
            .unwrap_or_else(|| DEFAULT_ASSET_BUCKET.to_string()),
    }))
}

fn parse_identity(lookup: impl Fn(&str) -> Option<String>) -> Result<CourierIdentity> {
    let courier_id = normalize_text_option(lookup(ENV_COURIER_ID))
        .ok_or_else(|| Error::InvalidInput(format!("{ENV_COURIER_ID} is not set")))?;
    Ok(CourierIdentity {
        courier_id,
        access_token: normalize_text_option(lookup(ENV_ACCESS_TOKEN)),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pretty_assertions::assert_eq;

    fn remote_from_map(map: &HashMap<&str, &str>) -> Result<Option<RemoteConfig>> {
        parse_remote_config(|key| map.get(key).map(ToString::to_string))
    }

    #[test]
    fn settings_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.max_workers, 4);
        assert_eq!(settings.barcode_pattern, DEFAULT_BARCODE_PATTERN);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn settings_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "max_attempts": 2, "max_workers": 1 }"#).unwrap();

        let settings = SyncSettings::load(&path).unwrap();
        assert_eq!(settings.max_attempts, 2);
        assert_eq!(settings.max_workers, 1);
        assert_eq!(settings.backoff_base_ms, 2_000);
    }

    #[test]
    fn settings_reject_zero_workers() {
        let settings = SyncSettings {
            max_workers: 0,
            ..SyncSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn remote_config_absent_when_unset() {
        assert!(remote_from_map(&HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn remote_config_applies_defaults_and_trims_url() {
        let mut map = HashMap::new();
        map.insert(ENV_LEDGER_URL, "https://ledger.example.com/");
        map.insert(ENV_LEDGER_API_KEY, "anon");

        let config = remote_from_map(&map).unwrap().unwrap();
        assert_eq!(config.ledger_url, "https://ledger.example.com");
        assert_eq!(config.table, "pedidos");
        assert_eq!(config.asset_bucket, "imagens-entregas");
    }

    #[test]
    fn remote_config_rejects_partial_and_bad_scheme() {
        let mut map = HashMap::new();
        map.insert(ENV_LEDGER_URL, "https://ledger.example.com");
        let err = remote_from_map(&map).unwrap_err();
        assert!(err.to_string().contains(ENV_LEDGER_API_KEY));

        map.insert(ENV_LEDGER_API_KEY, "anon");
        map.insert(ENV_LEDGER_URL, "ledger.example.com");
        assert!(matches!(
            remote_from_map(&map),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn identity_debug_redacts_token() {
        let mut map = HashMap::new();
        map.insert(ENV_COURIER_ID, "courier-7");
        map.insert(ENV_ACCESS_TOKEN, "secret-token");

        let identity = parse_identity(|key| map.get(key).map(ToString::to_string)).unwrap();
        assert_eq!(identity.access_token.as_deref(), Some("secret-token"));
        let debug = format!("{identity:?}");
        assert!(debug.contains("courier-7"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn identity_requires_courier_id() {
        assert!(parse_identity(|_| None).is_err());
    }
}
