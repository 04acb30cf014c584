//! Cloudflare R2 photo backend.

use std::env;

use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;

use super::{classify_status, AssetError, AssetStore};
use crate::models::RemoteRef;
use crate::util::is_http_url;
use crate::{Error, Result};

const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
const ENV_PUBLIC_BASE_URL: &str = "R2_PUBLIC_BASE_URL";

/// Cloudflare R2 configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct R2Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// R2 bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
    /// Optional public URL base for serving photos.
    pub public_base_url: Option<String>,
}

impl R2Config {
    /// Load R2 configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no R2 variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// Cloudflare R2 S3-compatible endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// Photo store writing to an R2 bucket through the S3 API.
#[derive(Clone, Debug)]
pub struct R2AssetStore {
    config: R2Config,
    client: Client,
}

impl R2AssetStore {
    #[must_use]
    pub fn new(config: R2Config) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }

    #[must_use]
    pub const fn config(&self) -> &R2Config {
        &self.config
    }

    /// Reference stored on the record for an uploaded object.
    ///
    /// A public URL when a base is configured, otherwise an `r2://` locator.
    #[must_use]
    pub fn object_ref(&self, object_key: &str) -> RemoteRef {
        let key = object_key.trim_matches('/');
        let value = self.config.public_base_url.as_ref().map_or_else(
            || format!("r2://{}/{key}", self.config.bucket),
            |base| format!("{base}/{key}"),
        );
        RemoteRef(value)
    }
}

impl AssetStore for R2AssetStore {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<RemoteRef, AssetError> {
        let object_key = normalize_object_key(name)?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = normalize_content_type(Some(content_type)) {
            request = request.content_type(content_type);
        }

        request.send().await.map_err(|error| {
            let status = error.raw_response().map(|response| response.status().as_u16());
            classify_put_failure(
                status,
                format!(
                    "R2 put_object failed for {}/{object_key}: {error}",
                    self.config.bucket
                ),
            )
        })?;

        tracing::debug!("Uploaded {object_key} to R2 bucket {}", self.config.bucket);
        Ok(self.object_ref(&object_key))
    }
}

/// Failures without an HTTP response (DNS, TLS, timeouts) are transport
/// errors and stay retryable.
fn classify_put_failure(status: Option<u16>, detail: String) -> AssetError {
    match status {
        Some(status) => classify_status(status, detail),
        None => AssetError::NetworkUnavailable(detail),
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<R2Config>> {
    let read = |key: &str| lookup(key).map(|value| value.trim().to_string());
    let account_id = read(ENV_ACCOUNT_ID);
    let bucket = read(ENV_BUCKET);
    let access_key_id = read(ENV_ACCESS_KEY_ID);
    let secret_access_key = read(ENV_SECRET_ACCESS_KEY);
    let public_base_url = read(ENV_PUBLIC_BASE_URL);

    let any_present = account_id.is_some()
        || bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some()
        || public_base_url.is_some();

    if !any_present {
        return Ok(None);
    }

    let present = |value: Option<String>| value.filter(|value| !value.is_empty());
    match (
        present(account_id),
        present(bucket),
        present(access_key_id),
        present(secret_access_key),
    ) {
        (Some(account_id), Some(bucket), Some(access_key_id), Some(secret_access_key)) => {
            Ok(Some(R2Config {
                account_id,
                bucket,
                access_key_id,
                secret_access_key,
                public_base_url: normalize_public_base_url(public_base_url)?,
            }))
        }
        (account_id, bucket, access_key_id, secret_access_key) => {
            let missing: Vec<&str> = [
                (ENV_ACCOUNT_ID, account_id.is_none()),
                (ENV_BUCKET, bucket.is_none()),
                (ENV_ACCESS_KEY_ID, access_key_id.is_none()),
                (ENV_SECRET_ACCESS_KEY, secret_access_key.is_none()),
            ]
            .into_iter()
            .filter_map(|(key, is_missing)| is_missing.then_some(key))
            .collect();
            Err(Error::InvalidInput(format!(
                "R2 configuration is incomplete. Missing: {}",
                missing.join(", ")
            )))
        }
    }
}

fn build_s3_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "rota-core-r2-storage",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

fn normalize_object_key(object_key: &str) -> std::result::Result<String, AssetError> {
    let object_key = object_key.trim().trim_matches('/').to_string();
    if object_key.is_empty() {
        return Err(AssetError::Encoding(
            "Photo object key cannot be empty".to_string(),
        ));
    }
    Ok(object_key)
}

fn normalize_content_type(content_type: Option<&str>) -> Option<String> {
    content_type
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn normalize_public_base_url(public_base_url: Option<String>) -> Result<Option<String>> {
    let Some(value) = public_base_url else {
        return Ok(None);
    };

    if value.is_empty() {
        return Ok(None);
    }
    if !is_http_url(&value) {
        return Err(Error::InvalidInput(
            "R2_PUBLIC_BASE_URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(Some(value.trim_end_matches('/').to_string()))
}
