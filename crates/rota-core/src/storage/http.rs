//! Supabase-style storage REST client for delivery photos.
//!
//! Objects are written with `x-upsert: true`, so re-uploading a photo under
//! the same name replaces it. The returned reference is the public URL.

use crate::config::RemoteConfig;
use crate::models::RemoteRef;
use crate::util::compact_text;
use crate::{Error, Result};

use super::{classify_status, AssetError, AssetStore};

/// HTTP client for the ledger's object storage.
#[derive(Debug, Clone)]
pub struct HttpAssetStore {
    base_url: String,
    bucket: String,
    api_key: String,
    bearer: String,
    client: reqwest::Client,
}

impl HttpAssetStore {
    /// Builds a client from remote configuration.
    ///
    /// `access_token` is the courier session token; without one the API key
    /// is used as the bearer.
    pub fn new(config: &RemoteConfig, access_token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| {
                Error::InvalidInput(format!("Failed to construct HTTP client: {error}"))
            })?;
        Ok(Self {
            base_url: config.ledger_url.clone(),
            bucket: config.asset_bucket.clone(),
            api_key: config.api_key.clone(),
            bearer: access_token.unwrap_or(&config.api_key).to_string(),
            client,
        })
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(name)
        )
    }

    /// Public URL for an object in the configured bucket.
    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(name)
        )
    }
}

impl AssetStore for HttpAssetStore {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<RemoteRef, AssetError> {
        let name = name.trim().trim_matches('/');
        if name.is_empty() {
            return Err(AssetError::Encoding(
                "Photo object name cannot be empty".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.object_url(name))
            .bearer_auth(&self.bearer)
            .header("apikey", &self.api_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|error| {
                AssetError::NetworkUnavailable(format!("Upload request failed: {error}"))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, compact_text(&body)));
        }

        Ok(RemoteRef(self.public_url(name)))
    }
}

fn encode_path(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
