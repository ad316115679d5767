// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Publication of assets and metadata to content-addressed storage.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::{config::StorageConfig, error::MarketError, metadata::MetadataDocument};

/// A failed upload to the content store.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("storage provider responded {status}: {body}")]
    Provider { status: u16, body: String },

    /// The provider's response could not be interpreted.
    #[error("malformed provider response: {0}")]
    Json(#[from] serde_json::Error),
}

/// A content-addressed store for binary assets and JSON documents.
///
/// Identifiers are assigned by the provider; identical content is not
/// guaranteed to map to the same identifier across uploads.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Uploads a binary asset, returning its content identifier.
    async fn upload_asset(&self, bytes: Vec<u8>, name: &str) -> Result<String, UploadError>;

    /// Uploads a JSON document, returning its content identifier.
    async fn upload_json(&self, document: &Value) -> Result<String, UploadError>;

    /// Resolves a content identifier to a fetchable gateway URI.
    fn resolve(&self, id: &str) -> String;
}

#[async_trait]
impl<S: ContentStore + ?Sized> ContentStore for std::sync::Arc<S> {
    async fn upload_asset(&self, bytes: Vec<u8>, name: &str) -> Result<String, UploadError> {
        (**self).upload_asset(bytes, name).await
    }

    async fn upload_json(&self, document: &Value) -> Result<String, UploadError> {
        (**self).upload_json(document).await
    }

    fn resolve(&self, id: &str) -> String {
        (**self).resolve(id)
    }
}

/// A Pinata-style pinning service.
pub struct PinataStore {
    api_url: String,
    gateway_url: String,
    jwt: Option<String>,
    client: reqwest::Client,
}

impl PinataStore {
    pub fn new(config: &StorageConfig) -> Self {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            jwt: config.jwt.clone(),
            client,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.jwt {
            Some(jwt) => request.bearer_auth(jwt),
            None => request,
        }
    }

    async fn extract_hash(response: reqwest::Response) -> Result<String, UploadError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        let value: Value = response.json().await?;
        value
            .get("IpfsHash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| UploadError::Provider {
                status: status.as_u16(),
                body: "response carries no IpfsHash".to_string(),
            })
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    async fn upload_asset(&self, bytes: Vec<u8>, name: &str) -> Result<String, UploadError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .authorize(self.client.post(format!("{}/pinning/pinFileToIPFS", self.api_url)))
            .multipart(form)
            .send()
            .await?;
        Self::extract_hash(response).await
    }

    async fn upload_json(&self, document: &Value) -> Result<String, UploadError> {
        let response = self
            .authorize(self.client.post(format!("{}/pinning/pinJSONToIPFS", self.api_url)))
            .json(&json!({ "pinataContent": document }))
            .send()
            .await?;
        Self::extract_hash(response).await
    }

    fn resolve(&self, id: &str) -> String {
        format!("{}/ipfs/{}", self.gateway_url, id)
    }
}

/// Publishes an asset, then the metadata document referencing it.
///
/// Each call is a single logical upload and is never retried automatically:
/// the store may assign a fresh identifier to identical content, so a
/// resubmission after an ambiguous failure must be confirmed by the user.
pub struct MetadataPublisher<S> {
    store: S,
}

impl<S: ContentStore> MetadataPublisher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Uploads the binary asset and returns its resolvable URI.
    pub async fn publish_asset(&self, bytes: Vec<u8>, name: &str) -> Result<String, MarketError> {
        let id = self.store.upload_asset(bytes, name).await?;
        let uri = self.store.resolve(&id);
        info!(%uri, "asset published");
        Ok(uri)
    }

    /// Uploads the metadata document and returns its resolvable URI.
    pub async fn publish_metadata(&self, document: &MetadataDocument) -> Result<String, MarketError> {
        let value = serde_json::to_value(document).map_err(UploadError::from)?;
        let id = self.store.upload_json(&value).await?;
        let uri = self.store.resolve(&id);
        info!(%uri, "metadata published");
        Ok(uri)
    }
}
