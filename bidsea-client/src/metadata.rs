// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Off-chain metadata documents and their best-effort resolution.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// The JSON document published alongside each token.
///
/// A denormalized, write-once copy of the listing attributes, addressed by
/// the token's metadata URI.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct MetadataDocument {
    pub name: String,
    pub description: String,
    #[serde(rename = "imgUrl")]
    pub img_url: String,
    /// The ask or minimum price as a decimal string, if the publisher chose
    /// to denormalize it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

impl MetadataDocument {
    /// The placeholder substituted when a document cannot be resolved.
    pub fn placeholder() -> Self {
        Self {
            name: "Unknown".to_string(),
            description: "No metadata available".to_string(),
            img_url: String::new(),
            price: None,
        }
    }
}

/// A failed metadata fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a usable document.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server responded {0}")]
    Status(u16),

    /// The response body is not a metadata document.
    #[error("document is not valid JSON: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Fetches metadata documents by URI.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<MetadataDocument, FetchError>;
}

/// Fetches metadata documents over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataFetcher for HttpFetcher {
    async fn fetch(&self, uri: &str) -> Result<MetadataDocument, FetchError> {
        let response = self.client.get(uri).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

/// The outcome of a best-effort metadata resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResolvedMetadata {
    /// The document was fetched and decoded.
    Resolved(MetadataDocument),
    /// The document was unreachable; the placeholder stands in.
    Fallback,
}

impl ResolvedMetadata {
    /// The resolved document, or the placeholder.
    pub fn into_document(self) -> MetadataDocument {
        match self {
            ResolvedMetadata::Resolved(document) => document,
            ResolvedMetadata::Fallback => MetadataDocument::placeholder(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ResolvedMetadata::Fallback)
    }
}

/// Resolves `uri` against `fetcher`.
///
/// Resolution failures never abort a batch: any error is recovered into
/// [`ResolvedMetadata::Fallback`] here and goes no further.
pub async fn resolve_metadata<F: MetadataFetcher + ?Sized>(
    fetcher: &F,
    uri: &str,
) -> ResolvedMetadata {
    match fetcher.fetch(uri).await {
        Ok(document) => ResolvedMetadata::Resolved(document),
        Err(error) => {
            warn!(%uri, %error, "metadata unresolvable, substituting placeholder");
            ResolvedMetadata::Fallback
        }
    }
}
