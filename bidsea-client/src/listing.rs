// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The fixed-price listing workflow.

use std::sync::Arc;

use async_lock::Mutex;
use bidsea_base::Amount;
use tracing::{debug, info, warn};

use crate::{
    error::{MarketError, RevertReason},
    gateway::{minted_token_id, MarketplaceContract},
    metadata::MetadataDocument,
    storage::{ContentStore, MetadataPublisher},
    wallet::SigningHandle,
};

/// The steps of the listing workflow, in submission order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListingState {
    Idle,
    Uploading,
    PublishingMetadata,
    QueryingFee,
    AwaitingSignature,
    Confirming,
    Done,
    Failed,
}

/// The inputs to [`ListingWorkflow::list`].
#[derive(Clone, Debug)]
pub struct ListingRequest {
    /// The raw image bytes.
    pub image: Vec<u8>,
    /// The file name reported to the content store.
    pub image_name: String,
    pub name: String,
    pub description: String,
    /// The ask price as a decimal ether string.
    pub price: String,
}

impl ListingRequest {
    fn validate(&self) -> Result<(), MarketError> {
        if self.image.is_empty() {
            return Err(MarketError::IncompleteInput("image"));
        }
        if self.name.is_empty() {
            return Err(MarketError::IncompleteInput("name"));
        }
        if self.description.is_empty() {
            return Err(MarketError::IncompleteInput("description"));
        }
        if self.price.is_empty() {
            return Err(MarketError::IncompleteInput("price"));
        }
        Ok(())
    }
}

/// Lists an NFT for a fixed price, or buys a listed one.
///
/// The workflow is strictly sequential: no step begins before the previous
/// one settles. It halts at the failing step; off-chain uploads performed by
/// earlier steps are not rolled back (content-addressed storage is not
/// revocable, an orphaned document is an accepted cost). A workflow instance
/// must not be re-invoked while a prior invocation is pending; the caller is
/// responsible for disabling re-entry.
pub struct ListingWorkflow<G, S> {
    gateway: Arc<G>,
    publisher: MetadataPublisher<S>,
    state: Mutex<ListingState>,
}

impl<G: MarketplaceContract, S: ContentStore> ListingWorkflow<G, S> {
    pub fn new(gateway: Arc<G>, publisher: MetadataPublisher<S>) -> Self {
        Self {
            gateway,
            publisher,
            state: Mutex::new(ListingState::Idle),
        }
    }

    /// The step the workflow last reached.
    pub async fn state(&self) -> ListingState {
        *self.state.lock().await
    }

    async fn advance(&self, state: ListingState) {
        debug!(?state, "listing workflow");
        *self.state.lock().await = state;
    }

    /// Publishes the asset and metadata, pays the listing fee and mints the
    /// listed token, returning its id.
    pub async fn list(
        &self,
        signer: &SigningHandle,
        request: ListingRequest,
    ) -> Result<u64, MarketError> {
        match self.try_list(signer, request).await {
            Ok(token_id) => {
                self.advance(ListingState::Done).await;
                Ok(token_id)
            }
            Err(error) => {
                warn!(%error, "listing failed");
                self.advance(ListingState::Failed).await;
                Err(error)
            }
        }
    }

    async fn try_list(
        &self,
        signer: &SigningHandle,
        request: ListingRequest,
    ) -> Result<u64, MarketError> {
        // Validation happens before any external call.
        request.validate()?;
        let price: Amount = request.price.parse()?;
        if price.is_zero() {
            return Err(MarketError::InvalidParameters("price must be positive"));
        }

        self.advance(ListingState::Uploading).await;
        let img_url = self
            .publisher
            .publish_asset(request.image, &request.image_name)
            .await?;

        self.advance(ListingState::PublishingMetadata).await;
        let document = MetadataDocument {
            name: request.name,
            description: request.description,
            img_url,
            price: Some(request.price.clone()),
        };
        let uri = self.publisher.publish_metadata(&document).await?;

        self.advance(ListingState::QueryingFee).await;
        let fee = self.gateway.listing_fee().await?;

        self.advance(ListingState::AwaitingSignature).await;
        let handle = self.gateway.create_listing(signer, &uri, price, fee).await?;

        self.advance(ListingState::Confirming).await;
        let outcome = self.gateway.await_confirmation(&handle).await?;
        if !outcome.success {
            return Err(MarketError::TransactionReverted(RevertReason::Other(
                "listing transaction failed".to_string(),
            )));
        }
        let token_id = minted_token_id(&outcome).ok_or(crate::gateway::DecodingError::Inconsistent(
            "confirmed mint carries no transfer log",
        ))?;
        info!(token_id, "NFT listed");
        Ok(token_id)
    }

    /// Buys a listed token at its ask price.
    pub async fn buy(&self, signer: &SigningHandle, token_id: u64) -> Result<(), MarketError> {
        let listing = self.gateway.get_listing(token_id).await?;
        let handle = self.gateway.buy(signer, token_id, listing.price).await?;
        let outcome = self.gateway.await_confirmation(&handle).await?;
        if !outcome.success {
            return Err(MarketError::TransactionReverted(RevertReason::Other(
                "sale transaction failed".to_string(),
            )));
        }
        info!(token_id, "NFT purchased");
        Ok(())
    }
}
