// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The auction workflow state machine.

use std::{collections::HashMap, sync::Arc};

use async_lock::Mutex;
use bidsea_base::{Amount, TimeDelta};
use tracing::{info, warn};

use crate::{
    error::{MarketError, RevertReason},
    gateway::{
        minted_token_id, AuctionRecord, MarketplaceContract, TransactionHandle, TransactionOutcome,
    },
    metadata::MetadataDocument,
    storage::{ContentStore, MetadataPublisher},
    wallet::SigningHandle,
};

/// The inputs to [`AuctionWorkflow::create`].
#[derive(Clone, Debug)]
pub struct CreateAuctionRequest {
    pub image: Vec<u8>,
    pub image_name: String,
    pub name: String,
    pub description: String,
    /// The minimum price as a decimal ether string.
    pub min_price: String,
    /// The auction duration, in days.
    pub duration_days: u64,
}

impl CreateAuctionRequest {
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
        if self.min_price.is_empty() {
            return Err(MarketError::IncompleteInput("minimum price"));
        }
        Ok(())
    }
}

/// Drives one auction per token through `Created → Started → (Bid)* → Ended`.
///
/// Every transition follows the same shape: validate, convert amounts, sign,
/// submit, confirm, refresh. Transitions are strictly sequential; the caller
/// must not invoke the workflow again for the same token while a prior
/// invocation is pending.
pub struct AuctionWorkflow<G, S> {
    gateway: Arc<G>,
    publisher: MetadataPublisher<S>,
    records: Mutex<HashMap<u64, AuctionRecord>>,
}

impl<G: MarketplaceContract, S: ContentStore> AuctionWorkflow<G, S> {
    pub fn new(gateway: Arc<G>, publisher: MetadataPublisher<S>) -> Self {
        Self {
            gateway,
            publisher,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// The auction record backing the transition guards, cached per token.
    async fn record(&self, token_id: u64) -> Result<AuctionRecord, MarketError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get(&token_id) {
            return Ok(record.clone());
        }
        let record = self.gateway.get_auction(token_id).await?;
        records.insert(token_id, record.clone());
        Ok(record)
    }

    async fn forget(&self, token_id: u64) {
        self.records.lock().await.remove(&token_id);
    }

    /// Drops any cached record and re-reads the auction, so reads after a
    /// transition are never stale.
    pub async fn refresh(&self, token_id: u64) -> Result<AuctionRecord, MarketError> {
        self.forget(token_id).await;
        self.record(token_id).await
    }

    async fn confirm(
        &self,
        handle: &TransactionHandle,
        action: &str,
    ) -> Result<TransactionOutcome, MarketError> {
        let outcome = self.gateway.await_confirmation(handle).await?;
        if !outcome.success {
            warn!(action, "auction transaction failed");
            return Err(MarketError::TransactionReverted(RevertReason::Other(
                format!("{action} transaction failed"),
            )));
        }
        Ok(outcome)
    }

    /// Publishes the asset and metadata and mints an unstarted auction,
    /// returning the new token id.
    ///
    /// The wallet balance is checked against the auction fee before any
    /// signature, so an underfunded account never reaches the prompt.
    pub async fn create(
        &self,
        signer: &SigningHandle,
        request: CreateAuctionRequest,
    ) -> Result<u64, MarketError> {
        request.validate()?;
        let min_price: Amount = request.min_price.parse()?;
        let duration = TimeDelta::from_days(request.duration_days);
        if min_price.is_zero() {
            return Err(MarketError::InvalidParameters(
                "minimum price must be positive",
            ));
        }
        if duration.is_zero() {
            return Err(MarketError::InvalidParameters("duration must be positive"));
        }

        let img_url = self
            .publisher
            .publish_asset(request.image, &request.image_name)
            .await?;
        let document = MetadataDocument {
            name: request.name,
            description: request.description,
            img_url,
            price: Some(request.min_price.clone()),
        };
        let uri = self.publisher.publish_metadata(&document).await?;

        let fee = self.gateway.auction_fee().await?;
        let balance = self.gateway.balance_of(signer.address()).await?;
        if balance < fee {
            return Err(MarketError::TransactionReverted(
                RevertReason::InsufficientFunds,
            ));
        }

        let handle = self
            .gateway
            .create_auction(signer, &uri, min_price, duration, fee)
            .await?;
        let outcome = self.confirm(&handle, "auction creation").await?;
        let token_id = minted_token_id(&outcome).ok_or(
            crate::gateway::DecodingError::Inconsistent("confirmed mint carries no transfer log"),
        )?;
        info!(token_id, "auction created");
        Ok(token_id)
    }

    /// Starts an unstarted auction. Only the seller may start.
    pub async fn start(
        &self,
        signer: &SigningHandle,
        token_id: u64,
    ) -> Result<AuctionRecord, MarketError> {
        let record = self.record(token_id).await?;
        if record.seller != signer.address() {
            return Err(MarketError::Unauthorized(
                "start an auction created by another account",
            ));
        }
        if record.started {
            return Err(MarketError::InvalidParameters(
                "auction has already started",
            ));
        }
        if record.min_price.is_zero() || record.duration.is_zero() {
            return Err(MarketError::InvalidParameters(
                "auction has no minimum price or duration",
            ));
        }
        let handle = self
            .gateway
            .start_auction(signer, token_id, record.min_price, record.duration)
            .await?;
        self.confirm(&handle, "auction start").await?;
        info!(token_id, "auction started");
        self.refresh(token_id).await
    }

    /// Places a bid. Only non-sellers may bid, and a bid is accepted only if
    /// it exceeds both the minimum price and the current highest bid.
    pub async fn bid(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        amount: &str,
    ) -> Result<AuctionRecord, MarketError> {
        let bid: Amount = amount.parse()?;
        let record = self.record(token_id).await?;
        if record.seller == signer.address() {
            return Err(MarketError::Unauthorized("bid on your own auction"));
        }
        if !record.started || record.ended {
            return Err(MarketError::InvalidParameters(
                "auction is not open for bids",
            ));
        }
        let floor = record.min_price.max(record.highest_bid);
        if bid <= floor {
            return Err(MarketError::TransactionReverted(RevertReason::BidTooLow));
        }
        // The contract refunds the displaced highest bidder out of escrow;
        // this layer only observes the new highest bid on refresh.
        let handle = self.gateway.place_bid(signer, token_id, bid).await?;
        self.confirm(&handle, "bid").await?;
        info!(token_id, %bid, "bid placed");
        self.refresh(token_id).await
    }

    /// Ends a started auction, transferring ownership to the highest bidder
    /// if one exists.
    ///
    /// Any party may settle an endable auction; the contract enforces that
    /// the duration has elapsed and the premature case surfaces as
    /// [`RevertReason::AuctionNotEndable`].
    pub async fn end(
        &self,
        signer: &SigningHandle,
        token_id: u64,
    ) -> Result<AuctionRecord, MarketError> {
        let record = self.record(token_id).await?;
        if !record.started || record.ended {
            return Err(MarketError::TransactionReverted(
                RevertReason::AuctionNotEndable,
            ));
        }
        let handle = self.gateway.end_auction(signer, token_id).await?;
        self.confirm(&handle, "auction end").await?;
        info!(token_id, "auction ended");
        self.refresh(token_id).await
    }
}
