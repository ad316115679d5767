// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Normalized marketplace views joining ledger records with metadata.

use std::sync::Arc;

use alloy_primitives::Address;
use futures::future::join_all;
use tracing::warn;

use crate::{
    error::MarketError,
    gateway::{AuctionRecord, ListingRecord, MarketplaceContract},
    metadata::{resolve_metadata, MetadataDocument, MetadataFetcher},
};

/// A listing joined with its resolved metadata. All amounts are in decimal
/// display form; raw wei never leaves this boundary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NormalizedNft {
    pub token_id: u64,
    pub seller: Address,
    pub owner: Address,
    pub price: String,
    pub name: String,
    pub description: String,
    pub image: String,
}

/// An auction joined with its resolved metadata, amounts in decimal form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NormalizedAuction {
    pub token_id: u64,
    pub seller: Address,
    pub owner: Address,
    pub min_price: String,
    pub highest_bid: String,
    pub highest_bidder: Address,
    pub duration_secs: u64,
    pub started: bool,
    pub ended: bool,
    pub name: String,
    pub description: String,
    pub image: String,
}

/// The tokens owned by an account, in both market segments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OwnedNfts {
    pub listings: Vec<NormalizedNft>,
    pub auctions: Vec<NormalizedAuction>,
}

fn normalize_listing(record: ListingRecord, document: MetadataDocument) -> NormalizedNft {
    NormalizedNft {
        token_id: record.token_id,
        seller: record.seller,
        owner: record.owner,
        price: record.price.to_string(),
        name: document.name,
        description: document.description,
        image: document.img_url,
    }
}

fn normalize_auction(record: AuctionRecord, document: MetadataDocument) -> NormalizedAuction {
    NormalizedAuction {
        token_id: record.token_id,
        seller: record.seller,
        owner: record.owner,
        min_price: record.min_price.to_string(),
        highest_bid: record.highest_bid.to_string(),
        highest_bidder: record.highest_bidder,
        duration_secs: record.duration.as_secs(),
        started: record.started,
        ended: record.ended,
        name: document.name,
        description: document.description,
        image: document.img_url,
    }
}

/// Fetches and normalizes collections of listings, auctions and owned
/// tokens.
///
/// The views produced here are derived and transient: they are rebuilt on
/// every query and are never the source of truth.
pub struct MarketplaceQueryService<G, F> {
    gateway: Arc<G>,
    fetcher: Arc<F>,
}

impl<G: MarketplaceContract, F: MetadataFetcher> MarketplaceQueryService<G, F> {
    pub fn new(gateway: Arc<G>, fetcher: Arc<F>) -> Self {
        Self { gateway, fetcher }
    }

    /// Resolves the metadata for one token, substituting the placeholder on
    /// any failure so a batch never aborts on a single record.
    async fn resolve(&self, token_id: u64) -> MetadataDocument {
        match self.gateway.token_uri(token_id).await {
            Ok(uri) => resolve_metadata(self.fetcher.as_ref(), &uri)
                .await
                .into_document(),
            Err(error) => {
                warn!(token_id, %error, "token URI unavailable, substituting placeholder");
                MetadataDocument::placeholder()
            }
        }
    }

    /// All fixed-price listings, joined with their metadata.
    pub async fn list_all_listings(&self) -> Result<Vec<NormalizedNft>, MarketError> {
        let records = self.gateway.get_all_listings().await?;
        // Per-record resolutions run concurrently; `join_all` reassembles
        // them in ledger order.
        let documents = join_all(records.iter().map(|record| self.resolve(record.token_id))).await;
        Ok(records
            .into_iter()
            .zip(documents)
            .map(|(record, document)| normalize_listing(record, document))
            .collect())
    }

    /// All auctions, joined with their metadata. Auctions whose resolved
    /// image is empty are excluded.
    pub async fn list_all_auctions(&self) -> Result<Vec<NormalizedAuction>, MarketError> {
        let records = self.gateway.get_all_auctions().await?;
        let documents = join_all(records.iter().map(|record| self.resolve(record.token_id))).await;
        Ok(records
            .into_iter()
            .zip(documents)
            .map(|(record, document)| normalize_auction(record, document))
            .filter(|auction| !auction.image.is_empty())
            .collect())
    }

    /// The tokens the given account owns or sells, in both segments.
    pub async fn list_owned(&self, owner: Address) -> Result<OwnedNfts, MarketError> {
        let (listings, auctions) = self.gateway.get_my_nfts(owner).await?;
        let listing_documents =
            join_all(listings.iter().map(|record| self.resolve(record.token_id))).await;
        let auction_documents =
            join_all(auctions.iter().map(|record| self.resolve(record.token_id))).await;
        Ok(OwnedNfts {
            listings: listings
                .into_iter()
                .zip(listing_documents)
                .map(|(record, document)| normalize_listing(record, document))
                .collect(),
            auctions: auctions
                .into_iter()
                .zip(auction_documents)
                .map(|(record, document)| normalize_auction(record, document))
                .collect(),
        })
    }
}
