// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end workflow tests against the in-memory doubles.

use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::Result;
use assert_matches::assert_matches;
use bidsea_base::{Amount, TimeDelta};
use bidsea_client::{
    auction::{AuctionWorkflow, CreateAuctionRequest},
    config::ChainConfig,
    error::{MarketError, RevertReason},
    gateway::MarketplaceContract,
    listing::{ListingRequest, ListingState, ListingWorkflow},
    metadata::MetadataDocument,
    query::MarketplaceQueryService,
    storage::MetadataPublisher,
    test_utils::{MemoryStore, StaticFetcher, TestChain, TestWallet},
    wallet::{SigningHandle, WalletSession},
};

const SELLER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
const BUYER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
const BIDDER: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";

async fn signer_for(account: &str) -> (Arc<WalletSession<TestWallet>>, SigningHandle) {
    let wallet = Arc::new(TestWallet::new("0x7a69", vec![account]));
    let session = WalletSession::new(wallet, &ChainConfig::default());
    session.connect().await.unwrap();
    let signer = session.signer().await.unwrap();
    (session, signer)
}

fn listing_request(name: &str, price: &str) -> ListingRequest {
    ListingRequest {
        image: vec![1, 2, 3],
        image_name: "token.png".to_string(),
        name: name.to_string(),
        description: format!("{name} description"),
        price: price.to_string(),
    }
}

fn auction_request(name: &str, min_price: &str, duration_days: u64) -> CreateAuctionRequest {
    CreateAuctionRequest {
        image: vec![4, 5, 6],
        image_name: "token.png".to_string(),
        name: name.to_string(),
        description: format!("{name} description"),
        min_price: min_price.to_string(),
        duration_days,
    }
}

#[tokio::test]
async fn list_nft_round_trips_price() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = ListingWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_session, seller) = signer_for(SELLER).await;

    let token_id = workflow.list(&seller, listing_request("Ape", "1.5")).await?;
    assert_eq!(workflow.state().await, ListingState::Done);

    let record = chain.get_listing(token_id).await?;
    assert_eq!(record.price, "1.5".parse::<Amount>()?);
    assert_eq!(record.price.as_wei(), 1_500_000_000_000_000_000);
    assert_eq!(record.seller, seller.address());
    assert_eq!(record.owner, seller.address());

    let queries = MarketplaceQueryService::new(chain.clone(), store.clone());
    let listings = queries.list_all_listings().await?;
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].token_id, token_id);
    assert_eq!(listings[0].price, "1.5");
    assert_eq!(listings[0].name, "Ape");
    assert_eq!(listings[0].description, "Ape description");
    assert!(!listings[0].image.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn auction_bids_enforce_strict_increase() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = AuctionWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_s1, seller) = signer_for(SELLER).await;
    let (_s2, buyer) = signer_for(BUYER).await;
    let (_s3, bidder) = signer_for(BIDDER).await;

    chain.fund(seller.address(), Amount::from_tokens(1)).await;
    let token_id = workflow
        .create(&seller, auction_request("Mona", "1.0", 1))
        .await?;
    workflow.start(&seller, token_id).await?;

    // A bid equal to the minimum price is not strictly above it.
    assert_matches!(
        workflow.bid(&buyer, token_id, "1.0").await,
        Err(MarketError::TransactionReverted(RevertReason::BidTooLow))
    );
    let record = workflow.bid(&buyer, token_id, "1.1").await?;
    assert_eq!(record.highest_bid, "1.1".parse::<Amount>()?);
    assert_matches!(
        workflow.bid(&bidder, token_id, "1.05").await,
        Err(MarketError::TransactionReverted(RevertReason::BidTooLow))
    );
    let record = workflow.bid(&bidder, token_id, "1.2").await?;
    assert_eq!(record.highest_bid, "1.2".parse::<Amount>()?);
    assert_eq!(record.highest_bidder, bidder.address());

    // The displaced bidder's escrow was refunded by the contract.
    let expected: Vec<(Address, Amount)> = vec![(buyer.address(), "1.1".parse()?)];
    assert_eq!(chain.refunds().await, expected);
    Ok(())
}

#[tokio::test]
async fn connect_rejects_chain_mismatch() {
    let wallet = Arc::new(TestWallet::new("0x1", vec![SELLER]).deny_switch());
    let session = WalletSession::new(wallet.clone(), &ChainConfig::default());

    assert_matches!(
        session.connect().await,
        Err(MarketError::ChainMismatch { expected, actual })
            if expected == "0x7a69" && actual == "0x1"
    );
    // Nothing further was attempted after the mismatch.
    let requests = wallet.requests().await;
    assert!(!requests.contains(&"eth_requestAccounts".to_string()));
    assert!(!session.is_connected().await);
}

#[tokio::test]
async fn connect_switches_chain_when_possible() -> Result<()> {
    let wallet = Arc::new(TestWallet::new("0x1", vec![SELLER]));
    let session = WalletSession::new(wallet, &ChainConfig::default());

    let info = session.connect().await?;
    assert_eq!(info.chain_id, "0x7a69");
    assert_eq!(info.address, SELLER.parse::<Address>()?);
    assert_eq!(session.address().await, Some(info.address));
    Ok(())
}

#[tokio::test]
async fn init_restores_connection_silently() -> Result<()> {
    let wallet = Arc::new(TestWallet::new("0x7a69", vec![SELLER]));
    let session = WalletSession::new(wallet.clone(), &ChainConfig::default());

    let info = session.init().await?.expect("account already exposed");
    assert_eq!(info.address, SELLER.parse::<Address>()?);
    assert!(session.is_connected().await);
    // Restoring never prompts the wallet.
    assert!(!wallet
        .requests()
        .await
        .contains(&"eth_requestAccounts".to_string()));

    let bare = Arc::new(TestWallet::new("0x7a69", vec![]));
    let session = WalletSession::new(bare, &ChainConfig::default());
    assert_eq!(session.init().await?, None);
    assert!(!session.is_connected().await);
    Ok(())
}

#[tokio::test]
async fn connect_surfaces_user_rejection() {
    let wallet = Arc::new(TestWallet::new("0x7a69", vec![SELLER]).deny_accounts());
    let session = WalletSession::new(wallet, &ChainConfig::default());
    assert_matches!(session.connect().await, Err(MarketError::UserRejected));
}

#[tokio::test]
async fn batch_resolution_substitutes_placeholders() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = ListingWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_session, seller) = signer_for(SELLER).await;

    let first = workflow.list(&seller, listing_request("A", "1.0")).await?;
    let second = workflow.list(&seller, listing_request("B", "2.0")).await?;
    let third = workflow.list(&seller, listing_request("C", "3.0")).await?;

    // Make one document unreachable; the batch must still return all three.
    let uri = chain.token_uri(second).await?;
    assert!(store.remove(&uri).await);

    let queries = MarketplaceQueryService::new(chain.clone(), store.clone());
    let listings = queries.list_all_listings().await?;
    assert_eq!(listings.len(), 3);
    assert_eq!(
        listings.iter().map(|item| item.token_id).collect::<Vec<_>>(),
        vec![first, second, third]
    );

    let broken = &listings[1];
    assert_eq!(broken.name, "Unknown");
    assert_eq!(broken.description, "No metadata available");
    assert!(broken.image.is_empty());
    assert_eq!(listings[0].name, "A");
    assert_eq!(listings[2].name, "C");
    Ok(())
}

#[tokio::test]
async fn requery_is_idempotent() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = ListingWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_session, seller) = signer_for(SELLER).await;

    workflow.list(&seller, listing_request("A", "1.0")).await?;
    workflow.list(&seller, listing_request("B", "0.25")).await?;

    let queries = MarketplaceQueryService::new(chain.clone(), store.clone());
    let first = queries.list_all_listings().await?;
    let second = queries.list_all_listings().await?;
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn auction_query_filters_empty_images() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = AuctionWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_session, seller) = signer_for(SELLER).await;
    chain.fund(seller.address(), Amount::from_tokens(1)).await;

    let visible = workflow
        .create(&seller, auction_request("Visible", "1.0", 2))
        .await?;
    let hidden = workflow
        .create(&seller, auction_request("Hidden", "1.0", 2))
        .await?;

    let fetcher = Arc::new(StaticFetcher::new());
    fetcher
        .insert(
            &chain.token_uri(visible).await?,
            MetadataDocument {
                name: "Visible".to_string(),
                description: "has an image".to_string(),
                img_url: "https://gateway/ipfs/QmVisible".to_string(),
                price: None,
            },
        )
        .await;
    fetcher
        .insert(
            &chain.token_uri(hidden).await?,
            MetadataDocument {
                name: "Hidden".to_string(),
                description: "no image".to_string(),
                img_url: String::new(),
                price: None,
            },
        )
        .await;

    let queries = MarketplaceQueryService::new(chain.clone(), fetcher);
    let auctions = queries.list_all_auctions().await?;
    assert_eq!(auctions.len(), 1);
    assert_eq!(auctions[0].token_id, visible);
    assert_eq!(auctions[0].min_price, "1.");
    Ok(())
}

#[tokio::test]
async fn purchase_transfers_ownership() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = ListingWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_s1, seller) = signer_for(SELLER).await;
    let (_s2, buyer) = signer_for(BUYER).await;

    let token_id = workflow.list(&seller, listing_request("Ape", "1.5")).await?;
    workflow.buy(&buyer, token_id).await?;

    let record = chain.get_listing(token_id).await?;
    assert_eq!(record.owner, buyer.address());
    assert_eq!(record.seller, seller.address());
    assert!(!record.currently_listed);

    let queries = MarketplaceQueryService::new(chain.clone(), store.clone());
    let owned = queries.list_owned(buyer.address()).await?;
    assert_eq!(owned.listings.len(), 1);
    assert_eq!(owned.listings[0].token_id, token_id);
    assert!(owned.auctions.is_empty());
    Ok(())
}

#[tokio::test]
async fn auction_transition_guards() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = AuctionWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_s1, seller) = signer_for(SELLER).await;
    let (_s2, buyer) = signer_for(BUYER).await;
    chain.fund(seller.address(), Amount::from_tokens(1)).await;

    let token_id = workflow
        .create(&seller, auction_request("Mona", "1.0", 1))
        .await?;

    assert_matches!(
        workflow.bid(&buyer, token_id, "2.0").await,
        Err(MarketError::InvalidParameters(_))
    );
    assert_matches!(
        workflow.start(&buyer, token_id).await,
        Err(MarketError::Unauthorized(_))
    );

    workflow.start(&seller, token_id).await?;
    assert_matches!(
        workflow.bid(&seller, token_id, "2.0").await,
        Err(MarketError::Unauthorized(_))
    );
    assert_matches!(
        workflow.start(&seller, token_id).await,
        Err(MarketError::InvalidParameters(_))
    );
    Ok(())
}

#[tokio::test]
async fn end_auction_waits_for_expiry() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = AuctionWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_s1, seller) = signer_for(SELLER).await;
    let (_s2, buyer) = signer_for(BUYER).await;
    chain.fund(seller.address(), Amount::from_tokens(1)).await;

    let token_id = workflow
        .create(&seller, auction_request("Mona", "1.0", 1))
        .await?;
    workflow.start(&seller, token_id).await?;
    workflow.bid(&buyer, token_id, "1.5").await?;

    assert_matches!(
        workflow.end(&seller, token_id).await,
        Err(MarketError::TransactionReverted(
            RevertReason::AuctionNotEndable
        ))
    );

    chain.advance_time(TimeDelta::from_days(1)).await;
    // Any party may settle an expired auction.
    let record = workflow.end(&buyer, token_id).await?;
    assert!(record.ended);
    assert_eq!(record.owner, buyer.address());

    assert_matches!(
        workflow.end(&seller, token_id).await,
        Err(MarketError::TransactionReverted(
            RevertReason::AuctionNotEndable
        ))
    );

    // Without bids, ownership stays with the seller.
    let empty = workflow
        .create(&seller, auction_request("Empty", "1.0", 1))
        .await?;
    workflow.start(&seller, empty).await?;
    chain.advance_time(TimeDelta::from_days(1)).await;
    let record = workflow.end(&seller, empty).await?;
    assert!(record.ended);
    assert_eq!(record.owner, seller.address());
    assert_eq!(record.highest_bidder, Address::ZERO);
    Ok(())
}

#[tokio::test]
async fn validation_precedes_side_effects() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = ListingWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_session, seller) = signer_for(SELLER).await;

    let mut request = listing_request("Ape", "1.0");
    request.name = String::new();
    assert_matches!(
        workflow.list(&seller, request).await,
        Err(MarketError::IncompleteInput("name"))
    );

    assert_matches!(
        workflow.list(&seller, listing_request("Ape", "not a number")).await,
        Err(MarketError::InvalidAmount(_))
    );

    // Failing validation reached neither the store nor the chain.
    assert_eq!(store.len().await, 0);
    assert!(chain.get_all_listings().await?.is_empty());
    assert_eq!(workflow.state().await, ListingState::Failed);
    Ok(())
}

#[tokio::test]
async fn auction_creation_checks_fee_balance() -> Result<()> {
    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = AuctionWorkflow::new(chain.clone(), MetadataPublisher::new(store.clone()));
    let (_session, seller) = signer_for(SELLER).await;

    // The seller's balance cannot cover the auction fee.
    assert_matches!(
        workflow
            .create(&seller, auction_request("Mona", "1.0", 1))
            .await,
        Err(MarketError::TransactionReverted(
            RevertReason::InsufficientFunds
        ))
    );
    assert!(chain.get_all_auctions().await?.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn account_change_invalidates_signer() -> Result<()> {
    let wallet = Arc::new(TestWallet::new("0x7a69", vec![SELLER]));
    let session = WalletSession::new(wallet.clone(), &ChainConfig::default());
    session.connect().await?;
    let signer = session.signer().await?;
    assert!(signer.is_valid());

    let mut events = session.subscribe_accounts_changed();
    wallet.change_accounts(vec![BUYER]).await;
    // The session re-broadcasts only after discarding its cached state.
    events.recv().await?;

    assert!(!signer.is_valid());
    assert!(!session.is_connected().await);
    assert_eq!(session.address().await, None);

    let chain = Arc::new(TestChain::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = ListingWorkflow::new(chain.clone(), MetadataPublisher::new(store));
    assert_matches!(
        workflow.list(&signer, listing_request("Ape", "1.0")).await,
        Err(MarketError::SignerInvalidated)
    );
    assert!(chain.get_all_listings().await?.is_empty());
    Ok(())
}
