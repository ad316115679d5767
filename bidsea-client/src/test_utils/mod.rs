// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory doubles for the wallet provider, the marketplace contract and
//! the content store, used by the workflow tests.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{hex, keccak256, Address, B256, U256};
use async_lock::Mutex;
use async_trait::async_trait;
use bidsea_base::{Amount, TimeDelta};
use serde_json::{json, Value};
use sha3::{Digest, Sha3_256};
use tokio::sync::broadcast;

use crate::{
    error::{MarketError, RevertReason},
    gateway::{
        transfer_topic, AuctionRecord, ListingRecord, LogEntry, MarketplaceContract,
        TransactionHandle, TransactionOutcome,
    },
    metadata::{FetchError, MetadataDocument, MetadataFetcher},
    provider::{EthereumProvider, ProviderError, USER_REJECTED_CODE},
    storage::{ContentStore, UploadError},
    wallet::SigningHandle,
};

/// A wallet provider double with scriptable chain, accounts and switch
/// behavior.
pub struct TestWallet {
    accounts: Mutex<Vec<String>>,
    chain_id: Mutex<String>,
    allow_switch: bool,
    reject_accounts: bool,
    requests: Mutex<Vec<String>>,
    events: broadcast::Sender<Vec<String>>,
}

impl TestWallet {
    pub fn new(chain_id: &str, accounts: Vec<&str>) -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            accounts: Mutex::new(accounts.into_iter().map(str::to_string).collect()),
            chain_id: Mutex::new(chain_id.to_string()),
            allow_switch: true,
            reject_accounts: false,
            requests: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Makes `wallet_switchEthereumChain` fail as if the user declined.
    pub fn deny_switch(mut self) -> Self {
        self.allow_switch = false;
        self
    }

    /// Makes `eth_requestAccounts` fail as if the user declined.
    pub fn deny_accounts(mut self) -> Self {
        self.reject_accounts = true;
        self
    }

    /// The methods requested so far, in order.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    /// Replaces the exposed accounts and fires `accountsChanged`.
    pub async fn change_accounts(&self, accounts: Vec<&str>) {
        let accounts: Vec<String> = accounts.into_iter().map(str::to_string).collect();
        *self.accounts.lock().await = accounts.clone();
        let _ = self.events.send(accounts);
    }

    fn rejected() -> ProviderError {
        ProviderError::Rpc {
            code: USER_REJECTED_CODE,
            message: "User rejected the request.".to_string(),
        }
    }
}

#[async_trait]
impl EthereumProvider for TestWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.requests.lock().await.push(method.to_string());
        match method {
            "eth_chainId" => Ok(json!(self.chain_id.lock().await.clone())),
            "wallet_switchEthereumChain" => {
                if !self.allow_switch {
                    return Err(Self::rejected());
                }
                let requested = params[0]["chainId"].as_str().unwrap_or_default().to_string();
                *self.chain_id.lock().await = requested;
                Ok(Value::Null)
            }
            "eth_requestAccounts" => {
                if self.reject_accounts {
                    return Err(Self::rejected());
                }
                Ok(json!(self.accounts.lock().await.clone()))
            }
            "eth_accounts" => Ok(json!(self.accounts.lock().await.clone())),
            _ => Err(ProviderError::Rpc {
                code: -32601,
                message: format!("method {method} not supported by the test wallet"),
            }),
        }
    }

    fn accounts_changed(&self) -> broadcast::Receiver<Vec<String>> {
        self.events.subscribe()
    }
}

#[derive(Clone, Debug)]
struct AuctionSlot {
    record: AuctionRecord,
    started_at: Option<u64>,
}

#[derive(Default)]
struct ChainState {
    next_token: u64,
    listings: BTreeMap<u64, ListingRecord>,
    auctions: BTreeMap<u64, AuctionSlot>,
    uris: BTreeMap<u64, String>,
    balances: BTreeMap<Address, Amount>,
    outcomes: BTreeMap<B256, TransactionOutcome>,
    refunds: Vec<(Address, Amount)>,
    now: u64,
    tx_counter: u64,
}

/// An in-memory marketplace contract enforcing the deployed contract's
/// rules: creation fees, strictly increasing bids above the minimum,
/// seller-only starts, duration-gated ends and escrow refunds.
pub struct TestChain {
    listing_fee: Amount,
    auction_fee: Amount,
    state: Mutex<ChainState>,
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

fn address_topic(address: Address) -> B256 {
    B256::left_padding_from(address.as_slice())
}

fn token_topic(token_id: u64) -> B256 {
    B256::from(U256::from(token_id).to_be_bytes::<32>())
}

fn mint_log(owner: Address, token_id: u64) -> LogEntry {
    LogEntry {
        topics: vec![
            transfer_topic(),
            B256::ZERO,
            address_topic(owner),
            token_topic(token_id),
        ],
        data: Vec::new(),
    }
}

fn revert(message: &str) -> MarketError {
    MarketError::TransactionReverted(RevertReason::Other(message.to_string()))
}

impl TestChain {
    pub fn new() -> Self {
        Self {
            // 0.01 ether, as the local development deployment charges.
            listing_fee: Amount::from_wei(10_000_000_000_000_000),
            auction_fee: Amount::from_wei(10_000_000_000_000_000),
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Credits an account so it can cover creation fees.
    pub async fn fund(&self, address: Address, amount: Amount) {
        self.state.lock().await.balances.insert(address, amount);
    }

    /// Moves the chain clock forward.
    pub async fn advance_time(&self, delta: TimeDelta) {
        self.state.lock().await.now += delta.as_secs();
    }

    /// The escrow refunds observed so far, in order.
    pub async fn refunds(&self) -> Vec<(Address, Amount)> {
        self.state.lock().await.refunds.clone()
    }

    fn settle(state: &mut ChainState, logs: Vec<LogEntry>) -> TransactionHandle {
        state.tx_counter += 1;
        let handle = TransactionHandle(keccak256(state.tx_counter.to_be_bytes()));
        state
            .outcomes
            .insert(handle.0, TransactionOutcome { success: true, logs });
        handle
    }

    fn mint(state: &mut ChainState, uri: &str) -> u64 {
        state.next_token += 1;
        let token_id = state.next_token;
        state.uris.insert(token_id, uri.to_string());
        token_id
    }
}

#[async_trait]
impl MarketplaceContract for TestChain {
    async fn get_all_listings(&self) -> Result<Vec<ListingRecord>, MarketError> {
        Ok(self.state.lock().await.listings.values().cloned().collect())
    }

    async fn get_all_auctions(&self) -> Result<Vec<AuctionRecord>, MarketError> {
        Ok(self
            .state
            .lock()
            .await
            .auctions
            .values()
            .map(|slot| slot.record.clone())
            .collect())
    }

    async fn get_my_nfts(
        &self,
        owner: Address,
    ) -> Result<(Vec<ListingRecord>, Vec<AuctionRecord>), MarketError> {
        let state = self.state.lock().await;
        let listings = state
            .listings
            .values()
            .filter(|record| record.owner == owner || record.seller == owner)
            .cloned()
            .collect();
        let auctions = state
            .auctions
            .values()
            .map(|slot| &slot.record)
            .filter(|record| record.owner == owner || record.seller == owner)
            .cloned()
            .collect();
        Ok((listings, auctions))
    }

    async fn get_listing(&self, token_id: u64) -> Result<ListingRecord, MarketError> {
        self.state
            .lock()
            .await
            .listings
            .get(&token_id)
            .cloned()
            .ok_or_else(|| revert("token is not listed"))
    }

    async fn get_auction(&self, token_id: u64) -> Result<AuctionRecord, MarketError> {
        self.state
            .lock()
            .await
            .auctions
            .get(&token_id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| revert("token is not auctioned"))
    }

    async fn token_uri(&self, token_id: u64) -> Result<String, MarketError> {
        self.state
            .lock()
            .await
            .uris
            .get(&token_id)
            .cloned()
            .ok_or_else(|| revert("unknown token"))
    }

    async fn listing_fee(&self) -> Result<Amount, MarketError> {
        Ok(self.listing_fee)
    }

    async fn auction_fee(&self) -> Result<Amount, MarketError> {
        Ok(self.auction_fee)
    }

    async fn balance_of(&self, address: Address) -> Result<Amount, MarketError> {
        Ok(self
            .state
            .lock()
            .await
            .balances
            .get(&address)
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn create_listing(
        &self,
        signer: &SigningHandle,
        uri: &str,
        price: Amount,
        fee: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let seller = signer.require_valid()?;
        if fee != self.listing_fee {
            return Err(revert("listing fee mismatch"));
        }
        if price.is_zero() {
            return Err(revert("price must be positive"));
        }
        let mut state = self.state.lock().await;
        let token_id = TestChain::mint(&mut state, uri);
        state.listings.insert(
            token_id,
            ListingRecord {
                token_id,
                seller,
                owner: seller,
                price,
                currently_listed: true,
            },
        );
        Ok(TestChain::settle(
            &mut state,
            vec![mint_log(seller, token_id)],
        ))
    }

    async fn create_auction(
        &self,
        signer: &SigningHandle,
        uri: &str,
        min_price: Amount,
        duration: TimeDelta,
        fee: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let seller = signer.require_valid()?;
        if fee != self.auction_fee {
            return Err(revert("auction fee mismatch"));
        }
        if min_price.is_zero() || duration.is_zero() {
            return Err(revert("minimum price and duration must be positive"));
        }
        let mut state = self.state.lock().await;
        let token_id = TestChain::mint(&mut state, uri);
        state.auctions.insert(
            token_id,
            AuctionSlot {
                record: AuctionRecord {
                    token_id,
                    seller,
                    owner: seller,
                    min_price,
                    highest_bid: Amount::ZERO,
                    highest_bidder: Address::ZERO,
                    duration,
                    started: false,
                    ended: false,
                },
                started_at: None,
            },
        );
        Ok(TestChain::settle(
            &mut state,
            vec![mint_log(seller, token_id)],
        ))
    }

    async fn buy(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        price: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let buyer = signer.require_valid()?;
        let mut state = self.state.lock().await;
        let record = state
            .listings
            .get_mut(&token_id)
            .ok_or_else(|| revert("token is not listed"))?;
        if !record.currently_listed {
            return Err(revert("token is no longer listed"));
        }
        if price < record.price {
            return Err(MarketError::TransactionReverted(
                RevertReason::InsufficientFunds,
            ));
        }
        record.owner = buyer;
        record.currently_listed = false;
        Ok(TestChain::settle(&mut state, Vec::new()))
    }

    async fn start_auction(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        _min_price: Amount,
        _duration: TimeDelta,
    ) -> Result<TransactionHandle, MarketError> {
        let caller = signer.require_valid()?;
        let mut state = self.state.lock().await;
        let now = state.now;
        let slot = state
            .auctions
            .get_mut(&token_id)
            .ok_or_else(|| revert("token is not auctioned"))?;
        if slot.record.seller != caller {
            return Err(MarketError::TransactionReverted(RevertReason::Unauthorized));
        }
        if slot.record.started {
            return Err(revert("auction already started"));
        }
        slot.record.started = true;
        slot.started_at = Some(now);
        Ok(TestChain::settle(&mut state, Vec::new()))
    }

    async fn place_bid(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        bid: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let bidder = signer.require_valid()?;
        let mut state = self.state.lock().await;
        let slot = state
            .auctions
            .get_mut(&token_id)
            .ok_or_else(|| revert("token is not auctioned"))?;
        if !slot.record.started || slot.record.ended {
            return Err(revert("auction is not open for bids"));
        }
        if slot.record.seller == bidder {
            return Err(MarketError::TransactionReverted(RevertReason::Unauthorized));
        }
        if bid <= slot.record.min_price.max(slot.record.highest_bid) {
            return Err(MarketError::TransactionReverted(RevertReason::BidTooLow));
        }
        let displaced = (slot.record.highest_bidder, slot.record.highest_bid);
        slot.record.highest_bidder = bidder;
        slot.record.highest_bid = bid;
        if displaced.0 != Address::ZERO {
            state.refunds.push(displaced);
        }
        Ok(TestChain::settle(&mut state, Vec::new()))
    }

    async fn end_auction(
        &self,
        signer: &SigningHandle,
        token_id: u64,
    ) -> Result<TransactionHandle, MarketError> {
        signer.require_valid()?;
        let mut state = self.state.lock().await;
        let now = state.now;
        let slot = state
            .auctions
            .get_mut(&token_id)
            .ok_or_else(|| revert("token is not auctioned"))?;
        if !slot.record.started || slot.record.ended {
            return Err(MarketError::TransactionReverted(
                RevertReason::AuctionNotEndable,
            ));
        }
        let deadline = slot.started_at.unwrap_or(0) + slot.record.duration.as_secs();
        if now < deadline {
            return Err(MarketError::TransactionReverted(
                RevertReason::AuctionNotEndable,
            ));
        }
        slot.record.ended = true;
        if slot.record.highest_bidder != Address::ZERO {
            slot.record.owner = slot.record.highest_bidder;
        }
        Ok(TestChain::settle(&mut state, Vec::new()))
    }

    async fn await_confirmation(
        &self,
        handle: &TransactionHandle,
    ) -> Result<TransactionOutcome, MarketError> {
        self.state
            .lock()
            .await
            .outcomes
            .remove(&handle.0)
            .ok_or_else(|| revert("unknown transaction"))
    }
}

const MEMORY_SCHEME: &str = "memory://";

/// A content store addressing objects by their SHA3-256 digest. Also serves
/// as the metadata fetcher for the URIs it minted.
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Deletes the object behind a URI, simulating unreachable metadata.
    pub async fn remove(&self, uri: &str) -> bool {
        let id = uri.strip_prefix(MEMORY_SCHEME).unwrap_or(uri);
        self.objects.lock().await.remove(id).is_some()
    }

    /// The number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    fn digest(bytes: &[u8]) -> String {
        hex::encode(Sha3_256::digest(bytes))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn upload_asset(&self, bytes: Vec<u8>, _name: &str) -> Result<String, UploadError> {
        let id = Self::digest(&bytes);
        self.objects.lock().await.insert(id.clone(), bytes);
        Ok(id)
    }

    async fn upload_json(&self, document: &Value) -> Result<String, UploadError> {
        let bytes = serde_json::to_vec(document)?;
        let id = Self::digest(&bytes);
        self.objects.lock().await.insert(id.clone(), bytes);
        Ok(id)
    }

    fn resolve(&self, id: &str) -> String {
        format!("{MEMORY_SCHEME}{id}")
    }
}

#[async_trait]
impl MetadataFetcher for MemoryStore {
    async fn fetch(&self, uri: &str) -> Result<MetadataDocument, FetchError> {
        let id = uri.strip_prefix(MEMORY_SCHEME).unwrap_or(uri);
        let objects = self.objects.lock().await;
        let bytes = objects.get(id).ok_or(FetchError::Status(404))?;
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A metadata fetcher answering from a fixed map of documents.
pub struct StaticFetcher {
    documents: Mutex<HashMap<String, MetadataDocument>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, uri: &str, document: MetadataDocument) {
        self.documents
            .lock()
            .await
            .insert(uri.to_string(), document);
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataFetcher for StaticFetcher {
    async fn fetch(&self, uri: &str) -> Result<MetadataDocument, FetchError> {
        self.documents
            .lock()
            .await
            .get(uri)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}
