// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A typed façade over the deployed `NFTBidMarketplace` contract.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{hex, keccak256, Address, B256, U256};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use bidsea_base::{Amount, TimeDelta};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::{
    config::ChainConfig,
    error::MarketError,
    provider::{EthereumProvider, ProviderExt},
    wallet::SigningHandle,
};

/// How often a pending transaction is polled for its receipt.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The ABI of the deployed contract.
///
/// Names and shapes match the `NFTBidMarketplace` deployment; all monetary
/// parameters are integers in wei.
pub(crate) mod abi {
    use alloy_sol_types::sol;

    sol! {
        struct ListedToken {
            uint256 tokenId;
            address seller;
            address owner;
            uint256 price;
            bool currentlyListed;
        }

        struct AuctionedToken {
            uint256 tokenId;
            address seller;
            address owner;
            uint256 minPrice;
            uint256 highestBid;
            address highestBidder;
            uint256 duration;
            bool started;
            bool ended;
        }

        function getAllNFTs() view returns (ListedToken[] memory);
        function getAllAuctions() view returns (AuctionedToken[] memory);
        function getMyNFTs() view returns (ListedToken[] memory, AuctionedToken[] memory);
        function getListingForToken(uint256 tokenId) view returns (ListedToken memory);
        function getAuctionDetails(uint256 tokenId) view returns (AuctionedToken memory);
        function tokenURI(uint256 tokenId) view returns (string memory);
        function getListingFee() view returns (uint256);
        function getAuctionFee() view returns (uint256);
        function createToken(string uri, uint256 price) payable returns (uint256);
        function executeSale(uint256 tokenId) payable;
        function startAuction(uint256 tokenId, uint256 minPrice, uint256 duration);
        function bid(uint256 tokenId) payable;
        function endAuction(uint256 tokenId);
    }

    /// The auction-creating overload of `createToken`. It shares its name on
    /// chain, so it lives in its own module.
    pub(crate) mod auction {
        use alloy_sol_types::sol;

        sol! {
            function createToken(
                string uri,
                uint256 price,
                uint8 isAuction,
                uint256 minPrice,
                uint256 duration
            ) payable returns (uint256);
        }
    }
}

/// A contract response that did not have the expected shape.
#[derive(Debug, Error)]
pub enum DecodingError {
    /// ABI decoding failed outright.
    #[error("ABI decoding failed: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    /// A numeric field does not fit the width the record requires.
    #[error("{field} does not fit the expected width")]
    Overflow { field: &'static str },

    /// A hexadecimal payload could not be decoded.
    #[error("response is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// The decoded record violates a ledger invariant.
    #[error("inconsistent record: {0}")]
    Inconsistent(&'static str),
}

/// A fixed-price listing as read from the contract.
///
/// `owner == seller` while unsold; ownership transfers on purchase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListingRecord {
    pub token_id: u64,
    pub seller: Address,
    pub owner: Address,
    pub price: Amount,
    pub currently_listed: bool,
}

/// An auctioned token as read from the contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuctionRecord {
    pub token_id: u64,
    pub seller: Address,
    pub owner: Address,
    pub min_price: Amount,
    pub highest_bid: Amount,
    pub highest_bidder: Address,
    pub duration: TimeDelta,
    pub started: bool,
    pub ended: bool,
}

fn token_number(value: U256, field: &'static str) -> Result<u64, DecodingError> {
    u64::try_from(value).map_err(|_| DecodingError::Overflow { field })
}

fn wei_amount(value: U256, field: &'static str) -> Result<Amount, DecodingError> {
    let wei = u128::try_from(value).map_err(|_| DecodingError::Overflow { field })?;
    Ok(Amount::from_wei(wei))
}

impl TryFrom<abi::ListedToken> for ListingRecord {
    type Error = DecodingError;

    fn try_from(token: abi::ListedToken) -> Result<Self, DecodingError> {
        Ok(Self {
            token_id: token_number(token.tokenId, "tokenId")?,
            seller: token.seller,
            owner: token.owner,
            price: wei_amount(token.price, "price")?,
            currently_listed: token.currentlyListed,
        })
    }
}

impl TryFrom<abi::AuctionedToken> for AuctionRecord {
    type Error = DecodingError;

    fn try_from(token: abi::AuctionedToken) -> Result<Self, DecodingError> {
        let highest_bid = wei_amount(token.highestBid, "highestBid")?;
        if !token.started && (!highest_bid.is_zero() || token.highestBidder != Address::ZERO) {
            return Err(DecodingError::Inconsistent("unstarted auction carries a bid"));
        }
        Ok(Self {
            token_id: token_number(token.tokenId, "tokenId")?,
            seller: token.seller,
            owner: token.owner,
            min_price: wei_amount(token.minPrice, "minPrice")?,
            highest_bid,
            highest_bidder: token.highestBidder,
            duration: TimeDelta::from_secs(token_number(token.duration, "duration")?),
            started: token.started,
            ended: token.ended,
        })
    }
}

/// The hash of a submitted, not yet confirmed transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionHandle(pub B256);

/// A single log entry of a confirmed transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

/// The settled result of a state-changing call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransactionOutcome {
    pub success: bool,
    pub logs: Vec<LogEntry>,
}

pub(crate) fn transfer_topic() -> B256 {
    keccak256("Transfer(address,address,uint256)")
}

/// The token minted by a confirmed `createToken` transaction, recovered from
/// the ERC-721 `Transfer` log emitted on mint.
pub fn minted_token_id(outcome: &TransactionOutcome) -> Option<u64> {
    let transfer = transfer_topic();
    outcome.logs.iter().find_map(|log| match log.topics.as_slice() {
        [topic, from, _to, token] if *topic == transfer && *from == B256::ZERO => {
            u64::try_from(U256::from_be_bytes(token.0)).ok()
        }
        _ => None,
    })
}

/// The operations the marketplace contract exposes.
///
/// Reads require no signature and change no state. State-changing operations
/// require a [`SigningHandle`] and return a [`TransactionHandle`] to be
/// settled with [`MarketplaceContract::await_confirmation`].
#[async_trait]
pub trait MarketplaceContract: Send + Sync {
    async fn get_all_listings(&self) -> Result<Vec<ListingRecord>, MarketError>;
    async fn get_all_auctions(&self) -> Result<Vec<AuctionRecord>, MarketError>;
    /// The tokens the given account owns or sells, in both market segments.
    async fn get_my_nfts(
        &self,
        owner: Address,
    ) -> Result<(Vec<ListingRecord>, Vec<AuctionRecord>), MarketError>;
    async fn get_listing(&self, token_id: u64) -> Result<ListingRecord, MarketError>;
    async fn get_auction(&self, token_id: u64) -> Result<AuctionRecord, MarketError>;
    async fn token_uri(&self, token_id: u64) -> Result<String, MarketError>;
    async fn listing_fee(&self) -> Result<Amount, MarketError>;
    async fn auction_fee(&self) -> Result<Amount, MarketError>;
    /// The native-currency balance of an account.
    async fn balance_of(&self, address: Address) -> Result<Amount, MarketError>;

    async fn create_listing(
        &self,
        signer: &SigningHandle,
        uri: &str,
        price: Amount,
        fee: Amount,
    ) -> Result<TransactionHandle, MarketError>;
    async fn create_auction(
        &self,
        signer: &SigningHandle,
        uri: &str,
        min_price: Amount,
        duration: TimeDelta,
        fee: Amount,
    ) -> Result<TransactionHandle, MarketError>;
    async fn buy(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        price: Amount,
    ) -> Result<TransactionHandle, MarketError>;
    async fn start_auction(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        min_price: Amount,
        duration: TimeDelta,
    ) -> Result<TransactionHandle, MarketError>;
    async fn place_bid(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        bid: Amount,
    ) -> Result<TransactionHandle, MarketError>;
    async fn end_auction(
        &self,
        signer: &SigningHandle,
        token_id: u64,
    ) -> Result<TransactionHandle, MarketError>;

    /// Waits until the transaction is mined and returns its outcome.
    ///
    /// The wait is bounded only by the network itself; cancellation is the
    /// caller's responsibility.
    async fn await_confirmation(
        &self,
        handle: &TransactionHandle,
    ) -> Result<TransactionOutcome, MarketError>;
}

/// The production gateway, speaking ABI-encoded calls over a wallet provider.
pub struct EthereumGateway<P> {
    provider: Arc<P>,
    contract: Address,
}

impl<P: EthereumProvider> EthereumGateway<P> {
    pub fn new(provider: Arc<P>, config: &ChainConfig) -> Self {
        Self {
            provider,
            contract: config.contract_address,
        }
    }

    async fn eth_call(&self, from: Option<Address>, data: Vec<u8>) -> Result<Vec<u8>, MarketError> {
        let mut transaction = json!({
            "to": self.contract,
            "data": format!("0x{}", hex::encode(&data)),
        });
        if let Some(from) = from {
            transaction["from"] = json!(from);
        }
        let result = self.provider.call(transaction).await.map_err(MarketError::from)?;
        Ok(hex::decode(result.trim_start_matches("0x")).map_err(DecodingError::Hex)?)
    }

    async fn submit(
        &self,
        signer: &SigningHandle,
        data: Vec<u8>,
        value: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let from = signer.require_valid()?;
        let mut transaction = json!({
            "from": from,
            "to": self.contract,
            "data": format!("0x{}", hex::encode(&data)),
        });
        if !value.is_zero() {
            transaction["value"] = json!(format!("{:#x}", value.as_wei()));
        }
        let hash = self
            .provider
            .send_transaction(transaction)
            .await
            .map_err(MarketError::from)?;
        let hash: B256 = hash.parse().map_err(DecodingError::Hex)?;
        debug!(%hash, "transaction submitted");
        Ok(TransactionHandle(hash))
    }
}

fn parse_receipt(receipt: Value) -> Result<TransactionOutcome, DecodingError> {
    let success = receipt
        .get("status")
        .and_then(Value::as_str)
        .map(|status| status == "0x1")
        .unwrap_or(false);
    let mut logs = Vec::new();
    if let Some(entries) = receipt.get("logs").and_then(Value::as_array) {
        for entry in entries {
            let mut topics = Vec::new();
            if let Some(raw_topics) = entry.get("topics").and_then(Value::as_array) {
                for topic in raw_topics {
                    let topic = topic
                        .as_str()
                        .ok_or(DecodingError::Inconsistent("log topic is not a string"))?;
                    topics.push(topic.parse().map_err(DecodingError::Hex)?);
                }
            }
            let data = match entry.get("data").and_then(Value::as_str) {
                Some(data) => hex::decode(data.trim_start_matches("0x"))?,
                None => Vec::new(),
            };
            logs.push(LogEntry { topics, data });
        }
    }
    Ok(TransactionOutcome { success, logs })
}

#[async_trait]
impl<P: EthereumProvider> MarketplaceContract for EthereumGateway<P> {
    async fn get_all_listings(&self) -> Result<Vec<ListingRecord>, MarketError> {
        let bytes = self
            .eth_call(None, abi::getAllNFTsCall {}.abi_encode())
            .await?;
        let tokens = <Vec<abi::ListedToken>>::abi_decode(&bytes).map_err(DecodingError::Abi)?;
        tokens
            .into_iter()
            .map(|token| ListingRecord::try_from(token).map_err(MarketError::from))
            .collect()
    }

    async fn get_all_auctions(&self) -> Result<Vec<AuctionRecord>, MarketError> {
        let bytes = self
            .eth_call(None, abi::getAllAuctionsCall {}.abi_encode())
            .await?;
        let tokens = <Vec<abi::AuctionedToken>>::abi_decode(&bytes).map_err(DecodingError::Abi)?;
        tokens
            .into_iter()
            .map(|token| AuctionRecord::try_from(token).map_err(MarketError::from))
            .collect()
    }

    async fn get_my_nfts(
        &self,
        owner: Address,
    ) -> Result<(Vec<ListingRecord>, Vec<AuctionRecord>), MarketError> {
        let bytes = self
            .eth_call(Some(owner), abi::getMyNFTsCall {}.abi_encode())
            .await?;
        let (listings, auctions) =
            <(Vec<abi::ListedToken>, Vec<abi::AuctionedToken>)>::abi_decode_params(&bytes)
                .map_err(DecodingError::Abi)?;
        let listings = listings
            .into_iter()
            .map(|token| ListingRecord::try_from(token).map_err(MarketError::from))
            .collect::<Result<_, _>>()?;
        let auctions = auctions
            .into_iter()
            .map(|token| AuctionRecord::try_from(token).map_err(MarketError::from))
            .collect::<Result<_, _>>()?;
        Ok((listings, auctions))
    }

    async fn get_listing(&self, token_id: u64) -> Result<ListingRecord, MarketError> {
        let call = abi::getListingForTokenCall {
            tokenId: U256::from(token_id),
        };
        let bytes = self.eth_call(None, call.abi_encode()).await?;
        let token = abi::ListedToken::abi_decode(&bytes).map_err(DecodingError::Abi)?;
        Ok(ListingRecord::try_from(token)?)
    }

    async fn get_auction(&self, token_id: u64) -> Result<AuctionRecord, MarketError> {
        let call = abi::getAuctionDetailsCall {
            tokenId: U256::from(token_id),
        };
        let bytes = self.eth_call(None, call.abi_encode()).await?;
        let token = abi::AuctionedToken::abi_decode(&bytes).map_err(DecodingError::Abi)?;
        Ok(AuctionRecord::try_from(token)?)
    }

    async fn token_uri(&self, token_id: u64) -> Result<String, MarketError> {
        let call = abi::tokenURICall {
            tokenId: U256::from(token_id),
        };
        let bytes = self.eth_call(None, call.abi_encode()).await?;
        Ok(<String>::abi_decode(&bytes).map_err(DecodingError::Abi)?)
    }

    async fn listing_fee(&self) -> Result<Amount, MarketError> {
        let bytes = self
            .eth_call(None, abi::getListingFeeCall {}.abi_encode())
            .await?;
        let fee = <U256>::abi_decode(&bytes).map_err(DecodingError::Abi)?;
        Ok(wei_amount(fee, "listingFee")?)
    }

    async fn auction_fee(&self) -> Result<Amount, MarketError> {
        let bytes = self
            .eth_call(None, abi::getAuctionFeeCall {}.abi_encode())
            .await?;
        let fee = <U256>::abi_decode(&bytes).map_err(DecodingError::Abi)?;
        Ok(wei_amount(fee, "auctionFee")?)
    }

    async fn balance_of(&self, address: Address) -> Result<Amount, MarketError> {
        let balance = self
            .provider
            .balance(&address.to_string())
            .await
            .map_err(MarketError::from)?;
        let wei = u128::from_str_radix(balance.trim_start_matches("0x"), 16)
            .map_err(|_| DecodingError::Overflow { field: "balance" })?;
        Ok(Amount::from_wei(wei))
    }

    async fn create_listing(
        &self,
        signer: &SigningHandle,
        uri: &str,
        price: Amount,
        fee: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let call = abi::createTokenCall {
            uri: uri.to_string(),
            price: U256::from(price.as_wei()),
        };
        self.submit(signer, call.abi_encode(), fee).await
    }

    async fn create_auction(
        &self,
        signer: &SigningHandle,
        uri: &str,
        min_price: Amount,
        duration: TimeDelta,
        fee: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let call = abi::auction::createTokenCall {
            uri: uri.to_string(),
            price: U256::ZERO,
            isAuction: 1,
            minPrice: U256::from(min_price.as_wei()),
            duration: U256::from(duration.as_secs()),
        };
        self.submit(signer, call.abi_encode(), fee).await
    }

    async fn buy(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        price: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let call = abi::executeSaleCall {
            tokenId: U256::from(token_id),
        };
        self.submit(signer, call.abi_encode(), price).await
    }

    async fn start_auction(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        min_price: Amount,
        duration: TimeDelta,
    ) -> Result<TransactionHandle, MarketError> {
        let call = abi::startAuctionCall {
            tokenId: U256::from(token_id),
            minPrice: U256::from(min_price.as_wei()),
            duration: U256::from(duration.as_secs()),
        };
        self.submit(signer, call.abi_encode(), Amount::ZERO).await
    }

    async fn place_bid(
        &self,
        signer: &SigningHandle,
        token_id: u64,
        bid: Amount,
    ) -> Result<TransactionHandle, MarketError> {
        let call = abi::bidCall {
            tokenId: U256::from(token_id),
        };
        self.submit(signer, call.abi_encode(), bid).await
    }

    async fn end_auction(
        &self,
        signer: &SigningHandle,
        token_id: u64,
    ) -> Result<TransactionHandle, MarketError> {
        let call = abi::endAuctionCall {
            tokenId: U256::from(token_id),
        };
        self.submit(signer, call.abi_encode(), Amount::ZERO).await
    }

    async fn await_confirmation(
        &self,
        handle: &TransactionHandle,
    ) -> Result<TransactionOutcome, MarketError> {
        let hash = format!("{:#x}", handle.0);
        loop {
            if let Some(receipt) = self
                .provider
                .transaction_receipt(&hash)
                .await
                .map_err(MarketError::from)?
            {
                return Ok(parse_receipt(receipt)?);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, B256, U256};
    use assert_matches::assert_matches;

    use super::{
        abi, minted_token_id, parse_receipt, transfer_topic, AuctionRecord, DecodingError,
        ListingRecord, LogEntry, TransactionOutcome,
    };

    fn topic_for(token_id: u64) -> B256 {
        B256::from(U256::from(token_id).to_be_bytes::<32>())
    }

    #[test]
    fn recovers_minted_token_id() {
        let owner = B256::left_padding_from(Address::repeat_byte(7).as_slice());
        let outcome = TransactionOutcome {
            success: true,
            logs: vec![
                LogEntry {
                    topics: vec![transfer_topic(), owner, owner, topic_for(3)],
                    data: vec![],
                },
                LogEntry {
                    topics: vec![transfer_topic(), B256::ZERO, owner, topic_for(7)],
                    data: vec![],
                },
            ],
        };
        // Only the mint transfer (from the zero address) counts.
        assert_eq!(minted_token_id(&outcome), Some(7));
    }

    #[test]
    fn no_token_id_without_mint_log() {
        let outcome = TransactionOutcome {
            success: true,
            logs: vec![],
        };
        assert_eq!(minted_token_id(&outcome), None);
    }

    #[test]
    fn rejects_unstarted_auction_with_bid() {
        let token = abi::AuctionedToken {
            tokenId: U256::from(1),
            seller: Address::repeat_byte(1),
            owner: Address::repeat_byte(1),
            minPrice: U256::from(10),
            highestBid: U256::from(5),
            highestBidder: Address::repeat_byte(2),
            duration: U256::from(60),
            started: false,
            ended: false,
        };
        assert_matches!(
            AuctionRecord::try_from(token),
            Err(DecodingError::Inconsistent(_))
        );
    }

    #[test]
    fn rejects_oversized_price() {
        let token = abi::ListedToken {
            tokenId: U256::from(1),
            seller: Address::repeat_byte(1),
            owner: Address::repeat_byte(1),
            price: U256::MAX,
            currentlyListed: true,
        };
        assert_matches!(
            ListingRecord::try_from(token),
            Err(DecodingError::Overflow { field: "price" })
        );
    }

    #[test]
    fn parses_failed_receipt() {
        let receipt = serde_json::json!({ "status": "0x0", "logs": [] });
        let outcome = parse_receipt(receipt).unwrap();
        assert!(!outcome.success);
        assert!(outcome.logs.is_empty());
    }
}
