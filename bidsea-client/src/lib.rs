// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client-side orchestration for the Bidsea NFT marketplace.
//!
//! This crate turns a single user intent ("list this NFT", "place this bid",
//! "end this auction") into the ordered sequence of off-chain publication,
//! wallet-signed contract calls, and normalized read-back that realizes it.
//! It coordinates three independently failing collaborators:
//!
//! - the user's wallet provider, reached through the request-based interface
//!   in [`provider`] and managed by [`wallet::WalletSession`];
//! - the content-addressed store holding images and metadata documents,
//!   reached through [`storage`];
//! - the deployed `NFTBidMarketplace` contract, reached through [`gateway`].
//!
//! The [`listing`] and [`auction`] workflows drive state-changing calls, and
//! [`query::MarketplaceQueryService`] produces the merged view of on-chain
//! records and off-chain metadata that the presentation layer renders.

pub mod auction;
pub mod config;
pub mod error;
pub mod gateway;
pub mod listing;
pub mod metadata;
pub mod provider;
pub mod query;
pub mod storage;
/// Helper types for tests.
pub mod test_utils;
pub mod wallet;
