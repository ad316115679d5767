// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Base types for the Bidsea NFT marketplace.
//!
//! All on-chain arithmetic in Bidsea happens in wei, the smallest unit of the
//! chain's native currency. [`data_types::Amount`] wraps such values and
//! handles the conversion to and from the human decimal form used by the
//! presentation layer.

pub mod data_types;

pub use data_types::{Amount, ParseAmountError, TimeDelta};
