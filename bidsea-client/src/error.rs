// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The error taxonomy of the orchestration layer.

use std::fmt::{self, Display};

use bidsea_base::ParseAmountError;
use thiserror::Error;

use crate::{
    gateway::DecodingError,
    provider::{ProviderError, USER_REJECTED_CODE},
    storage::UploadError,
};

/// Why the contract rejected a state-changing call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RevertReason {
    /// The bid does not exceed the current highest bid or the minimum price.
    BidTooLow,
    /// The caller cannot cover the required value.
    InsufficientFunds,
    /// The caller is not entitled to this operation.
    Unauthorized,
    /// The auction's end conditions are not met yet.
    AuctionNotEndable,
    /// Any other revert, with the raw reason reported by the node.
    Other(String),
}

impl Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertReason::BidTooLow => write!(f, "bid does not exceed the required minimum"),
            RevertReason::InsufficientFunds => write!(f, "insufficient funds"),
            RevertReason::Unauthorized => write!(f, "caller is not authorized"),
            RevertReason::AuctionNotEndable => write!(f, "auction cannot be ended yet"),
            RevertReason::Other(message) => write!(f, "{message}"),
        }
    }
}

/// Classifies a node-reported revert message into a [`RevertReason`].
pub fn classify_revert(message: &str) -> RevertReason {
    let lower = message.to_ascii_lowercase();
    if (lower.contains("bid") && lower.contains("low")) || lower.contains("higher than") {
        RevertReason::BidTooLow
    } else if lower.contains("insufficient") {
        RevertReason::InsufficientFunds
    } else if lower.contains("only the seller") || lower.contains("not authorized") {
        RevertReason::Unauthorized
    } else if lower.contains("not ended")
        || lower.contains("still active")
        || lower.contains("cannot be ended")
    {
        RevertReason::AuctionNotEndable
    } else {
        RevertReason::Other(message.to_string())
    }
}

/// An error surfaced by a marketplace workflow or query.
#[derive(Debug, Error)]
pub enum MarketError {
    /// No wallet provider is injected or reachable.
    #[error("no Ethereum provider is reachable")]
    ProviderUnavailable,

    /// The wallet declined a prompt.
    #[error("the wallet rejected the request")]
    UserRejected,

    /// The wallet is on the wrong chain and refused to switch.
    #[error("wallet is on chain {actual}, chain {expected} is required")]
    ChainMismatch { expected: String, actual: String },

    /// A required input is missing or empty. Checked before any external
    /// call, so failing here has no side effects.
    #[error("missing or empty input: {0}")]
    IncompleteInput(&'static str),

    /// A user-supplied amount could not be parsed.
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] ParseAmountError),

    /// A transition was attempted with parameters its guards reject.
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),

    /// The connected account may not perform this operation.
    #[error("caller is not allowed to {0}")]
    Unauthorized(&'static str),

    /// A content-store upload failed. Never retried automatically: the
    /// provider may assign a fresh identifier to resubmitted content.
    #[error("upload failed: {0}")]
    UploadFailed(#[from] UploadError),

    /// The contract rejected a state-changing call.
    #[error("transaction reverted: {0}")]
    TransactionReverted(RevertReason),

    /// A contract response did not have the expected shape.
    #[error("could not decode contract response: {0}")]
    Decoding(#[from] DecodingError),

    /// The signing handle was invalidated by an account or chain change and
    /// must be re-acquired from the session.
    #[error("signing handle is no longer valid, reconnect the wallet")]
    SignerInvalidated,

    /// The wallet session is not connected.
    #[error("wallet session is not connected")]
    NotConnected,

    /// Any other provider failure.
    #[error(transparent)]
    Provider(ProviderError),
}

impl From<ProviderError> for MarketError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Rpc {
                code: USER_REJECTED_CODE,
                ..
            } => MarketError::UserRejected,
            ProviderError::Rpc { code, message }
                if code == -32000 || message.to_ascii_lowercase().contains("revert") =>
            {
                MarketError::TransactionReverted(classify_revert(&message))
            }
            ProviderError::Transport(error) if error.is_connect() || error.is_timeout() => {
                MarketError::ProviderUnavailable
            }
            error => MarketError::Provider(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_revert, RevertReason};

    #[test]
    fn revert_classification() {
        assert_eq!(
            classify_revert("execution reverted: Bid must be higher than the current highest bid"),
            RevertReason::BidTooLow
        );
        assert_eq!(
            classify_revert("insufficient funds for gas * price + value"),
            RevertReason::InsufficientFunds
        );
        assert_eq!(
            classify_revert("execution reverted: Only the seller can start the auction"),
            RevertReason::Unauthorized
        );
        assert_eq!(
            classify_revert("execution reverted: Auction cannot be ended yet"),
            RevertReason::AuctionNotEndable
        );
        assert_eq!(
            classify_revert("execution reverted: nope"),
            RevertReason::Other("execution reverted: nope".to_string())
        );
    }
}
