// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client configuration.

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The chain the marketplace contract is deployed on.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChainConfig {
    /// The JSON-RPC endpoint of the wallet provider or node.
    pub rpc_url: String,
    /// The address of the deployed `NFTBidMarketplace` contract.
    pub contract_address: Address,
    /// The required chain, as a hexadecimal chain id.
    pub chain_id: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: address!("B7f8BC63BbcaD18155201308C8f3540b07f84F5e"),
            chain_id: "0x7a69".to_string(),
        }
    }
}

/// The content-addressed storage provider holding assets and metadata.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    /// The pinning API endpoint.
    pub api_url: String,
    /// The gateway under which pinned content is resolvable.
    pub gateway_url: String,
    /// Bearer token for the pinning API, if it requires one.
    pub jwt: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.pinata.cloud".to_string(),
            gateway_url: "https://gateway.pinata.cloud".to_string(),
            jwt: None,
        }
    }
}

/// The full client configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    pub chain: ChainConfig,
    pub storage: StorageConfig,
}

impl ClientConfig {
    /// Reads overrides from the `BIDSEA_*` environment variables, falling
    /// back to the defaults of the local development deployment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("BIDSEA_RPC_URL") {
            config.chain.rpc_url = url;
        }
        if let Ok(raw) = std::env::var("BIDSEA_CONTRACT_ADDRESS") {
            match raw.parse() {
                Ok(address) => config.chain.contract_address = address,
                Err(error) => warn!(%raw, %error, "ignoring invalid contract address"),
            }
        }
        if let Ok(chain_id) = std::env::var("BIDSEA_CHAIN_ID") {
            config.chain.chain_id = chain_id;
        }
        if let Ok(url) = std::env::var("BIDSEA_STORAGE_API_URL") {
            config.storage.api_url = url;
        }
        if let Ok(url) = std::env::var("BIDSEA_STORAGE_GATEWAY") {
            config.storage.gateway_url = url;
        }
        if let Ok(jwt) = std::env::var("BIDSEA_STORAGE_JWT") {
            config.storage.jwt = Some(jwt);
        }
        config
    }
}
