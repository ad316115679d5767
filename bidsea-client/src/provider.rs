// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Request-based access to the user's Ethereum wallet provider.

use std::time::Duration;

use async_lock::Mutex;
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;

/// The EIP-1193 error code emitted when the user declines a wallet prompt.
pub const USER_REJECTED_CODE: i64 = 4001;

/// A failure of the provider transport or of the wallet itself.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response was not valid JSON.
    #[error("invalid JSON in response: {0}")]
    Json(#[from] serde_json::Error),

    /// The wallet or node reported an error.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The response carried neither a result nor an error.
    #[error("malformed JSON-RPC envelope")]
    BadEnvelope,
}

/// The request-based interface a wallet provider exposes.
///
/// Mirrors the injected-provider surface browsers expose:
/// `eth_requestAccounts`, `eth_chainId`, `wallet_switchEthereumChain` and
/// friends, plus the `accountsChanged` notification.
#[async_trait]
pub trait EthereumProvider: Send + Sync {
    /// Performs a single wallet or node request.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Subscribes to the wallet's `accountsChanged` notification. Dropping
    /// the receiver unsubscribes.
    fn accounts_changed(&self) -> broadcast::Receiver<Vec<String>>;
}

/// A wallet provider reached over JSON-RPC on HTTP.
pub struct HttpProvider {
    url: String,
    client: reqwest::Client,
    id: Mutex<u64>,
    accounts_events: broadcast::Sender<Vec<String>>,
}

impl HttpProvider {
    /// Creates a provider for the given JSON-RPC endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        let (accounts_events, _) = broadcast::channel(8);
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        Self {
            url: url.into(),
            client,
            id: Mutex::new(0),
            accounts_events,
        }
    }

    async fn next_id(&self) -> u64 {
        let mut id = self.id.lock().await;
        *id += 1;
        *id
    }

    /// Forwards the wallet's `accountsChanged` notification to subscribers.
    ///
    /// HTTP transports carry no push notifications of their own, so the
    /// embedding (a UI bridge, typically) calls this when its wallet fires
    /// the event.
    pub fn notify_accounts_changed(&self, accounts: Vec<String>) {
        let _ = self.accounts_events.send(accounts);
    }
}

#[async_trait]
impl EthereumProvider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id().await;
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let mut body: Value = response.json().await?;
        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(ProviderError::Rpc { code, message });
        }
        match body.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(ProviderError::BadEnvelope),
        }
    }

    fn accounts_changed(&self) -> broadcast::Receiver<Vec<String>> {
        self.accounts_events.subscribe()
    }
}

/// Typed helpers over the raw request interface.
#[async_trait]
pub trait ProviderExt: EthereumProvider {
    /// Prompts the wallet to expose its accounts.
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        let value = self.request("eth_requestAccounts", json!([])).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Returns the already exposed accounts without prompting.
    async fn accounts(&self) -> Result<Vec<String>, ProviderError> {
        let value = self.request("eth_accounts", json!([])).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The wallet's active chain, as a hexadecimal chain id.
    async fn chain_id(&self) -> Result<String, ProviderError> {
        let value = self.request("eth_chainId", json!([])).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Asks the wallet to switch to the given chain.
    async fn switch_chain(&self, chain_id: &str) -> Result<(), ProviderError> {
        self.request(
            "wallet_switchEthereumChain",
            json!([{ "chainId": chain_id }]),
        )
        .await?;
        Ok(())
    }

    /// Executes a read-only contract call against the latest block.
    async fn call(&self, transaction: Value) -> Result<String, ProviderError> {
        let value = self.request("eth_call", json!([transaction, "latest"])).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Submits a state-changing transaction, returning its hash.
    async fn send_transaction(&self, transaction: Value) -> Result<String, ProviderError> {
        let value = self.request("eth_sendTransaction", json!([transaction])).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The receipt of a transaction, or `None` while it is pending.
    async fn transaction_receipt(&self, hash: &str) -> Result<Option<Value>, ProviderError> {
        let value = self.request("eth_getTransactionReceipt", json!([hash])).await?;
        if value.is_null() {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    /// The balance of an account at the latest block, as a hexadecimal wei
    /// string.
    async fn balance(&self, address: &str) -> Result<String, ProviderError> {
        let value = self
            .request("eth_getBalance", json!([address, "latest"]))
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl<P: EthereumProvider + ?Sized> ProviderExt for P {}
