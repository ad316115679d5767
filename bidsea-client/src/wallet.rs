// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wallet session lifecycle and signing capabilities.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use alloy_primitives::Address;
use async_lock::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    config::ChainConfig,
    error::MarketError,
    gateway::DecodingError,
    provider::{EthereumProvider, ProviderExt},
};

/// Connection details returned by a successful [`WalletSession::connect`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionInfo {
    pub address: Address,
    pub chain_id: String,
}

/// A capability, bound to the current wallet session, that authorizes
/// construction of signed state-changing calls.
///
/// Handles are epoch-stamped: whenever the wallet reports an account or chain
/// change, every handle issued before the change becomes invalid and must be
/// re-acquired from the session.
#[derive(Clone, Debug)]
pub struct SigningHandle {
    address: Address,
    epoch: u64,
    current: Arc<AtomicU64>,
}

impl SigningHandle {
    /// The account this handle signs for.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether the handle still belongs to the active session.
    pub fn is_valid(&self) -> bool {
        self.epoch == self.current.load(Ordering::SeqCst)
    }

    /// The signer address, or [`MarketError::SignerInvalidated`] if the
    /// session has moved on.
    pub fn require_valid(&self) -> Result<Address, MarketError> {
        if self.is_valid() {
            Ok(self.address)
        } else {
            Err(MarketError::SignerInvalidated)
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    address: Option<Address>,
    chain_id: Option<String>,
    connected: bool,
}

/// The process-wide wallet session.
///
/// Created once per process, passed by reference to the workflows. Not
/// persisted: the state is rebuilt on every start by querying the provider.
/// Invariant: `connected` implies a cached address.
pub struct WalletSession<P> {
    provider: Arc<P>,
    required_chain: String,
    state: Mutex<SessionState>,
    epoch: Arc<AtomicU64>,
    events: broadcast::Sender<Vec<String>>,
}

impl<P: EthereumProvider + 'static> WalletSession<P> {
    /// Creates the session and starts listening for the provider's
    /// `accountsChanged` notification. Must run inside a Tokio runtime.
    pub fn new(provider: Arc<P>, config: &ChainConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(8);
        let session = Arc::new(Self {
            provider: provider.clone(),
            required_chain: config.chain_id.clone(),
            state: Mutex::new(SessionState::default()),
            epoch: Arc::new(AtomicU64::new(0)),
            events,
        });
        let mut notifications = provider.accounts_changed();
        let weak = Arc::downgrade(&session);
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(accounts) => {
                        let Some(session) = weak.upgrade() else { break };
                        session.handle_accounts_changed(accounts).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        session
    }

    /// Connects the wallet, switching it to the required chain first if
    /// necessary.
    ///
    /// Fails with [`MarketError::ChainMismatch`] when the wallet refuses to
    /// switch, with [`MarketError::UserRejected`] when the account prompt is
    /// declined, and with [`MarketError::ProviderUnavailable`] when no
    /// provider or no account is reachable. On a mismatch nothing else is
    /// attempted.
    pub async fn connect(&self) -> Result<SessionInfo, MarketError> {
        let chain_id = self.provider.chain_id().await.map_err(MarketError::from)?;
        if !chain_id.eq_ignore_ascii_case(&self.required_chain) {
            info!(%chain_id, required = %self.required_chain, "switching wallet chain");
            if let Err(error) = self.provider.switch_chain(&self.required_chain).await {
                warn!(%error, "wallet refused to switch chains");
                return Err(MarketError::ChainMismatch {
                    expected: self.required_chain.clone(),
                    actual: chain_id,
                });
            }
        }
        let accounts = self
            .provider
            .request_accounts()
            .await
            .map_err(MarketError::from)?;
        let address = self.remember(accounts).await?;
        info!(%address, "wallet connected");
        Ok(SessionInfo {
            address,
            chain_id: self.required_chain.clone(),
        })
    }

    /// Restores a connection silently, without prompting the wallet.
    ///
    /// Returns `None` when the wallet has not exposed any account to this
    /// origin yet.
    pub async fn init(&self) -> Result<Option<SessionInfo>, MarketError> {
        let accounts = self.provider.accounts().await.map_err(MarketError::from)?;
        if accounts.is_empty() {
            return Ok(None);
        }
        let address = self.remember(accounts).await?;
        Ok(Some(SessionInfo {
            address,
            chain_id: self.required_chain.clone(),
        }))
    }

    async fn remember(&self, accounts: Vec<String>) -> Result<Address, MarketError> {
        let raw = accounts.first().ok_or(MarketError::ProviderUnavailable)?;
        let address: Address = raw.parse().map_err(DecodingError::Hex)?;
        let mut state = self.state.lock().await;
        state.address = Some(address);
        state.chain_id = Some(self.required_chain.clone());
        state.connected = true;
        Ok(address)
    }

    /// The connected address, if any.
    pub async fn address(&self) -> Option<Address> {
        self.state.lock().await.address
    }

    /// The chain the session is connected to, if any.
    pub async fn chain_id(&self) -> Option<String> {
        self.state.lock().await.chain_id.clone()
    }

    /// Whether the session is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Issues a signing capability for the connected account.
    ///
    /// The handle must be re-acquired after any account or chain change.
    pub async fn signer(&self) -> Result<SigningHandle, MarketError> {
        let state = self.state.lock().await;
        let address = state.address.ok_or(MarketError::NotConnected)?;
        Ok(SigningHandle {
            address,
            epoch: self.epoch.load(Ordering::SeqCst),
            current: self.epoch.clone(),
        })
    }

    /// Subscribes to account changes. Dropping the receiver unsubscribes.
    pub fn subscribe_accounts_changed(&self) -> broadcast::Receiver<Vec<String>> {
        self.events.subscribe()
    }

    /// Discards all cached session data and invalidates outstanding signing
    /// handles.
    pub async fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        *state = SessionState::default();
    }

    async fn handle_accounts_changed(&self, accounts: Vec<String>) {
        warn!("wallet accounts changed, invalidating session");
        self.invalidate().await;
        let _ = self.events.send(accounts);
    }
}
