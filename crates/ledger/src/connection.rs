//! Wallet / node connection lifecycle.
//!
//! [`ConnectionManager`] owns the single active chain binding. Two sources
//! can supply it: a direct JSON-RPC node exposing unlocked test accounts,
//! and an injected wallet that asks the user for account access. When both
//! are connected the direct node is authoritative.
//!
//! Observers follow the state through [`ConnectionManager::subscribe`].

use std::fmt;
use std::sync::Arc;

use alloy_primitives::Address;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};

use crate::abi;
use crate::error::ChainError;
use crate::handle::{Account, ChainHandle, Provider};
use crate::rpc::{HttpTransport, RpcError, RpcTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    ConnectingBrowserWallet,
    ConnectingDirectNode,
    ConnectedBrowserWallet,
    ConnectedDirectNode,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectedBrowserWallet | ConnectionState::ConnectedDirectNode
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::ConnectingBrowserWallet => "connecting (browser wallet)",
            ConnectionState::ConnectingDirectNode => "connecting (direct node)",
            ConnectionState::ConnectedBrowserWallet => "connected (browser wallet)",
            ConnectionState::ConnectedDirectNode => "connected (direct node)",
        };
        f.write_str(s)
    }
}

// ──────────────────────────────────────────────
// Injected wallet
// ──────────────────────────────────────────────

/// Notifications fired by a wallet outside of any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// A user-facing wallet: a JSON-RPC endpoint that prompts for account
/// access and transaction signing, plus a stream of account/chain events.
pub trait InjectedWallet: Send + Sync {
    fn transport(&self) -> Arc<dyn RpcTransport>;
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// A wallet bridge reached over HTTP JSON-RPC.
///
/// HTTP has no push channel, so events are forwarded by whoever embeds the
/// bridge through [`RpcWallet::notify`].
pub struct RpcWallet {
    transport: Arc<HttpTransport>,
    events: broadcast::Sender<WalletEvent>,
}

impl RpcWallet {
    pub fn new(url: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        RpcWallet {
            transport: Arc::new(HttpTransport::new(url)),
            events,
        }
    }

    pub fn notify(&self, event: WalletEvent) {
        // No subscribers just means no session is listening.
        let _ = self.events.send(event);
    }
}

impl InjectedWallet for RpcWallet {
    fn transport(&self) -> Arc<dyn RpcTransport> {
        self.transport.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

/// What handling a wallet event did to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Ignored,
    AccountSwitched,
    WalletDisconnected,
    /// The chain binding is stale; all state was cleared and the caller
    /// must rebuild its environment before continuing.
    ReloadRequired,
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub endpoint: Option<String>,
}

// ──────────────────────────────────────────────
// Manager
// ──────────────────────────────────────────────

pub struct ConnectionManager {
    node: Arc<dyn RpcTransport>,
    wallet: Option<Arc<dyn InjectedWallet>>,
    expected_chain_id: u64,
    direct: Option<Account>,
    browser: Option<Account>,
    events: Option<broadcast::Receiver<WalletEvent>>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(node: Arc<dyn RpcTransport>, expected_chain_id: u64) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionManager {
            node,
            wallet: None,
            expected_chain_id,
            direct: None,
            browser: None,
            events: None,
            state,
        }
    }

    /// Manager for a direct node reachable over HTTP.
    pub fn for_endpoint(rpc_url: &str, expected_chain_id: u64) -> Self {
        Self::new(Arc::new(HttpTransport::new(rpc_url)), expected_chain_id)
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn InjectedWallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn expected_chain_id(&self) -> u64 {
        self.expected_chain_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connect to the direct node and bind its first account.
    ///
    /// On any failure the previous state is restored; a fresh manager stays
    /// `Disconnected`.
    pub async fn connect_direct_node(&mut self) -> Result<(), ChainError> {
        self.publish(ConnectionState::ConnectingDirectNode);
        let opened = self.open_direct().await;
        match opened {
            Ok(account) => {
                tracing::info!(
                    endpoint = self.node.endpoint(),
                    account = %account.address(),
                    "connected to direct node"
                );
                self.direct = Some(account);
                self.publish_current();
                Ok(())
            }
            Err(e) => {
                self.publish_current();
                Err(e)
            }
        }
    }

    async fn open_direct(&self) -> Result<Account, ChainError> {
        let chain_id = fetch_chain_id(self.node.as_ref()).await?;
        if chain_id != self.expected_chain_id {
            return Err(ChainError::WrongChain {
                expected: self.expected_chain_id,
                actual: chain_id,
            });
        }
        let accounts = self
            .node
            .request("eth_accounts", json!([]))
            .await
            .map_err(|e| unreachable_node(self.node.endpoint(), e))?;
        let first = parse_accounts(&accounts)?.into_iter().next().ok_or_else(|| {
            ChainError::ChainRead(format!("node {} exposes no accounts", self.node.endpoint()))
        })?;
        Ok(Account::new(Provider::new(self.node.clone(), chain_id), first))
    }

    /// Ask the injected wallet for account access.
    ///
    /// A direct-node connection, if active, stays authoritative.
    pub async fn connect_browser_wallet(&mut self) -> Result<(), ChainError> {
        let wallet = self.wallet.clone().ok_or(ChainError::WalletUnavailable)?;
        if self.direct.is_none() {
            self.publish(ConnectionState::ConnectingBrowserWallet);
        }
        let opened = self.open_wallet(wallet.as_ref()).await;
        match opened {
            Ok(account) => {
                tracing::info!(account = %account.address(), "browser wallet connected");
                self.browser = Some(account);
                self.events = Some(wallet.subscribe());
                self.publish_current();
                Ok(())
            }
            Err(e) => {
                self.publish_current();
                Err(e)
            }
        }
    }

    async fn open_wallet(&self, wallet: &dyn InjectedWallet) -> Result<Account, ChainError> {
        let transport = wallet.transport();
        let accounts = transport
            .request("eth_requestAccounts", json!([]))
            .await
            .map_err(|e| {
                if e.is_user_rejection() {
                    ChainError::Authorization("account access rejected by user".to_string())
                } else {
                    unreachable_node(transport.endpoint(), e)
                }
            })?;
        let first = parse_accounts(&accounts)?.into_iter().next().ok_or_else(|| {
            ChainError::Authorization("wallet authorized no accounts".to_string())
        })?;
        let chain_id = fetch_chain_id(transport.as_ref()).await?;
        if chain_id != self.expected_chain_id {
            return Err(ChainError::WrongChain {
                expected: self.expected_chain_id,
                actual: chain_id,
            });
        }
        Ok(Account::new(Provider::new(transport, chain_id), first))
    }

    /// Startup policy: try the direct node quietly, stay disconnected on failure.
    pub async fn auto_connect(&mut self) -> bool {
        match self.connect_direct_node().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "auto-connect to direct node failed");
                false
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.direct = None;
        self.browser = None;
        self.events = None;
        self.publish(ConnectionState::Disconnected);
    }

    pub fn handle_wallet_event(&mut self, event: WalletEvent) -> EventOutcome {
        match event {
            WalletEvent::AccountsChanged(accounts) => {
                let Some(current) = self.browser.clone() else {
                    return EventOutcome::Ignored;
                };
                match accounts.first() {
                    None => {
                        tracing::info!("wallet disconnected all accounts");
                        self.browser = None;
                        self.events = None;
                        self.publish_current();
                        EventOutcome::WalletDisconnected
                    }
                    Some(address) if *address == current.address() => EventOutcome::Ignored,
                    Some(address) => {
                        tracing::info!(account = %address, "wallet account switched");
                        self.browser = Some(current.with_address(*address));
                        EventOutcome::AccountSwitched
                    }
                }
            }
            WalletEvent::ChainChanged(chain_id) => {
                tracing::warn!(chain_id, "wallet switched chain; resetting connection");
                self.disconnect();
                EventOutcome::ReloadRequired
            }
        }
    }

    /// Apply every wallet event received since the last call.
    pub fn process_wallet_events(&mut self) -> Vec<EventOutcome> {
        let mut pending = Vec::new();
        if let Some(rx) = self.events.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => pending.push(event),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "wallet events dropped");
                    }
                    Err(_) => break,
                }
            }
        }
        pending
            .into_iter()
            .map(|event| self.handle_wallet_event(event))
            .collect()
    }

    /// The direct-node account if connected, else the wallet account.
    pub fn active_handle(&self) -> Result<ChainHandle, ChainError> {
        self.direct
            .as_ref()
            .or(self.browser.as_ref())
            .cloned()
            .map(ChainHandle::Signing)
            .ok_or(ChainError::NotConnected)
    }

    pub fn status(&self) -> ConnectionStatus {
        let active = self.direct.as_ref().or(self.browser.as_ref());
        ConnectionStatus {
            state: self.state(),
            account: active.map(Account::address),
            chain_id: active.map(|a| a.provider().chain_id()),
            endpoint: active.map(|a| a.provider().endpoint().to_string()),
        }
    }

    fn publish_current(&self) {
        let state = if self.direct.is_some() {
            ConnectionState::ConnectedDirectNode
        } else if self.browser.is_some() {
            ConnectionState::ConnectedBrowserWallet
        } else {
            ConnectionState::Disconnected
        };
        self.publish(state);
    }

    fn publish(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "connection state changed");
        }
    }
}

async fn fetch_chain_id(transport: &dyn RpcTransport) -> Result<u64, ChainError> {
    let value = transport
        .request("eth_chainId", json!([]))
        .await
        .map_err(|e| unreachable_node(transport.endpoint(), e))?;
    let raw = value
        .as_str()
        .ok_or_else(|| ChainError::ChainRead(format!("unexpected eth_chainId result: {}", value)))?;
    abi::parse_quantity(raw).map_err(|e| ChainError::ChainRead(e.to_string()))
}

fn parse_accounts(value: &Value) -> Result<Vec<Address>, ChainError> {
    let list = value
        .as_array()
        .ok_or_else(|| ChainError::ChainRead(format!("unexpected accounts result: {}", value)))?;
    list.iter()
        .map(|v| {
            v.as_str()
                .unwrap_or_default()
                .parse::<Address>()
                .map_err(|e| ChainError::ChainRead(e.to_string()))
        })
        .collect()
}

fn unreachable_node(endpoint: &str, err: RpcError) -> ChainError {
    ChainError::ChainRead(format!("{}: {}", endpoint, err))
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
