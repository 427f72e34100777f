//! Explicit chain handles.
//!
//! A [`ChainHandle`] is either a read-only [`Provider`] or a signing
//! [`Account`]. Callers pass the variant they hold; nothing inspects the
//! handle at runtime to find out whether it can send transactions.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::Address;

use crate::rpc::RpcTransport;

/// A read-only connection to a ledger endpoint on a known chain.
#[derive(Clone)]
pub struct Provider {
    transport: Arc<dyn RpcTransport>,
    chain_id: u64,
}

impl Provider {
    pub fn new(transport: Arc<dyn RpcTransport>, chain_id: u64) -> Self {
        Provider {
            transport,
            chain_id,
        }
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("endpoint", &self.endpoint())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// An account that can authorize transactions through its provider.
#[derive(Clone, Debug)]
pub struct Account {
    provider: Provider,
    address: Address,
}

impl Account {
    pub fn new(provider: Provider, address: Address) -> Self {
        Account { provider, address }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Same provider, different account (wallet account switch).
    pub fn with_address(&self, address: Address) -> Self {
        Account {
            provider: self.provider.clone(),
            address,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ChainHandle {
    ReadOnly(Provider),
    Signing(Account),
}

impl ChainHandle {
    pub fn provider(&self) -> &Provider {
        match self {
            ChainHandle::ReadOnly(p) => p,
            ChainHandle::Signing(a) => a.provider(),
        }
    }

    pub fn signer(&self) -> Option<&Account> {
        match self {
            ChainHandle::ReadOnly(_) => None,
            ChainHandle::Signing(a) => Some(a),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.provider().chain_id()
    }
}

impl From<Provider> for ChainHandle {
    fn from(p: Provider) -> Self {
        ChainHandle::ReadOnly(p)
    }
}

impl From<Account> for ChainHandle {
    fn from(a: Account) -> Self {
        ChainHandle::Signing(a)
    }
}
