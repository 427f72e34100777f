//! Ledger side of AsaliTrace: contract calls, ABI binding, JSON-RPC transport
//! and the wallet / direct-node connection lifecycle.

pub mod abi;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod record;
pub mod rpc;
pub mod simulated;

pub use alloy_primitives::Address;
pub use client::ChainClient;
pub use config::{ContractConfig, DEFAULT_CHAIN_ID, DEFAULT_RPC_URL};
pub use connection::{
    ConnectionManager, ConnectionState, ConnectionStatus, EventOutcome, InjectedWallet, RpcWallet,
    WalletEvent,
};
pub use error::ChainError;
pub use handle::{Account, ChainHandle, Provider};
pub use record::{ChainBatchRecord, ChainCertificate, ChainLabTest, TxReceipt};
pub use rpc::{HttpTransport, RpcError, RpcTransport};

#[cfg(test)]
mod tests {
    /// Calendar handling lives in the backend; the ledger deals in block
    /// timestamps only.
    #[test]
    fn manifest_has_no_calendar_dependency() {
        let manifest = include_str!("../Cargo.toml");
        assert!(!manifest
            .lines()
            .any(|line| line.trim_start().starts_with("time ")));
    }
}
