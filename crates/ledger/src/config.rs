//! Contract binding configuration.
//!
//! A binding needs three things: the deployed contract address, its ABI,
//! and the chain id it lives on. Address and ABI may be absent at load
//! time; their absence is reported as `ChainError::Configuration` by the
//! first chain operation, before any network call.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;

use crate::abi::ContractAbi;
use crate::error::ChainError;

/// Default JSON-RPC endpoint of a local development node.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Chain id of a local Hardhat node.
pub const DEFAULT_CHAIN_ID: u64 = 31337;

/// Default interval between `eth_getTransactionReceipt` polls.
pub const DEFAULT_RECEIPT_POLL: Duration = Duration::from_millis(500);

/// Floor for the receipt poll interval; a zero interval would spin on the node.
pub const MIN_RECEIPT_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ContractConfig {
    pub address: Option<Address>,
    pub abi: Option<Arc<ContractAbi>>,
    pub chain_id: u64,
    pub receipt_poll_interval: Duration,
}

impl Default for ContractConfig {
    fn default() -> Self {
        ContractConfig {
            address: None,
            abi: None,
            chain_id: DEFAULT_CHAIN_ID,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL,
        }
    }
}

impl ContractConfig {
    pub fn new(chain_id: u64) -> Self {
        ContractConfig {
            chain_id,
            ..Default::default()
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_abi(mut self, abi: ContractAbi) -> Self {
        self.abi = Some(Arc::new(abi));
        self
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    /// The configured poll interval, never below [`MIN_RECEIPT_POLL`].
    pub fn receipt_poll(&self) -> Duration {
        self.receipt_poll_interval.max(MIN_RECEIPT_POLL)
    }

    /// Build from loosely-typed settings (env vars, config file).
    ///
    /// An empty or missing address stays unset. A malformed address or an
    /// unreadable ABI artifact is a configuration error right away.
    pub fn from_settings(
        address: Option<&str>,
        abi_path: Option<&Path>,
        chain_id: u64,
    ) -> Result<Self, ChainError> {
        let mut config = ContractConfig::new(chain_id);
        if let Some(raw) = address.map(str::trim).filter(|s| !s.is_empty()) {
            let parsed = raw.parse::<Address>().map_err(|e| {
                ChainError::Configuration(format!("invalid contract address '{}': {}", raw, e))
            })?;
            config.address = Some(parsed);
        }
        if let Some(path) = abi_path {
            config.abi = Some(Arc::new(load_abi_artifact(path)?));
        }
        Ok(config)
    }

    /// The address and ABI, or a configuration error naming what is missing.
    pub fn binding(&self) -> Result<(Address, &ContractAbi), ChainError> {
        let address = self.address.filter(|a| !a.is_zero()).ok_or_else(|| {
            ChainError::Configuration(
                "contract address not configured; set ASALI_CONTRACT_ADDRESS".to_string(),
            )
        })?;
        let abi = self
            .abi
            .as_deref()
            .filter(|abi| !abi.is_empty())
            .ok_or_else(|| {
                ChainError::Configuration(
                    "contract ABI not found; compile the contract and set ASALI_CONTRACT_ABI"
                        .to_string(),
                )
            })?;
        Ok((address, abi))
    }
}

/// Load a compiler artifact (`{"abi": [...]}`) or bare ABI array from disk.
pub fn load_abi_artifact(path: &Path) -> Result<ContractAbi, ChainError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ChainError::Configuration(format!("cannot read ABI '{}': {}", path.display(), e))
    })?;
    ContractAbi::from_json_str(&content).map_err(|e| {
        ChainError::Configuration(format!("invalid ABI '{}': {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_address_stays_unset() {
        let config = ContractConfig::from_settings(Some("  "), None, 31337).unwrap();
        assert!(config.address.is_none());
        assert!(matches!(config.binding(), Err(ChainError::Configuration(_))));
    }

    #[test]
    fn malformed_address_is_configuration_error() {
        let err = ContractConfig::from_settings(Some("0x1234"), None, 31337).unwrap_err();
        assert!(matches!(err, ChainError::Configuration(_)));
    }

    #[test]
    fn missing_abi_reported_after_address() {
        let config = ContractConfig::from_settings(
            Some("0x5fbdb2315678afecb367f032d93f642f64180aa3"),
            None,
            31337,
        )
        .unwrap();
        let err = config.binding().unwrap_err();
        assert!(err.to_string().contains("ABI"));
    }

    #[test]
    fn unreadable_abi_path() {
        let err = ContractConfig::from_settings(
            None,
            Some(Path::new("/nonexistent/AsaliTrace.json")),
            31337,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot read ABI"));
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = ContractConfig::new(31337).with_receipt_poll_interval(Duration::ZERO);
        assert_eq!(config.receipt_poll(), MIN_RECEIPT_POLL);
        let config = config.with_receipt_poll_interval(Duration::from_millis(250));
        assert_eq!(config.receipt_poll(), Duration::from_millis(250));
    }

    #[test]
    fn checksummed_and_lowercase_addresses_agree() {
        let lower = ContractConfig::from_settings(
            Some("0x5fbdb2315678afecb367f032d93f642f64180aa3"),
            None,
            31337,
        )
        .unwrap();
        let mixed = ContractConfig::from_settings(
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            None,
            31337,
        )
        .unwrap();
        assert_eq!(lower.address, mixed.address);
    }

    #[test]
    fn zero_address_counts_as_unset() {
        let config = ContractConfig::new(31337)
            .with_address(Address::ZERO)
            .with_abi(crate::simulated::asali_trace_abi());
        assert!(matches!(config.binding(), Err(ChainError::Configuration(_))));
    }
}
