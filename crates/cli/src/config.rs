//! Resolved settings for the `asali` binary.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `ASALI_*` environment variables, each layer overriding the previous.
//!
//! ```toml
//! [chain]
//! rpc_url = "http://127.0.0.1:8545"
//! chain_id = 31337
//! contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//! abi_path = "artifacts/contracts/AsaliTrace.sol/AsaliTrace.json"
//!
//! [backend]
//! api_url = "http://localhost:8000/api"
//! access_token = "..."
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use asali_backend::DEFAULT_API_URL;
use asali_ledger::config::DEFAULT_RECEIPT_POLL;
use asali_ledger::{ChainError, ContractConfig, DEFAULT_CHAIN_ID, DEFAULT_RPC_URL};
use serde::{Deserialize, Serialize};

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "asali.toml";

const REDACTED: &str = "********";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chain: ChainSettings,
    pub backend: BackendSettings,
    pub oauth: OAuthSettings,
}

/// `[chain]`: ledger node and contract binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abi_path: Option<PathBuf>,
    /// JSON-RPC endpoint of an external wallet bridge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_url: Option<String>,
    pub receipt_poll_ms: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        ChainSettings {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            contract_address: None,
            abi_path: None,
            wallet_url: None,
            receipt_poll_ms: DEFAULT_RECEIPT_POLL.as_millis() as u64,
        }
    }
}

/// `[backend]`: REST API and stored session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings {
            api_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            refresh_token: None,
        }
    }
}

/// `[oauth]`: recognised and reported, never used for a login flow here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_redirect_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_redirect_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apple_client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apple_redirect_uri: Option<String>,
}

impl Settings {
    /// Resolve settings from the process environment and, if present, a file.
    ///
    /// An explicit `path` must exist; the default `asali.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let mut settings = match path {
            Some(path) => Settings::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Settings::from_file(default)?
                } else {
                    Settings::default()
                }
            }
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that hold whichever source a value came from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.receipt_poll_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "chain.receipt_poll_ms (ASALI_RECEIPT_POLL_MS)",
                reason: "must be at least 1 millisecond".to_string(),
            });
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Settings, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `ASALI_*` variables. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("ASALI_RPC_URL") {
            self.chain.rpc_url = v;
        }
        if let Some(v) = var("ASALI_CHAIN_ID") {
            self.chain.chain_id = parse_number("ASALI_CHAIN_ID", &v)?;
        }
        if let Some(v) = var("ASALI_CONTRACT_ADDRESS") {
            self.chain.contract_address = Some(v);
        }
        if let Some(v) = var("ASALI_CONTRACT_ABI") {
            self.chain.abi_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("ASALI_WALLET_URL") {
            self.chain.wallet_url = Some(v);
        }
        if let Some(v) = var("ASALI_RECEIPT_POLL_MS") {
            self.chain.receipt_poll_ms = parse_number("ASALI_RECEIPT_POLL_MS", &v)?;
        }

        if let Some(v) = var("ASALI_API_URL") {
            self.backend.api_url = v;
        }
        if let Some(v) = var("ASALI_ACCESS_TOKEN") {
            self.backend.access_token = Some(v);
        }
        if let Some(v) = var("ASALI_REFRESH_TOKEN") {
            self.backend.refresh_token = Some(v);
        }

        let oauth = &mut self.oauth;
        for (name, slot) in [
            ("ASALI_GOOGLE_CLIENT_ID", &mut oauth.google_client_id),
            ("ASALI_GOOGLE_REDIRECT_URI", &mut oauth.google_redirect_uri),
            ("ASALI_GITHUB_CLIENT_ID", &mut oauth.github_client_id),
            ("ASALI_GITHUB_REDIRECT_URI", &mut oauth.github_redirect_uri),
            ("ASALI_APPLE_CLIENT_ID", &mut oauth.apple_client_id),
            ("ASALI_APPLE_REDIRECT_URI", &mut oauth.apple_redirect_uri),
        ] {
            if let Some(v) = var(name) {
                *slot = Some(v);
            }
        }
        Ok(())
    }

    /// Contract binding for the ledger client.
    ///
    /// A missing address or ABI is accepted here and reported by the first
    /// chain operation instead.
    pub fn contract_config(&self) -> Result<ContractConfig, ChainError> {
        let config = ContractConfig::from_settings(
            self.chain.contract_address.as_deref(),
            self.chain.abi_path.as_deref(),
            self.chain.chain_id,
        )?;
        Ok(config.with_receipt_poll_interval(Duration::from_millis(self.chain.receipt_poll_ms)))
    }

    /// Copy safe to print: session tokens are masked.
    pub fn redacted(&self) -> Settings {
        let mut copy = self.clone();
        for token in [
            &mut copy.backend.access_token,
            &mut copy.backend.refresh_token,
        ] {
            if token.is_some() {
                *token = Some(REDACTED.to_string());
            }
        }
        copy
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        })
}
