/// All errors that can be returned by the ledger layer.
///
/// Raw transport failures never leave this crate as-is; every call site
/// normalizes them into one of these kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Contract address, ABI, or a required ABI method is missing.
    /// Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No injected wallet is available to connect to.
    #[error("no browser wallet available; install a wallet extension to sign transactions")]
    WalletUnavailable,

    /// The node (or the handle passed in) is on a different chain than configured.
    #[error("wrong network: expected chain id {expected}, got {actual}")]
    WrongChain { expected: u64, actual: u64 },

    /// The user rejected a signing or account-access prompt.
    #[error("request rejected by user: {0}")]
    Authorization(String),

    /// A write needs a signing account but a read-only provider was supplied.
    #[error("a signing account is required for {operation}")]
    SignerRequired { operation: String },

    /// No connection (direct node or wallet) is active.
    #[error("not connected: connect a wallet or start the local node first")]
    NotConnected,

    /// A record with this key already exists on chain.
    #[error("{kind} '{id}' already exists on chain")]
    DuplicateRecord { kind: String, id: String },

    /// Transaction submission or mining failed.
    #[error("chain write failed: {0}")]
    ChainWrite(String),

    /// A read call or its decoding failed.
    #[error("chain read failed: {0}")]
    ChainRead(String),
}

impl ChainError {
    /// Whether the caller may simply retry on the next user action.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            ChainError::WalletUnavailable
                | ChainError::WrongChain { .. }
                | ChainError::Authorization(_)
                | ChainError::NotConnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = ChainError::WrongChain {
            expected: 31337,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "wrong network: expected chain id 31337, got 1"
        );

        let err = ChainError::DuplicateRecord {
            kind: "batch".to_string(),
            id: "B1".to_string(),
        };
        assert_eq!(err.to_string(), "batch 'B1' already exists on chain");
    }

    #[test]
    fn configuration_is_not_user_actionable() {
        assert!(!ChainError::Configuration("x".into()).is_user_actionable());
        assert!(ChainError::Authorization("x".into()).is_user_actionable());
        assert!(ChainError::NotConnected.is_user_actionable());
    }
}
