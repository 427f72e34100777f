use asali_backend::BackendError;
use asali_ledger::ChainError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Includes `ChainError::NotConnected` when no connection is active.
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The same record is already being written; wait for that call.
    #[error("{kind} {id} is already being recorded on chain")]
    RecordInFlight { kind: String, id: u64 },
}

impl VerifyError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, VerifyError::Chain(ChainError::NotConnected))
    }
}
