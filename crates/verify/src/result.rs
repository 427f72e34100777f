use std::fmt;

use asali_backend::BatchRecord;
use asali_ledger::ChainBatchRecord;
use serde::Serialize;

/// Why a verification did or did not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationReason {
    Matched,
    NotRecordedOnChain,
    ChainReadFailed { message: String },
    /// On chain, but the database record carries no transaction hash.
    MissingTxHash,
    NotInDatabase,
    BatchIdMismatch,
}

impl fmt::Display for VerificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationReason::Matched => f.write_str("database and ledger agree"),
            VerificationReason::NotRecordedOnChain => f.write_str("not recorded on chain"),
            VerificationReason::ChainReadFailed { message } => {
                write!(f, "chain read failed: {}", message)
            }
            VerificationReason::MissingTxHash => {
                f.write_str("on chain, but the database record has no transaction hash")
            }
            VerificationReason::NotInDatabase => f.write_str("on chain, but not in the database"),
            VerificationReason::BatchIdMismatch => {
                f.write_str("database and ledger batch ids differ")
            }
        }
    }
}

/// Unified verdict over the database and ledger views of one batch.
///
/// `matched` holds only when the database record has a transaction hash
/// and both sides carry the same batch id. Structured database fields are
/// not compared; `description_consistent` reports separately whether the
/// chain description equals the one derived from those fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub batch_id: String,
    pub database_record: Option<BatchRecord>,
    pub chain_record: Option<ChainBatchRecord>,
    pub matched: bool,
    pub reason: VerificationReason,
    pub description_consistent: Option<bool>,
}

impl VerificationResult {
    /// Compare the two views. `chain` is `Err(message)` when the ledger
    /// could not be read.
    pub fn reconcile(
        batch_id: &str,
        database_record: Option<BatchRecord>,
        chain: Result<Option<ChainBatchRecord>, String>,
    ) -> Self {
        let (chain_record, reason) = match chain {
            Err(message) => (None, VerificationReason::ChainReadFailed { message }),
            Ok(None) => (None, VerificationReason::NotRecordedOnChain),
            Ok(Some(on_chain)) => {
                let reason = match &database_record {
                    None => VerificationReason::NotInDatabase,
                    Some(db) if !db.is_recorded() => VerificationReason::MissingTxHash,
                    Some(db) if db.batch_id != on_chain.batch_id => {
                        VerificationReason::BatchIdMismatch
                    }
                    Some(_) => VerificationReason::Matched,
                };
                (Some(on_chain), reason)
            }
        };

        let description_consistent = match (&database_record, &chain_record) {
            (Some(db), Some(on_chain)) => Some(db.chain_description() == on_chain.description),
            _ => None,
        };

        VerificationResult {
            batch_id: batch_id.to_string(),
            matched: reason == VerificationReason::Matched,
            database_record,
            chain_record,
            reason,
            description_consistent,
        }
    }
}
