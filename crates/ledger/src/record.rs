use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// A batch as stored on the ledger. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBatchRecord {
    #[serde(alias = "batch_id")]
    pub batch_id: String,
    pub description: String,
    /// Block time of the write, seconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(alias = "created_by")]
    pub created_by: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLabTest {
    pub test_id: String,
    pub batch_id: String,
    pub result: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCertificate {
    pub cert_id: String,
    pub batch_id: String,
    pub issuer: String,
    pub timestamp: u64,
}

/// A mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}
