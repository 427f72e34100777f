//! Database-owned records as the REST backend serializes them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    #[default]
    Created,
    Tested,
    Certified,
    Shipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Database primary key.
    pub id: u64,
    /// Business key, unique across batches.
    pub batch_id: String,
    pub producer_name: String,
    #[serde(with = "date_format")]
    pub production_date: Date,
    pub honey_type: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub status: BatchStatus,
    /// Set only after a successful ledger write.
    #[serde(default)]
    pub blockchain_tx_hash: Option<String>,
}

impl BatchRecord {
    /// The description written on chain when none is supplied.
    pub fn chain_description(&self) -> String {
        chain_description(&self.honey_type, &self.producer_name, self.quantity)
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.blockchain_tx_hash.as_deref().filter(|h| !h.is_empty())
    }

    pub fn is_recorded(&self) -> bool {
        self.tx_hash().is_some()
    }
}

/// `"{honey_type} - {producer_name} - Qty: {quantity}kg"`
pub fn chain_description(honey_type: &str, producer_name: &str, quantity: Decimal) -> String {
    format!("{} - {} - Qty: {}kg", honey_type, producer_name, quantity)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBatch {
    pub batch_id: String,
    pub producer_name: String,
    #[serde(with = "date_format")]
    pub production_date: Date,
    pub honey_type: String,
    pub quantity: Decimal,
    pub status: BatchStatus,
}

/// Result of creating a batch: the stored record plus, when the database
/// write succeeded but the ledger write did not, a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedBatch {
    #[serde(flatten)]
    pub record: BatchRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockchain_warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabTestRecord {
    pub id: u64,
    /// Primary key of the tested batch.
    pub batch: u64,
    pub test_type: String,
    pub result: String,
    pub tested_by: String,
    #[serde(with = "date_format")]
    pub test_date: Date,
    #[serde(default)]
    pub blockchain_tx_hash: Option<String>,
}

impl LabTestRecord {
    /// Key of this test on chain.
    pub fn chain_test_id(&self) -> String {
        format!("LT-{}", self.id)
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.blockchain_tx_hash.as_deref().filter(|h| !h.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewLabTest {
    pub batch: u64,
    pub test_type: String,
    pub result: String,
    pub tested_by: String,
    #[serde(with = "date_format")]
    pub test_date: Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: u64,
    pub batch: u64,
    pub certificate_id: String,
    pub issued_by: String,
    #[serde(with = "date_format")]
    pub issue_date: Date,
    #[serde(with = "date_format")]
    pub expiry_date: Date,
    #[serde(default)]
    pub blockchain_tx_hash: Option<String>,
}

impl CertificateRecord {
    pub fn tx_hash(&self) -> Option<&str> {
        self.blockchain_tx_hash.as_deref().filter(|h| !h.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCertificate {
    pub batch: u64,
    pub certificate_id: String,
    pub issued_by: String,
    #[serde(with = "date_format")]
    pub issue_date: Date,
    #[serde(with = "date_format")]
    pub expiry_date: Date,
}

/// Outcome of a record-on-chain request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome<T> {
    pub record: T,
    pub tx_hash: String,
    /// The record already carried a hash; nothing was written.
    pub already_recorded: bool,
}

/// `YYYY-MM-DD` dates, as Django's `DateField` serializes them.
pub mod date_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::macros::format_description;
    use time::Date;

    pub fn parse(s: &str) -> Result<Date, time::error::Parse> {
        Date::parse(s, format_description!("[year]-[month]-[day]"))
    }

    pub fn format(date: &Date) -> Result<String, time::error::Format> {
        date.format(format_description!("[year]-[month]-[day]"))
    }

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let text = format(date).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }
}
