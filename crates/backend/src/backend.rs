use asali_ledger::ChainBatchRecord;
use async_trait::async_trait;

use crate::error::BackendError;
use crate::model::{
    BatchRecord, CertificateRecord, CreatedBatch, LabTestRecord, NewBatch, NewCertificate,
    NewLabTest, RecordOutcome,
};

/// The database side of AsaliTrace.
///
/// The backend owns the workflow records and holds the server-side ledger
/// key: recording on chain goes through it so that the transaction and the
/// database update happen together.
#[async_trait]
pub trait TraceBackend: Send + Sync {
    async fn list_batches(&self) -> Result<Vec<BatchRecord>, BackendError>;

    /// Look a batch up by business key. `None` when no batch has that key.
    async fn find_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, BackendError> {
        Ok(self
            .list_batches()
            .await?
            .into_iter()
            .find(|b| b.batch_id == batch_id))
    }

    async fn get_batch(&self, id: u64) -> Result<BatchRecord, BackendError>;

    /// Store a batch, then try to write it on chain. A failed ledger write
    /// does not undo the database write; it comes back as a warning.
    async fn create_batch(&self, batch: NewBatch) -> Result<CreatedBatch, BackendError>;

    /// Write an existing batch on chain (default description when `None`).
    async fn record_batch_on_chain(
        &self,
        id: u64,
        description: Option<&str>,
    ) -> Result<RecordOutcome<BatchRecord>, BackendError>;

    /// Read a batch from the ledger through the backend's own node.
    async fn verify_batch_on_chain(
        &self,
        batch_id: &str,
    ) -> Result<Option<ChainBatchRecord>, BackendError>;

    async fn list_lab_tests(&self) -> Result<Vec<LabTestRecord>, BackendError>;

    async fn create_lab_test(&self, test: NewLabTest) -> Result<LabTestRecord, BackendError>;

    async fn record_lab_test_on_chain(
        &self,
        id: u64,
    ) -> Result<RecordOutcome<LabTestRecord>, BackendError>;

    async fn list_certificates(&self) -> Result<Vec<CertificateRecord>, BackendError>;

    async fn create_certificate(
        &self,
        certificate: NewCertificate,
    ) -> Result<CertificateRecord, BackendError>;

    async fn record_certificate_on_chain(
        &self,
        id: u64,
    ) -> Result<RecordOutcome<CertificateRecord>, BackendError>;
}
