use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use asali_backend::{
    BackendError, BatchRecord, CertificateRecord, LabTestRecord, RecordOutcome, TraceBackend,
};
use asali_ledger::{ChainCertificate, ChainClient, ChainError, ChainLabTest, ConnectionManager};

use crate::error::VerifyError;
use crate::result::VerificationResult;

/// Reconciles the database and ledger views of batches, and routes
/// record-on-chain requests through the backend.
///
/// Verification is read-only: it never writes to either store, so repeated
/// calls against unchanged stores give equal results.
pub struct VerificationCoordinator<B> {
    chain: ChainClient,
    backend: B,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a record as being written until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl<B: TraceBackend> VerificationCoordinator<B> {
    pub fn new(chain: ChainClient, backend: B) -> Self {
        VerificationCoordinator {
            chain,
            backend,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn chain(&self) -> &ChainClient {
        &self.chain
    }

    /// Verify one batch through the active connection.
    ///
    /// Fails with `NotConnected` when no connection is active. A batch
    /// missing from the database is `None`, not an error. Configuration and
    /// wrong-chain errors are fatal; any other ledger failure is reported in
    /// the result as `ChainReadFailed`.
    pub async fn verify(
        &self,
        connection: &ConnectionManager,
        batch_id: &str,
    ) -> Result<VerificationResult, VerifyError> {
        let handle = connection.active_handle()?;

        let database_record = match self.backend.find_batch(batch_id).await {
            Ok(record) => record,
            Err(BackendError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        let chain = match self.chain.read_batch(&handle, batch_id).await {
            Ok(record) => Ok(record),
            Err(e @ (ChainError::Configuration(_) | ChainError::WrongChain { .. })) => {
                return Err(e.into())
            }
            Err(e) => {
                tracing::warn!(batch_id, error = %e, "ledger read failed during verification");
                Err(e.to_string())
            }
        };

        let result = VerificationResult::reconcile(batch_id, database_record, chain);
        tracing::info!(batch_id, matched = result.matched, reason = %result.reason, "batch verified");
        Ok(result)
    }

    /// Verify through the backend's own ledger node; no connection needed.
    pub async fn verify_via_backend(
        &self,
        batch_id: &str,
    ) -> Result<VerificationResult, VerifyError> {
        let database_record = match self.backend.find_batch(batch_id).await {
            Ok(record) => record,
            Err(BackendError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        let chain = match self.backend.verify_batch_on_chain(batch_id).await {
            Ok(record) => Ok(record),
            Err(e @ BackendError::Unauthorized { .. }) => return Err(e.into()),
            Err(e) => Err(e.to_string()),
        };
        Ok(VerificationResult::reconcile(batch_id, database_record, chain))
    }

    pub async fn verify_lab_test(
        &self,
        connection: &ConnectionManager,
        test_id: &str,
    ) -> Result<Option<ChainLabTest>, VerifyError> {
        let handle = connection.active_handle()?;
        Ok(self.chain.read_lab_test(&handle, test_id).await?)
    }

    pub async fn verify_certificate(
        &self,
        connection: &ConnectionManager,
        cert_id: &str,
    ) -> Result<Option<ChainCertificate>, VerifyError> {
        let handle = connection.active_handle()?;
        Ok(self.chain.read_certificate(&handle, cert_id).await?)
    }

    /// Ask the backend to write a batch on chain.
    ///
    /// The backend holds the signing key and updates the database record in
    /// the same request. Not idempotent at the contract level; an
    /// overlapping call for the same batch is refused with `RecordInFlight`.
    pub async fn record_batch_on_chain(
        &self,
        id: u64,
        description: Option<&str>,
    ) -> Result<RecordOutcome<BatchRecord>, VerifyError> {
        let _guard = self.begin("batch", id)?;
        Ok(self.backend.record_batch_on_chain(id, description).await?)
    }

    pub async fn record_lab_test_on_chain(
        &self,
        id: u64,
    ) -> Result<RecordOutcome<LabTestRecord>, VerifyError> {
        let _guard = self.begin("lab test", id)?;
        Ok(self.backend.record_lab_test_on_chain(id).await?)
    }

    pub async fn record_certificate_on_chain(
        &self,
        id: u64,
    ) -> Result<RecordOutcome<CertificateRecord>, VerifyError> {
        let _guard = self.begin("certificate", id)?;
        Ok(self.backend.record_certificate_on_chain(id).await?)
    }

    fn begin(&self, kind: &str, id: u64) -> Result<InFlight<'_>, VerifyError> {
        let key = format!("{}:{}", kind, id);
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(key.clone()) {
            return Err(VerifyError::RecordInFlight {
                kind: kind.to_string(),
                id,
            });
        }
        Ok(InFlight {
            set: &self.in_flight,
            key,
        })
    }
}
