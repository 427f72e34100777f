//! In-process backend with the same semantics as the REST service.
//!
//! Holds records in memory and, when a ledger is attached, performs the
//! server-side dual write with its own signing account.

use std::collections::BTreeMap;

use asali_ledger::{Account, ChainBatchRecord, ChainClient, ChainError, ChainHandle};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::TraceBackend;
use crate::error::BackendError;
use crate::model::{
    BatchRecord, BatchStatus, CertificateRecord, CreatedBatch, LabTestRecord, NewBatch,
    NewCertificate, NewLabTest, RecordOutcome,
};

const NO_LEDGER: &str = "no ledger node attached to this backend";

#[derive(Default)]
struct Store {
    next_id: u64,
    batches: BTreeMap<u64, BatchRecord>,
    lab_tests: BTreeMap<u64, LabTestRecord>,
    certificates: BTreeMap<u64, CertificateRecord>,
}

impl Store {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn batch(&self, id: u64) -> Result<&BatchRecord, BackendError> {
        self.batches
            .get(&id)
            .ok_or_else(|| BackendError::not_found("batch", id))
    }
}

/// The ledger binding the backend writes with.
struct Ledger {
    client: ChainClient,
    handle: ChainHandle,
}

#[derive(Default)]
pub struct InMemoryBackend {
    store: Mutex<Store>,
    ledger: Option<Ledger>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a ledger; writes are signed by `account`.
    pub fn with_chain(mut self, client: ChainClient, account: Account) -> Self {
        self.ledger = Some(Ledger {
            client,
            handle: ChainHandle::Signing(account),
        });
        self
    }

    /// Set a batch's transaction hash directly, as an administrator would
    /// after recording the batch by other means.
    pub async fn attach_tx_hash(&self, batch_id: &str, tx_hash: &str) -> Result<(), BackendError> {
        let mut store = self.store.lock().await;
        let batch = store
            .batches
            .values_mut()
            .find(|b| b.batch_id == batch_id)
            .ok_or_else(|| BackendError::not_found("batch", batch_id))?;
        batch.blockchain_tx_hash = Some(tx_hash.to_string());
        Ok(())
    }

    fn ledger(&self) -> Result<&Ledger, BackendError> {
        self.ledger
            .as_ref()
            .ok_or_else(|| BackendError::ChainUnavailable(NO_LEDGER.to_string()))
    }
}

/// A failed read means the node could not be used at all.
fn write_failure(err: ChainError) -> BackendError {
    match err {
        ChainError::ChainRead(message) => BackendError::ChainUnavailable(message),
        other => BackendError::ChainWrite(other.to_string()),
    }
}

#[async_trait]
impl TraceBackend for InMemoryBackend {
    async fn list_batches(&self) -> Result<Vec<BatchRecord>, BackendError> {
        Ok(self.store.lock().await.batches.values().cloned().collect())
    }

    async fn get_batch(&self, id: u64) -> Result<BatchRecord, BackendError> {
        self.store.lock().await.batch(id).cloned()
    }

    async fn create_batch(&self, batch: NewBatch) -> Result<CreatedBatch, BackendError> {
        if batch.batch_id.trim().is_empty() {
            return Err(BackendError::Validation("batch_id may not be blank".into()));
        }
        let record = {
            let mut store = self.store.lock().await;
            if store.batches.values().any(|b| b.batch_id == batch.batch_id) {
                return Err(BackendError::Validation(
                    "batch with this batch id already exists".into(),
                ));
            }
            let id = store.allocate_id();
            let record = BatchRecord {
                id,
                batch_id: batch.batch_id,
                producer_name: batch.producer_name,
                production_date: batch.production_date,
                honey_type: batch.honey_type,
                quantity: batch.quantity,
                status: batch.status,
                blockchain_tx_hash: None,
            };
            store.batches.insert(id, record.clone());
            record
        };

        let written = match self.ledger() {
            Ok(ledger) => ledger
                .client
                .write_batch(&ledger.handle, &record.batch_id, &record.chain_description())
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match written {
            Ok(receipt) => {
                let mut store = self.store.lock().await;
                let stored = store
                    .batches
                    .get_mut(&record.id)
                    .ok_or_else(|| BackendError::not_found("batch", record.id))?;
                stored.blockchain_tx_hash = Some(receipt.tx_hash);
                Ok(CreatedBatch {
                    record: stored.clone(),
                    blockchain_warning: None,
                })
            }
            Err(message) => {
                tracing::warn!(batch_id = %record.batch_id, error = %message, "batch stored without ledger record");
                Ok(CreatedBatch {
                    record,
                    blockchain_warning: Some(format!(
                        "Batch saved to database but blockchain write failed: {}",
                        message
                    )),
                })
            }
        }
    }

    async fn record_batch_on_chain(
        &self,
        id: u64,
        description: Option<&str>,
    ) -> Result<RecordOutcome<BatchRecord>, BackendError> {
        let batch = self.get_batch(id).await?;
        if let Some(hash) = batch.tx_hash() {
            return Ok(RecordOutcome {
                tx_hash: hash.to_string(),
                record: batch,
                already_recorded: true,
            });
        }
        let ledger = self.ledger()?;
        let description = description
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| batch.chain_description());
        let receipt = ledger
            .client
            .write_batch(&ledger.handle, &batch.batch_id, &description)
            .await
            .map_err(write_failure)?;

        let mut store = self.store.lock().await;
        let stored = store
            .batches
            .get_mut(&id)
            .ok_or_else(|| BackendError::not_found("batch", id))?;
        stored.blockchain_tx_hash = Some(receipt.tx_hash.clone());
        Ok(RecordOutcome {
            record: stored.clone(),
            tx_hash: receipt.tx_hash,
            already_recorded: false,
        })
    }

    async fn verify_batch_on_chain(
        &self,
        batch_id: &str,
    ) -> Result<Option<ChainBatchRecord>, BackendError> {
        let ledger = self.ledger()?;
        ledger
            .client
            .read_batch(&ledger.handle, batch_id)
            .await
            .map_err(|e| BackendError::ChainUnavailable(e.to_string()))
    }

    async fn list_lab_tests(&self) -> Result<Vec<LabTestRecord>, BackendError> {
        Ok(self.store.lock().await.lab_tests.values().cloned().collect())
    }

    async fn create_lab_test(&self, test: NewLabTest) -> Result<LabTestRecord, BackendError> {
        let mut store = self.store.lock().await;
        if store.batches.get(&test.batch).is_none() {
            return Err(BackendError::Validation(format!(
                "invalid batch pk \"{}\": object does not exist",
                test.batch
            )));
        }
        let id = store.allocate_id();
        let record = LabTestRecord {
            id,
            batch: test.batch,
            test_type: test.test_type,
            result: test.result,
            tested_by: test.tested_by,
            test_date: test.test_date,
            blockchain_tx_hash: None,
        };
        store.lab_tests.insert(id, record.clone());
        if let Some(batch) = store.batches.get_mut(&record.batch) {
            if batch.status == BatchStatus::Created {
                batch.status = BatchStatus::Tested;
            }
        }
        Ok(record)
    }

    async fn record_lab_test_on_chain(
        &self,
        id: u64,
    ) -> Result<RecordOutcome<LabTestRecord>, BackendError> {
        let (test, batch_id) = {
            let store = self.store.lock().await;
            let test = store
                .lab_tests
                .get(&id)
                .cloned()
                .ok_or_else(|| BackendError::not_found("lab test", id))?;
            let batch_id = store.batch(test.batch)?.batch_id.clone();
            (test, batch_id)
        };
        if let Some(hash) = test.tx_hash() {
            return Ok(RecordOutcome {
                tx_hash: hash.to_string(),
                record: test,
                already_recorded: true,
            });
        }
        let ledger = self.ledger()?;
        let receipt = ledger
            .client
            .write_lab_test(&ledger.handle, &test.chain_test_id(), &batch_id, &test.result)
            .await
            .map_err(write_failure)?;

        let mut store = self.store.lock().await;
        let stored = store
            .lab_tests
            .get_mut(&id)
            .ok_or_else(|| BackendError::not_found("lab test", id))?;
        stored.blockchain_tx_hash = Some(receipt.tx_hash.clone());
        Ok(RecordOutcome {
            record: stored.clone(),
            tx_hash: receipt.tx_hash,
            already_recorded: false,
        })
    }

    async fn list_certificates(&self) -> Result<Vec<CertificateRecord>, BackendError> {
        Ok(self
            .store
            .lock()
            .await
            .certificates
            .values()
            .cloned()
            .collect())
    }

    async fn create_certificate(
        &self,
        certificate: NewCertificate,
    ) -> Result<CertificateRecord, BackendError> {
        let mut store = self.store.lock().await;
        if store.batches.get(&certificate.batch).is_none() {
            return Err(BackendError::Validation(format!(
                "invalid batch pk \"{}\": object does not exist",
                certificate.batch
            )));
        }
        if store.certificates.values().any(|c| c.batch == certificate.batch) {
            return Err(BackendError::Validation(
                "certificate with this batch already exists".into(),
            ));
        }
        if store
            .certificates
            .values()
            .any(|c| c.certificate_id == certificate.certificate_id)
        {
            return Err(BackendError::Validation(
                "certificate with this certificate id already exists".into(),
            ));
        }
        if certificate.expiry_date < certificate.issue_date {
            return Err(BackendError::Validation(
                "expiry_date precedes issue_date".into(),
            ));
        }
        let id = store.allocate_id();
        let record = CertificateRecord {
            id,
            batch: certificate.batch,
            certificate_id: certificate.certificate_id,
            issued_by: certificate.issued_by,
            issue_date: certificate.issue_date,
            expiry_date: certificate.expiry_date,
            blockchain_tx_hash: None,
        };
        store.certificates.insert(id, record.clone());
        if let Some(batch) = store.batches.get_mut(&record.batch) {
            if batch.status != BatchStatus::Shipped {
                batch.status = BatchStatus::Certified;
            }
        }
        Ok(record)
    }

    async fn record_certificate_on_chain(
        &self,
        id: u64,
    ) -> Result<RecordOutcome<CertificateRecord>, BackendError> {
        let (certificate, batch_id) = {
            let store = self.store.lock().await;
            let certificate = store
                .certificates
                .get(&id)
                .cloned()
                .ok_or_else(|| BackendError::not_found("certificate", id))?;
            let batch_id = store.batch(certificate.batch)?.batch_id.clone();
            (certificate, batch_id)
        };
        if let Some(hash) = certificate.tx_hash() {
            return Ok(RecordOutcome {
                tx_hash: hash.to_string(),
                record: certificate,
                already_recorded: true,
            });
        }
        let ledger = self.ledger()?;
        let receipt = ledger
            .client
            .write_certificate(
                &ledger.handle,
                &certificate.certificate_id,
                &batch_id,
                &certificate.issued_by,
            )
            .await
            .map_err(write_failure)?;

        let mut store = self.store.lock().await;
        let stored = store
            .certificates
            .get_mut(&id)
            .ok_or_else(|| BackendError::not_found("certificate", id))?;
        stored.blockchain_tx_hash = Some(receipt.tx_hash.clone());
        Ok(RecordOutcome {
            record: stored.clone(),
            tx_hash: receipt.tx_hash,
            already_recorded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use asali_ledger::simulated::{asali_trace_abi, SimulatedNode};
    use asali_ledger::{ContractConfig, Provider, RpcTransport};
    use rust_decimal::Decimal;

    use super::*;

    fn new_batch(batch_id: &str) -> NewBatch {
        NewBatch {
            batch_id: batch_id.to_string(),
            producer_name: "Amani".into(),
            production_date: time::macros::date!(2024 - 05 - 10),
            honey_type: "Acacia".into(),
            quantity: Decimal::new(1250, 2),
            status: BatchStatus::Created,
        }
    }

    fn with_node(node: &Arc<SimulatedNode>) -> InMemoryBackend {
        let transport: Arc<dyn RpcTransport> = node.clone();
        let account = Account::new(Provider::new(transport, node.chain_id()), node.accounts()[0]);
        let client = ChainClient::new(
            ContractConfig::new(node.chain_id())
                .with_address(node.contract_address())
                .with_abi(asali_trace_abi())
                .with_receipt_poll_interval(Duration::from_millis(1)),
        );
        InMemoryBackend::new().with_chain(client, account)
    }

    #[tokio::test]
    async fn create_writes_both_stores() {
        let node = Arc::new(SimulatedNode::new());
        let backend = with_node(&node);
        let created = backend.create_batch(new_batch("B1")).await.unwrap();
        assert!(created.blockchain_warning.is_none());
        assert!(created.record.is_recorded());

        let on_chain = backend.verify_batch_on_chain("B1").await.unwrap().unwrap();
        assert_eq!(on_chain.description, "Acacia - Amani - Qty: 12.50kg");
    }

    #[tokio::test]
    async fn failed_chain_write_keeps_database_record() {
        let node = Arc::new(SimulatedNode::new());
        node.set_fail_writes(true);
        let backend = with_node(&node);

        let created = backend.create_batch(new_batch("B1")).await.unwrap();
        assert!(created
            .blockchain_warning
            .as_deref()
            .unwrap()
            .starts_with("Batch saved to database but blockchain write failed"));
        assert!(!created.record.is_recorded());
        assert_eq!(backend.find_batch("B1").await.unwrap(), Some(created.record));
    }

    #[tokio::test]
    async fn record_on_chain_then_already_recorded() {
        let node = Arc::new(SimulatedNode::new());
        node.set_fail_writes(true);
        let backend = with_node(&node);
        let id = backend.create_batch(new_batch("B1")).await.unwrap().record.id;
        node.set_fail_writes(false);

        let first = backend
            .record_batch_on_chain(id, Some("Acacia Honey"))
            .await
            .unwrap();
        assert!(!first.already_recorded);
        let second = backend.record_batch_on_chain(id, None).await.unwrap();
        assert!(second.already_recorded);
        assert_eq!(second.tx_hash, first.tx_hash);
        assert_eq!(node.call_count("eth_sendTransaction"), 2);
    }

    #[tokio::test]
    async fn record_without_ledger_is_unavailable() {
        let backend = InMemoryBackend::new();
        let created = backend.create_batch(new_batch("B1")).await.unwrap();
        assert!(created.blockchain_warning.is_some());
        let err = backend
            .record_batch_on_chain(created.record.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ChainUnavailable(_)));
    }

    #[tokio::test]
    async fn duplicate_business_key_rejected() {
        let backend = InMemoryBackend::new();
        backend.create_batch(new_batch("B1")).await.unwrap();
        let err = backend.create_batch(new_batch("B1")).await.unwrap_err();
        assert!(matches!(err, BackendError::Validation(_)));
    }

    #[tokio::test]
    async fn lab_test_and_certificate_flow() {
        let node = Arc::new(SimulatedNode::new());
        let backend = with_node(&node);
        let batch = backend.create_batch(new_batch("B1")).await.unwrap().record;

        let test = backend
            .create_lab_test(NewLabTest {
                batch: batch.id,
                test_type: "moisture".into(),
                result: "17.5%".into(),
                tested_by: "KEBS Lab".into(),
                test_date: time::macros::date!(2024 - 05 - 11),
            })
            .await
            .unwrap();
        assert_eq!(backend.get_batch(batch.id).await.unwrap().status, BatchStatus::Tested);
        let recorded = backend.record_lab_test_on_chain(test.id).await.unwrap();
        assert_eq!(recorded.record.chain_test_id(), format!("LT-{}", test.id));

        let cert = backend
            .create_certificate(NewCertificate {
                batch: batch.id,
                certificate_id: "CERT-1".into(),
                issued_by: "KEBS".into(),
                issue_date: time::macros::date!(2024 - 05 - 12),
                expiry_date: time::macros::date!(2025 - 05 - 12),
            })
            .await
            .unwrap();
        assert_eq!(
            backend.get_batch(batch.id).await.unwrap().status,
            BatchStatus::Certified
        );
        backend.record_certificate_on_chain(cert.id).await.unwrap();
        assert!(backend.list_certificates().await.unwrap()[0].tx_hash().is_some());

        let err = backend
            .create_certificate(NewCertificate {
                batch: batch.id,
                certificate_id: "CERT-2".into(),
                issued_by: "KEBS".into(),
                issue_date: time::macros::date!(2024 - 05 - 12),
                expiry_date: time::macros::date!(2025 - 05 - 12),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_batch_pk() {
        let backend = InMemoryBackend::new();
        assert_eq!(
            backend.get_batch(42).await.unwrap_err(),
            BackendError::not_found("batch", 42)
        );
    }
}
