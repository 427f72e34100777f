//! Contract calls for the traceability contract.
//!
//! Six logical operations map onto six contract methods. Every result is
//! normalized: absent records become `None`, failures become a
//! [`ChainError`]. Raw transport errors never escape.

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::Function;
use alloy_primitives::Address;
use serde_json::{json, Value};

use crate::abi;
use crate::config::ContractConfig;
use crate::error::ChainError;
use crate::handle::{Account, ChainHandle};
use crate::record::{ChainBatchRecord, ChainCertificate, ChainLabTest, TxReceipt};
use crate::rpc::RpcError;

pub const CREATE_BATCH: &str = "createBatch";
pub const GET_BATCH: &str = "getBatch";
pub const ADD_LAB_TEST: &str = "addLabTest";
pub const GET_LAB_TEST: &str = "getLabTest";
pub const ISSUE_CERTIFICATE: &str = "issueCertificate";
pub const GET_CERTIFICATE: &str = "getCertificate";

#[derive(Debug, Clone)]
pub struct ChainClient {
    config: ContractConfig,
}

impl ChainClient {
    pub fn new(config: ContractConfig) -> Self {
        ChainClient { config }
    }

    pub fn config(&self) -> &ContractConfig {
        &self.config
    }

    // ──────────────────────────────────────────────
    // Batches
    // ──────────────────────────────────────────────

    pub async fn read_batch(
        &self,
        handle: &ChainHandle,
        batch_id: &str,
    ) -> Result<Option<ChainBatchRecord>, ChainError> {
        let (contract, function) = self.bind(GET_BATCH)?;
        self.check_chain(handle)?;
        if batch_id.is_empty() {
            return Ok(None);
        }
        let Some(fields) = self
            .call(handle, contract, function, &[DynSolValue::String(batch_id.to_string())])
            .await?
        else {
            return Ok(None);
        };
        let fields = Fields::new(GET_BATCH, &fields);
        let record = ChainBatchRecord {
            batch_id: fields.string(0)?,
            description: fields.string(1)?,
            timestamp: fields.uint(2)?,
            created_by: fields.address(3)?,
        };
        if record.batch_id.is_empty() || record.created_by.is_zero() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Submit `createBatch` and wait until it is mined.
    ///
    /// Fails with `DuplicateRecord` without sending anything when the
    /// batch id is already on chain.
    pub async fn write_batch(
        &self,
        handle: &ChainHandle,
        batch_id: &str,
        description: &str,
    ) -> Result<TxReceipt, ChainError> {
        let (contract, function) = self.bind(CREATE_BATCH)?;
        let account = self.signer(handle, CREATE_BATCH)?;
        if self.read_batch(handle, batch_id).await?.is_some() {
            return Err(duplicate("batch", batch_id));
        }
        let args = [
            DynSolValue::String(batch_id.to_string()),
            DynSolValue::String(description.to_string()),
        ];
        let receipt = self
            .send(account, contract, function, &args, ("batch", batch_id))
            .await?;
        tracing::info!(batch_id, tx_hash = %receipt.tx_hash, block = receipt.block_number, "batch recorded on chain");
        Ok(receipt)
    }

    // ──────────────────────────────────────────────
    // Lab tests
    // ──────────────────────────────────────────────

    pub async fn read_lab_test(
        &self,
        handle: &ChainHandle,
        test_id: &str,
    ) -> Result<Option<ChainLabTest>, ChainError> {
        let (contract, function) = self.bind(GET_LAB_TEST)?;
        self.check_chain(handle)?;
        if test_id.is_empty() {
            return Ok(None);
        }
        let Some(fields) = self
            .call(handle, contract, function, &[DynSolValue::String(test_id.to_string())])
            .await?
        else {
            return Ok(None);
        };
        let fields = Fields::new(GET_LAB_TEST, &fields);
        let record = ChainLabTest {
            test_id: fields.string(0)?,
            batch_id: fields.string(1)?,
            result: fields.string(2)?,
            timestamp: fields.uint(3)?,
        };
        Ok((!record.test_id.is_empty()).then_some(record))
    }

    pub async fn write_lab_test(
        &self,
        handle: &ChainHandle,
        test_id: &str,
        batch_id: &str,
        result: &str,
    ) -> Result<TxReceipt, ChainError> {
        let (contract, function) = self.bind(ADD_LAB_TEST)?;
        let account = self.signer(handle, ADD_LAB_TEST)?;
        if self.read_lab_test(handle, test_id).await?.is_some() {
            return Err(duplicate("lab test", test_id));
        }
        let args = [
            DynSolValue::String(test_id.to_string()),
            DynSolValue::String(batch_id.to_string()),
            DynSolValue::String(result.to_string()),
        ];
        let receipt = self
            .send(account, contract, function, &args, ("lab test", test_id))
            .await?;
        tracing::info!(test_id, batch_id, tx_hash = %receipt.tx_hash, "lab test recorded on chain");
        Ok(receipt)
    }

    // ──────────────────────────────────────────────
    // Certificates
    // ──────────────────────────────────────────────

    pub async fn read_certificate(
        &self,
        handle: &ChainHandle,
        cert_id: &str,
    ) -> Result<Option<ChainCertificate>, ChainError> {
        let (contract, function) = self.bind(GET_CERTIFICATE)?;
        self.check_chain(handle)?;
        if cert_id.is_empty() {
            return Ok(None);
        }
        let Some(fields) = self
            .call(handle, contract, function, &[DynSolValue::String(cert_id.to_string())])
            .await?
        else {
            return Ok(None);
        };
        let fields = Fields::new(GET_CERTIFICATE, &fields);
        let record = ChainCertificate {
            cert_id: fields.string(0)?,
            batch_id: fields.string(1)?,
            issuer: fields.string(2)?,
            timestamp: fields.uint(3)?,
        };
        Ok((!record.cert_id.is_empty()).then_some(record))
    }

    pub async fn write_certificate(
        &self,
        handle: &ChainHandle,
        cert_id: &str,
        batch_id: &str,
        issuer: &str,
    ) -> Result<TxReceipt, ChainError> {
        let (contract, function) = self.bind(ISSUE_CERTIFICATE)?;
        let account = self.signer(handle, ISSUE_CERTIFICATE)?;
        if self.read_certificate(handle, cert_id).await?.is_some() {
            return Err(duplicate("certificate", cert_id));
        }
        let args = [
            DynSolValue::String(cert_id.to_string()),
            DynSolValue::String(batch_id.to_string()),
            DynSolValue::String(issuer.to_string()),
        ];
        let receipt = self
            .send(account, contract, function, &args, ("certificate", cert_id))
            .await?;
        tracing::info!(cert_id, batch_id, tx_hash = %receipt.tx_hash, "certificate recorded on chain");
        Ok(receipt)
    }

    // ──────────────────────────────────────────────
    // Plumbing
    // ──────────────────────────────────────────────

    /// Contract address and the named method, or a configuration error.
    /// Never touches the network.
    fn bind(&self, method: &str) -> Result<(Address, &Function), ChainError> {
        let (address, abi) = self.config.binding()?;
        let function = abi.function(method).ok_or_else(|| {
            ChainError::Configuration(format!("contract ABI has no '{}' method", method))
        })?;
        Ok((address, function))
    }

    fn check_chain(&self, handle: &ChainHandle) -> Result<(), ChainError> {
        if handle.chain_id() != self.config.chain_id {
            return Err(ChainError::WrongChain {
                expected: self.config.chain_id,
                actual: handle.chain_id(),
            });
        }
        Ok(())
    }

    fn signer<'h>(&self, handle: &'h ChainHandle, operation: &str) -> Result<&'h Account, ChainError> {
        let account = handle.signer().ok_or_else(|| ChainError::SignerRequired {
            operation: operation.to_string(),
        })?;
        self.check_chain(handle)?;
        Ok(account)
    }

    /// `eth_call`; `None` when the node returns no data at all.
    async fn call(
        &self,
        handle: &ChainHandle,
        contract: Address,
        function: &Function,
        args: &[DynSolValue],
    ) -> Result<Option<Vec<DynSolValue>>, ChainError> {
        let data =
            abi::encode_call(function, args).map_err(|e| ChainError::ChainRead(e.to_string()))?;
        let mut tx = json!({ "to": contract.to_string(), "data": abi::to_hex(&data) });
        if let Some(account) = handle.signer() {
            tx["from"] = json!(account.address().to_string());
        }

        let result = handle
            .provider()
            .transport()
            .request("eth_call", json!([tx, "latest"]))
            .await
            .map_err(|e| read_error(&function.name, e))?;
        let raw = result.as_str().ok_or_else(|| {
            ChainError::ChainRead(format!("{} returned a non-string result: {}", function.name, result))
        })?;
        let bytes = abi::from_hex(raw).map_err(|e| ChainError::ChainRead(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        abi::decode_output(function, &bytes)
            .map(Some)
            .map_err(|e| ChainError::ChainRead(format!("{}: {}", function.name, e)))
    }

    /// `eth_sendTransaction`, then poll for the receipt until mined.
    async fn send(
        &self,
        account: &Account,
        contract: Address,
        function: &Function,
        args: &[DynSolValue],
        key: (&str, &str),
    ) -> Result<TxReceipt, ChainError> {
        let data =
            abi::encode_call(function, args).map_err(|e| ChainError::ChainWrite(e.to_string()))?;
        let tx = json!({
            "from": account.address().to_string(),
            "to": contract.to_string(),
            "data": abi::to_hex(&data),
        });
        let transport = account.provider().transport();

        let result = transport
            .request("eth_sendTransaction", json!([tx]))
            .await
            .map_err(|e| write_error(key, e))?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| ChainError::ChainWrite(format!("unexpected transaction hash: {}", result)))?
            .to_string();
        tracing::debug!(method = %function.name, %tx_hash, "transaction submitted");

        loop {
            let receipt = transport
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await
                .map_err(|e| ChainError::ChainWrite(e.to_string()))?;
            if receipt.is_null() {
                tokio::time::sleep(self.config.receipt_poll()).await;
                continue;
            }
            return parse_receipt(&tx_hash, &receipt);
        }
    }
}

fn parse_receipt(tx_hash: &str, receipt: &Value) -> Result<TxReceipt, ChainError> {
    let quantity = |field: &str| -> Result<u64, ChainError> {
        let raw = receipt.get(field).and_then(Value::as_str).ok_or_else(|| {
            ChainError::ChainWrite(format!("receipt for {} has no {}", tx_hash, field))
        })?;
        abi::parse_quantity(raw).map_err(|e| ChainError::ChainWrite(e.to_string()))
    };
    if quantity("status")? == 0 {
        return Err(ChainError::ChainWrite(format!(
            "transaction {} reverted",
            tx_hash
        )));
    }
    Ok(TxReceipt {
        tx_hash: tx_hash.to_string(),
        block_number: quantity("blockNumber")?,
    })
}

fn duplicate(kind: &str, id: &str) -> ChainError {
    ChainError::DuplicateRecord {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

/// Revert reason carried by a remote error, if any.
fn revert_reason(err: &RpcError) -> Option<String> {
    let data = err.revert_data()?;
    abi::decode_revert_reason(&abi::from_hex(data).ok()?)
}

fn read_error(method: &str, err: RpcError) -> ChainError {
    match revert_reason(&err) {
        Some(reason) => ChainError::ChainRead(format!("{} reverted: {}", method, reason)),
        None => ChainError::ChainRead(format!("{}: {}", method, err)),
    }
}

fn write_error((kind, id): (&str, &str), err: RpcError) -> ChainError {
    if err.is_user_rejection() {
        return ChainError::Authorization("transaction rejected by user".to_string());
    }
    let reason = revert_reason(&err);
    let message = match &err {
        RpcError::Remote { message, .. } => message.clone(),
        RpcError::Transport(message) => message.clone(),
    };
    let text = reason.as_deref().unwrap_or(&message);
    if text.contains("already exists") {
        return duplicate(kind, id);
    }
    match reason {
        Some(reason) => ChainError::ChainWrite(format!("reverted: {}", reason)),
        None => ChainError::ChainWrite(message),
    }
}

/// Positional access to decoded return values.
struct Fields<'a> {
    method: &'a str,
    values: &'a [DynSolValue],
}

impl<'a> Fields<'a> {
    fn new(method: &'a str, values: &'a [DynSolValue]) -> Self {
        Fields { method, values }
    }

    fn get(&self, index: usize) -> Result<&DynSolValue, ChainError> {
        self.values.get(index).ok_or_else(|| {
            ChainError::ChainRead(format!("{} returned too few values", self.method))
        })
    }

    fn mismatch(&self, index: usize, expected: &str) -> ChainError {
        ChainError::ChainRead(format!(
            "{} value {} is not a {}",
            self.method, index, expected
        ))
    }

    fn string(&self, index: usize) -> Result<String, ChainError> {
        self.get(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(index, "string"))
    }

    fn uint(&self, index: usize) -> Result<u64, ChainError> {
        let (value, _) = self.get(index)?.as_uint().ok_or_else(|| self.mismatch(index, "uint"))?;
        u64::try_from(value).map_err(|_| self.mismatch(index, "uint64-sized timestamp"))
    }

    fn address(&self, index: usize) -> Result<Address, ChainError> {
        self.get(index)?
            .as_address()
            .ok_or_else(|| self.mismatch(index, "address"))
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
