//! In-process ledger node for tests and offline demos.
//!
//! [`SimulatedNode`] answers the JSON-RPC methods a Hardhat node answers for
//! the traceability contract, with automine and unlocked accounts. Every
//! request is recorded so callers can assert which methods were (or were
//! not) issued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_primitives::{address, keccak256, Address, U256};
use alloy_sol_types::{sol, SolInterface, SolValue};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::abi::{self, ContractAbi};
use crate::config::DEFAULT_CHAIN_ID;
use crate::connection::{InjectedWallet, WalletEvent};
use crate::record::{ChainBatchRecord, ChainCertificate, ChainLabTest};
use crate::rpc::{RpcError, RpcTransport, USER_REJECTED_CODE};

use IAsaliTrace::IAsaliTraceCalls;

/// The first two unlocked accounts of a default Hardhat node.
pub const HARDHAT_ACCOUNTS: [Address; 2] = [
    address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
    address!("70997970c51812dc3a010c7d01b50e0d17dc79c8"),
];

/// Address of the first contract deployed by the first Hardhat account.
pub const DEPLOYED_CONTRACT: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

sol! {
    /// Contract surface the simulated node executes.
    interface IAsaliTrace {
        struct Batch {
            string batchId;
            string description;
            uint256 timestamp;
            address createdBy;
        }

        struct LabTest {
            string testId;
            string batchId;
            string result;
            uint256 timestamp;
        }

        struct Certificate {
            string certId;
            string batchId;
            string issuer;
            uint256 timestamp;
        }

        function createBatch(string batchId, string description) external;
        function getBatch(string batchId) external view returns (Batch memory);
        function addLabTest(string testId, string batchId, string result) external;
        function getLabTest(string testId) external view returns (LabTest memory);
        function issueCertificate(string certId, string batchId, string issuer) external;
        function getCertificate(string certId) external view returns (Certificate memory);
    }
}

/// Compiler artifact of the traceability contract (ABI only).
pub const ASALI_TRACE_ABI: &str = r#"{
  "contractName": "AsaliTrace",
  "abi": [
    {
      "type": "event", "name": "BatchCreated", "anonymous": false,
      "inputs": [{"name": "batchId", "type": "string", "indexed": false}]
    },
    {
      "type": "function", "name": "createBatch", "stateMutability": "nonpayable",
      "inputs": [
        {"name": "batchId", "type": "string"},
        {"name": "description", "type": "string"}
      ],
      "outputs": []
    },
    {
      "type": "function", "name": "getBatch", "stateMutability": "view",
      "inputs": [{"name": "batchId", "type": "string"}],
      "outputs": [{
        "name": "", "type": "tuple", "internalType": "struct AsaliTrace.Batch",
        "components": [
          {"name": "batchId", "type": "string"},
          {"name": "description", "type": "string"},
          {"name": "timestamp", "type": "uint256"},
          {"name": "createdBy", "type": "address"}
        ]
      }]
    },
    {
      "type": "function", "name": "addLabTest", "stateMutability": "nonpayable",
      "inputs": [
        {"name": "testId", "type": "string"},
        {"name": "batchId", "type": "string"},
        {"name": "result", "type": "string"}
      ],
      "outputs": []
    },
    {
      "type": "function", "name": "getLabTest", "stateMutability": "view",
      "inputs": [{"name": "testId", "type": "string"}],
      "outputs": [{
        "name": "", "type": "tuple", "internalType": "struct AsaliTrace.LabTest",
        "components": [
          {"name": "testId", "type": "string"},
          {"name": "batchId", "type": "string"},
          {"name": "result", "type": "string"},
          {"name": "timestamp", "type": "uint256"}
        ]
      }]
    },
    {
      "type": "function", "name": "issueCertificate", "stateMutability": "nonpayable",
      "inputs": [
        {"name": "certId", "type": "string"},
        {"name": "batchId", "type": "string"},
        {"name": "issuer", "type": "string"}
      ],
      "outputs": []
    },
    {
      "type": "function", "name": "getCertificate", "stateMutability": "view",
      "inputs": [{"name": "certId", "type": "string"}],
      "outputs": [{
        "name": "", "type": "tuple", "internalType": "struct AsaliTrace.Certificate",
        "components": [
          {"name": "certId", "type": "string"},
          {"name": "batchId", "type": "string"},
          {"name": "issuer", "type": "string"},
          {"name": "timestamp", "type": "uint256"}
        ]
      }]
    }
  ]
}"#;

/// The parsed [`ASALI_TRACE_ABI`].
pub fn asali_trace_abi() -> ContractAbi {
    ContractAbi::from_json_str(ASALI_TRACE_ABI).unwrap_or_default()
}

#[derive(Default)]
struct NodeState {
    block_number: u64,
    timestamp: u64,
    nonce: u64,
    batches: HashMap<String, ChainBatchRecord>,
    lab_tests: HashMap<String, ChainLabTest>,
    certificates: HashMap<String, ChainCertificate>,
    receipts: HashMap<String, PendingReceipt>,
}

struct PendingReceipt {
    block_number: u64,
    polls_left: u32,
}

pub struct SimulatedNode {
    chain_id: u64,
    accounts: Vec<Address>,
    contract: Address,
    mining_delay: u32,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    state: Mutex<NodeState>,
    calls: Mutex<Vec<String>>,
}

impl Default for SimulatedNode {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedNode {
    pub fn new() -> Self {
        SimulatedNode {
            chain_id: DEFAULT_CHAIN_ID,
            accounts: HARDHAT_ACCOUNTS.to_vec(),
            contract: DEPLOYED_CONTRACT,
            mining_delay: 0,
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            state: Mutex::new(NodeState {
                timestamp: GENESIS_TIMESTAMP,
                ..Default::default()
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Number of `eth_getTransactionReceipt` polls answered with `null`
    /// before each receipt becomes visible.
    pub fn with_mining_delay(mut self, polls: u32) -> Self {
        self.mining_delay = polls;
        self
    }

    /// Make every `eth_sendTransaction` fail with an internal node error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every `eth_call` fail with an internal node error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn accounts(&self) -> &[Address] {
        &self.accounts
    }

    pub fn contract_address(&self) -> Address {
        self.contract
    }

    /// Timestamp of the latest block.
    pub fn block_timestamp(&self) -> u64 {
        self.state().timestamp
    }

    pub fn block_number(&self) -> u64 {
        self.state().block_number
    }

    /// Every method requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|m| *m == method).count()
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn eth_call(&self, params: &Value) -> Result<Value, RpcError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RpcError::remote(-32603, "Internal error: header not found"));
        }
        let tx = TxParams::parse(params)?;
        if tx.to != self.contract {
            return Ok(json!("0x"));
        }
        let call = decode_call(&tx.data)?;
        let state = self.state();
        // Absent records come back zero-valued, as a Solidity mapping does.
        let output = match call {
            IAsaliTraceCalls::getBatch(c) => {
                let record = state.batches.get(&c.batchId);
                IAsaliTrace::Batch {
                    batchId: record.map(|r| r.batch_id.clone()).unwrap_or_default(),
                    description: record.map(|r| r.description.clone()).unwrap_or_default(),
                    timestamp: U256::from(record.map_or(0, |r| r.timestamp)),
                    createdBy: record.map_or(Address::ZERO, |r| r.created_by),
                }
                .abi_encode()
            }
            IAsaliTraceCalls::getLabTest(c) => {
                let record = state.lab_tests.get(&c.testId);
                IAsaliTrace::LabTest {
                    testId: record.map(|r| r.test_id.clone()).unwrap_or_default(),
                    batchId: record.map(|r| r.batch_id.clone()).unwrap_or_default(),
                    result: record.map(|r| r.result.clone()).unwrap_or_default(),
                    timestamp: U256::from(record.map_or(0, |r| r.timestamp)),
                }
                .abi_encode()
            }
            IAsaliTraceCalls::getCertificate(c) => {
                let record = state.certificates.get(&c.certId);
                IAsaliTrace::Certificate {
                    certId: record.map(|r| r.cert_id.clone()).unwrap_or_default(),
                    batchId: record.map(|r| r.batch_id.clone()).unwrap_or_default(),
                    issuer: record.map(|r| r.issuer.clone()).unwrap_or_default(),
                    timestamp: U256::from(record.map_or(0, |r| r.timestamp)),
                }
                .abi_encode()
            }
            // A static call to a state-changing method has no return data.
            _ => return Ok(json!("0x")),
        };
        Ok(json!(abi::to_hex(&output)))
    }

    fn send_transaction(&self, params: &Value) -> Result<Value, RpcError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RpcError::remote(-32603, "Internal error: node rejected transaction"));
        }
        let tx = TxParams::parse(params)?;
        let from = tx
            .from
            .filter(|a| self.accounts.contains(a))
            .ok_or_else(|| RpcError::remote(-32000, "unknown account"))?;
        if tx.to != self.contract {
            return Err(RpcError::remote(-32000, "no contract code at target address"));
        }
        let call = decode_call(&tx.data)?;

        let mut state = self.state();
        let timestamp = state.timestamp + 1;
        match call {
            IAsaliTraceCalls::createBatch(c) => {
                if state.batches.contains_key(&c.batchId) {
                    return Err(revert("Batch already exists"));
                }
                let record = ChainBatchRecord {
                    batch_id: c.batchId.clone(),
                    description: c.description,
                    timestamp,
                    created_by: from,
                };
                state.batches.insert(c.batchId, record);
            }
            IAsaliTraceCalls::addLabTest(c) => {
                if state.lab_tests.contains_key(&c.testId) {
                    return Err(revert("Lab test already exists"));
                }
                let record = ChainLabTest {
                    test_id: c.testId.clone(),
                    batch_id: c.batchId,
                    result: c.result,
                    timestamp,
                };
                state.lab_tests.insert(c.testId, record);
            }
            IAsaliTraceCalls::issueCertificate(c) => {
                if state.certificates.contains_key(&c.certId) {
                    return Err(revert("Certificate already exists"));
                }
                let record = ChainCertificate {
                    cert_id: c.certId.clone(),
                    batch_id: c.batchId,
                    issuer: c.issuer,
                    timestamp,
                };
                state.certificates.insert(c.certId, record);
            }
            // View methods sent as transactions change nothing but still mine.
            _ => {}
        }

        state.nonce += 1;
        state.block_number += 1;
        state.timestamp = timestamp;
        let mut preimage = state.nonce.to_be_bytes().to_vec();
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(&tx.data);
        let tx_hash = abi::to_hex(keccak256(&preimage).as_slice());
        let receipt = PendingReceipt {
            block_number: state.block_number,
            polls_left: self.mining_delay,
        };
        state.receipts.insert(tx_hash.clone(), receipt);
        Ok(json!(tx_hash))
    }

    fn receipt(&self, params: &Value) -> Result<Value, RpcError> {
        let hash = params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("expected a transaction hash"))?;
        let mut state = self.state();
        let Some(pending) = state.receipts.get_mut(hash) else {
            return Ok(Value::Null);
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return Ok(Value::Null);
        }
        Ok(json!({
            "transactionHash": hash,
            "blockNumber": format!("0x{:x}", pending.block_number),
            "status": "0x1",
        }))
    }
}

#[async_trait]
impl RpcTransport for SimulatedNode {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(method.to_string());
        match method {
            "eth_chainId" => Ok(json!(format!("0x{:x}", self.chain_id))),
            "eth_accounts" | "eth_requestAccounts" => Ok(json!(self
                .accounts
                .iter()
                .map(Address::to_string)
                .collect::<Vec<_>>())),
            "eth_blockNumber" => Ok(json!(format!("0x{:x}", self.block_number()))),
            "eth_call" => self.eth_call(&params),
            "eth_sendTransaction" => self.send_transaction(&params),
            "eth_getTransactionReceipt" => self.receipt(&params),
            other => Err(RpcError::remote(
                -32601,
                format!("Method {} is not supported", other),
            )),
        }
    }

    fn endpoint(&self) -> &str {
        "simulated://hardhat"
    }
}

struct TxParams {
    from: Option<Address>,
    to: Address,
    data: Vec<u8>,
}

impl TxParams {
    fn parse(params: &Value) -> Result<Self, RpcError> {
        let tx = params
            .get(0)
            .ok_or_else(|| invalid_params("missing transaction object"))?;
        let address = |field: &str| -> Result<Option<Address>, RpcError> {
            tx.get(field)
                .and_then(Value::as_str)
                .map(|s| s.parse::<Address>().map_err(|e| invalid_params(&e.to_string())))
                .transpose()
        };
        let to = address("to")?.ok_or_else(|| invalid_params("missing 'to'"))?;
        let data = tx
            .get("data")
            .and_then(Value::as_str)
            .map(abi::from_hex)
            .transpose()
            .map_err(|e| invalid_params(&e.to_string()))?
            .unwrap_or_default();
        Ok(TxParams {
            from: address("from")?,
            to,
            data,
        })
    }
}

fn decode_call(data: &[u8]) -> Result<IAsaliTraceCalls, RpcError> {
    IAsaliTraceCalls::abi_decode(data).map_err(|e| match e {
        alloy_sol_types::Error::UnknownSelector { .. } => {
            revert("function selector was not recognized")
        }
        other => invalid_params(&other.to_string()),
    })
}

fn invalid_params(message: &str) -> RpcError {
    RpcError::remote(-32602, format!("invalid params: {}", message))
}

/// A contract revert the way Hardhat reports it.
fn revert(reason: &str) -> RpcError {
    RpcError::Remote {
        code: 3,
        message: format!("execution reverted: {}", reason),
        data: Some(json!(abi::to_hex(&abi::encode_revert_reason(reason)))),
    }
}

// ──────────────────────────────────────────────
// Wallet
// ──────────────────────────────────────────────

/// An injected wallet backed by a [`SimulatedNode`].
///
/// Prompts (`eth_requestAccounts`, `eth_sendTransaction`) succeed unless
/// rejection is switched on, in which case they fail with code 4001.
pub struct SimulatedWallet {
    transport: Arc<WalletTransport>,
    events: broadcast::Sender<WalletEvent>,
}

struct WalletTransport {
    node: Arc<SimulatedNode>,
    reject: AtomicBool,
}

impl SimulatedWallet {
    pub fn new(node: Arc<SimulatedNode>) -> Self {
        let (events, _) = broadcast::channel(16);
        SimulatedWallet {
            transport: Arc::new(WalletTransport {
                node,
                reject: AtomicBool::new(false),
            }),
            events,
        }
    }

    pub fn set_reject(&self, reject: bool) {
        self.transport.reject.store(reject, Ordering::SeqCst);
    }

    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }
}

impl InjectedWallet for SimulatedWallet {
    fn transport(&self) -> Arc<dyn RpcTransport> {
        self.transport.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RpcTransport for WalletTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let prompts = matches!(method, "eth_requestAccounts" | "eth_sendTransaction");
        if prompts && self.reject.load(Ordering::SeqCst) {
            return Err(RpcError::remote(
                USER_REJECTED_CODE,
                "User rejected the request.",
            ));
        }
        self.node.request(method, params).await
    }

    fn endpoint(&self) -> &str {
        "simulated://wallet"
    }
}

#[cfg(test)]
mod tests {
    use alloy_sol_types::SolCall;

    use super::*;
    use crate::client::{
        ADD_LAB_TEST, CREATE_BATCH, GET_BATCH, GET_CERTIFICATE, GET_LAB_TEST, ISSUE_CERTIFICATE,
    };

    #[test]
    fn bundled_abi_has_contract_surface() {
        let abi = asali_trace_abi();
        for name in [
            CREATE_BATCH,
            GET_BATCH,
            ADD_LAB_TEST,
            GET_LAB_TEST,
            ISSUE_CERTIFICATE,
            GET_CERTIFICATE,
        ] {
            assert!(abi.function(name).is_some(), "missing {}", name);
        }
        assert!(abi.function("BatchCreated").is_none());
    }

    #[test]
    fn bundled_abi_matches_node_selectors() {
        let abi = asali_trace_abi();
        assert_eq!(
            abi.function(CREATE_BATCH).unwrap().selector().0,
            IAsaliTrace::createBatchCall::SELECTOR
        );
        assert_eq!(
            abi.function(GET_BATCH).unwrap().selector().0,
            IAsaliTrace::getBatchCall::SELECTOR
        );
        assert_eq!(
            abi.function(ISSUE_CERTIFICATE).unwrap().selector().0,
            IAsaliTrace::issueCertificateCall::SELECTOR
        );
    }

    #[test]
    fn hardhat_account_constants() {
        assert_eq!(
            HARDHAT_ACCOUNTS[0].to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert_eq!(
            DEPLOYED_CONTRACT,
            "0x5fbdb2315678afecb367f032d93f642f64180aa3"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_create_reverts_with_reason() {
        let node = SimulatedNode::new();
        let data = IAsaliTrace::createBatchCall {
            batchId: "B1".into(),
            description: "x".into(),
        }
        .abi_encode();
        let tx = json!([{
            "from": HARDHAT_ACCOUNTS[0].to_string(),
            "to": DEPLOYED_CONTRACT.to_string(),
            "data": abi::to_hex(&data),
        }]);
        node.request("eth_sendTransaction", tx.clone()).await.unwrap();
        let err = node.request("eth_sendTransaction", tx).await.unwrap_err();
        let data = abi::from_hex(err.revert_data().unwrap()).unwrap();
        assert_eq!(
            abi::decode_revert_reason(&data).as_deref(),
            Some("Batch already exists")
        );
        assert_eq!(node.block_number(), 1);
    }

    #[tokio::test]
    async fn unknown_selector_reverts() {
        let node = SimulatedNode::new();
        let tx = json!([{
            "from": HARDHAT_ACCOUNTS[0].to_string(),
            "to": DEPLOYED_CONTRACT.to_string(),
            "data": "0xdeadbeef",
        }]);
        let err = node.request("eth_sendTransaction", tx).await.unwrap_err();
        assert!(err.revert_data().is_some());
        assert_eq!(node.block_number(), 0);
    }

    #[tokio::test]
    async fn unknown_sender_rejected() {
        let node = SimulatedNode::new();
        let tx = json!([{
            "from": "0x0000000000000000000000000000000000000001",
            "to": DEPLOYED_CONTRACT.to_string(),
            "data": "0x",
        }]);
        let err = node.request("eth_sendTransaction", tx).await.unwrap_err();
        assert_eq!(err, RpcError::remote(-32000, "unknown account"));
    }

    #[tokio::test]
    async fn wallet_rejects_prompts_only() {
        let node = Arc::new(SimulatedNode::new());
        let wallet = SimulatedWallet::new(node.clone());
        wallet.set_reject(true);
        let transport = wallet.transport();
        assert!(transport
            .request("eth_requestAccounts", json!([]))
            .await
            .unwrap_err()
            .is_user_rejection());
        assert_eq!(
            transport.request("eth_chainId", json!([])).await.unwrap(),
            json!("0x7a69")
        );
        assert_eq!(node.calls(), vec!["eth_chainId".to_string()]);
    }
}
