//! Contract ABI binding.
//!
//! The contract's ABI is loaded at runtime from its compiler artifact and
//! driven through alloy's dynamic codec. A single tuple return value is
//! flattened into its components so callers see the same shape whether
//! the contract returns a struct or a list of values.

use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::hex;
use alloy_sol_types::{Revert, SolError};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("invalid ABI JSON: {0}")]
    Parse(String),
    #[error("cannot encode arguments for {function}: {message}")]
    Encode { function: String, message: String },
    #[error("cannot decode ABI data: {0}")]
    Decode(String),
}

/// Parsed contract ABI.
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    inner: JsonAbi,
}

impl ContractAbi {
    /// Parse either a compiler artifact (`{"abi": [...]}`) or a bare ABI array.
    pub fn from_json(value: &Value) -> Result<Self, AbiError> {
        let entries = match value {
            Value::Array(_) => value.clone(),
            Value::Object(obj) => obj
                .get("abi")
                .cloned()
                .ok_or_else(|| AbiError::Parse("artifact has no 'abi' member".into()))?,
            _ => return Err(AbiError::Parse("expected an array or an artifact object".into())),
        };
        let inner: JsonAbi =
            serde_json::from_value(entries).map_err(|e| AbiError::Parse(e.to_string()))?;
        Ok(ContractAbi { inner })
    }

    pub fn from_json_str(s: &str) -> Result<Self, AbiError> {
        let value: Value = serde_json::from_str(s).map_err(|e| AbiError::Parse(e.to_string()))?;
        Self::from_json(&value)
    }

    /// The named function. Overloads are not used by the contract; the
    /// first declaration wins.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.inner.function(name).and_then(|overloads| overloads.first())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.functions.is_empty()
    }
}

/// Selector followed by the encoded arguments.
pub fn encode_call(function: &Function, args: &[DynSolValue]) -> Result<Vec<u8>, AbiError> {
    function
        .abi_encode_input(args)
        .map_err(|e| AbiError::Encode {
            function: function.name.clone(),
            message: e.to_string(),
        })
}

/// Decode return data, flattening a single tuple return.
pub fn decode_output(function: &Function, data: &[u8]) -> Result<Vec<DynSolValue>, AbiError> {
    let mut values = function
        .abi_decode_output(data)
        .map_err(|e| AbiError::Decode(e.to_string()))?;
    if matches!(function.outputs.as_slice(), [only] if only.ty == "tuple") {
        if let Some(DynSolValue::Tuple(items)) = values.pop() {
            return Ok(items);
        }
    }
    Ok(values)
}

/// Extract the reason from an `Error(string)` revert payload.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    Revert::abi_decode(data).ok().map(|revert| revert.reason)
}

pub fn encode_revert_reason(reason: &str) -> Vec<u8> {
    Revert {
        reason: reason.to_string(),
    }
    .abi_encode()
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode_prefixed(bytes)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, AbiError> {
    hex::decode(s).map_err(|e| AbiError::Decode(format!("invalid hex '{}': {}", s, e)))
}

/// Parse a `0x`-prefixed hex quantity (`eth_chainId`, `blockNumber`, ...).
pub fn parse_quantity(s: &str) -> Result<u64, AbiError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| AbiError::Decode(format!("invalid quantity '{}': {}", s, e)))
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, U256};

    use super::*;

    fn batch_abi() -> ContractAbi {
        ContractAbi::from_json(&serde_json::json!({
            "contractName": "AsaliTrace",
            "abi": [
                {
                    "type": "function",
                    "name": "createBatch",
                    "stateMutability": "nonpayable",
                    "inputs": [
                        {"name": "batchId", "type": "string"},
                        {"name": "description", "type": "string"}
                    ],
                    "outputs": []
                },
                {
                    "type": "function",
                    "name": "getBatch",
                    "stateMutability": "view",
                    "inputs": [{"name": "batchId", "type": "string"}],
                    "outputs": [{
                        "name": "",
                        "type": "tuple",
                        "components": [
                            {"name": "batchId", "type": "string"},
                            {"name": "description", "type": "string"},
                            {"name": "timestamp", "type": "uint256"},
                            {"name": "createdBy", "type": "address"}
                        ]
                    }]
                },
                {"type": "event", "name": "BatchCreated", "anonymous": false, "inputs": []}
            ]
        }))
        .unwrap()
    }

    fn words(values: &[u64]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| U256::from(*v).to_be_bytes::<32>())
            .collect()
    }

    #[test]
    fn parse_artifact_skips_events() {
        let abi = batch_abi();
        let create = abi.function("createBatch").unwrap();
        assert!(abi.function("BatchCreated").is_none());
        assert_eq!(create.signature(), "createBatch(string,string)");
        assert!(!abi.is_empty());
    }

    #[test]
    fn parse_rejects_non_abi() {
        assert!(ContractAbi::from_json(&serde_json::json!({"bytecode": "0x"})).is_err());
        assert!(ContractAbi::from_json(&serde_json::json!("abi")).is_err());
        assert!(ContractAbi::from_json(&serde_json::json!([])).unwrap().is_empty());
    }

    #[test]
    fn encode_call_prefixes_selector() {
        let abi = batch_abi();
        let f = abi.function("createBatch").unwrap();
        let data = encode_call(
            f,
            &[
                DynSolValue::String("B1".into()),
                DynSolValue::String("Acacia Honey".into()),
            ],
        )
        .unwrap();
        assert_eq!(data[..4], f.selector().0);
        // 2 head words + (len + 1 word) * 2
        assert_eq!(data.len(), 4 + 32 * 2 + 64 * 2);
    }

    #[test]
    fn decode_tuple_output_flattens_fields() {
        let abi = batch_abi();
        let f = abi.function("getBatch").unwrap();
        let creator = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        let encoded = DynSolValue::Tuple(vec![DynSolValue::Tuple(vec![
            DynSolValue::String("B1".into()),
            DynSolValue::String("Acacia Honey".into()),
            DynSolValue::Uint(U256::from(1_700_000_000u64), 256),
            DynSolValue::Address(creator),
        ])])
        .abi_encode_params();

        let fields = decode_output(f, &encoded).unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[1].as_str(), Some("Acacia Honey"));
        assert_eq!(
            fields[2].as_uint(),
            Some((U256::from(1_700_000_000u64), 256))
        );
        assert_eq!(fields[3].as_address(), Some(creator));
    }

    #[test]
    fn encode_rejects_wrong_arity_and_type() {
        let abi = batch_abi();
        let f = abi.function("createBatch").unwrap();
        assert!(matches!(
            encode_call(f, &[DynSolValue::String("B1".into())]),
            Err(AbiError::Encode { .. })
        ));
        assert!(matches!(
            encode_call(
                f,
                &[
                    DynSolValue::String("B1".into()),
                    DynSolValue::Uint(U256::from(1u8), 256)
                ]
            ),
            Err(AbiError::Encode { .. })
        ));
    }

    #[test]
    fn decode_truncated_data_fails() {
        let abi = batch_abi();
        let f = abi.function("getBatch").unwrap();
        assert!(matches!(decode_output(f, &[]), Err(AbiError::Decode(_))));
        assert!(matches!(decode_output(f, &[0u8; 40]), Err(AbiError::Decode(_))));
    }

    #[test]
    fn decode_oversized_string_length_fails() {
        let abi = batch_abi();
        let f = abi.function("getBatch").unwrap();
        // Tuple pointer, two string pointers, then a string claiming u64::MAX bytes.
        let data = words(&[0x20, 0x80, 0xa0, 0, 0, u64::MAX]);
        assert!(matches!(decode_output(f, &data), Err(AbiError::Decode(_))));

        let data = words(&[0x20, u64::MAX, 0xa0, 0, 0, 0]);
        assert!(matches!(decode_output(f, &data), Err(AbiError::Decode(_))));
    }

    #[test]
    fn revert_reason() {
        let payload = encode_revert_reason("Batch already exists");
        assert_eq!(payload[..4], [0x08, 0xc3, 0x79, 0xa0]);
        assert_eq!(
            decode_revert_reason(&payload).as_deref(),
            Some("Batch already exists")
        );
        assert_eq!(decode_revert_reason(&[0xde, 0xad, 0xbe, 0xef]), None);
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x7a69").unwrap(), 31337);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(to_hex(&[0x01, 0xab]), "0x01ab");
        assert_eq!(from_hex("0x01ab").unwrap(), vec![0x01, 0xab]);
        assert!(from_hex("0x").unwrap().is_empty());
    }
}
