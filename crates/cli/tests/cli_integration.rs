//! CLI integration tests for the `asali` binary.
//!
//! Each test runs in a fresh temporary directory with every `ASALI_*`
//! variable cleared, so neither a local `asali.toml` nor the caller's
//! environment leaks in. Nothing here needs a running node or backend.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const ASALI_VARS: &[&str] = &[
    "ASALI_RPC_URL",
    "ASALI_CHAIN_ID",
    "ASALI_CONTRACT_ADDRESS",
    "ASALI_CONTRACT_ABI",
    "ASALI_WALLET_URL",
    "ASALI_RECEIPT_POLL_MS",
    "ASALI_API_URL",
    "ASALI_ACCESS_TOKEN",
    "ASALI_REFRESH_TOKEN",
    "ASALI_GOOGLE_CLIENT_ID",
    "ASALI_GITHUB_CLIENT_ID",
    "ASALI_APPLE_CLIENT_ID",
    "RUST_LOG",
];

/// Nothing listens on the discard port.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9";

fn asali(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("asali");
    cmd.current_dir(dir.path());
    for var in ASALI_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// Write the contract ABI artifact and return its path.
fn abi_file(dir: &TempDir) -> String {
    let path = dir.path().join("AsaliTrace.json");
    fs::write(&path, asali_ledger::simulated::ASALI_TRACE_ABI).unwrap();
    path.display().to_string()
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("AsaliTrace"));
}

#[test]
fn version_exits_0() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("asali"));
}

#[test]
fn verify_help_lists_via_backend() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .args(["verify", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--via-backend"));
}

#[test]
fn unknown_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    asali(&dir).arg("frobnicate").assert().failure();
}

// ──────────────────────────────────────────────
// 2. Configuration
// ──────────────────────────────────────────────

#[test]
fn config_prints_defaults() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://127.0.0.1:8545"))
        .stdout(predicate::str::contains("31337"))
        .stdout(predicate::str::contains("http://localhost:8000/api"));
}

#[test]
fn config_reads_local_file_and_env_wins() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("asali.toml"),
        "[chain]\nchain_id = 1337\n\n[backend]\napi_url = \"http://file/api\"\n",
    )
    .unwrap();
    let output = asali(&dir)
        .args(["--output", "json", "config"])
        .env("ASALI_API_URL", "http://env/api")
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["chain"]["chain_id"], 1337);
    assert_eq!(json["backend"]["api_url"], "http://env/api");
}

#[test]
fn config_redacts_tokens() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .args(["--output", "json", "config"])
        .env("ASALI_ACCESS_TOKEN", "very-secret-access")
        .env("ASALI_REFRESH_TOKEN", "very-secret-refresh")
        .assert()
        .success()
        .stdout(predicate::str::contains("very-secret").not())
        .stdout(predicate::str::contains("access_token"));
}

#[test]
fn missing_explicit_config_file_fails() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .args(["--config", "nope.toml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not read"));
}

#[test]
fn invalid_config_file_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("asali.toml"), "[chain\nrpc_url = ").unwrap();
    asali(&dir)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not parse"));
}

#[test]
fn non_numeric_chain_id_fails() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .arg("config")
        .env("ASALI_CHAIN_ID", "mainnet")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ASALI_CHAIN_ID"));
}

#[test]
fn zero_receipt_poll_interval_fails() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .arg("config")
        .env("ASALI_RECEIPT_POLL_MS", "0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("receipt_poll_ms"));
}

// ──────────────────────────────────────────────
// 3. Chain commands fail fast on a missing binding
// ──────────────────────────────────────────────

#[test]
fn chain_read_without_contract_address_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let abi = abi_file(&dir);
    asali(&dir)
        .args(["chain", "get-batch", "B-2024-001"])
        .env("ASALI_CONTRACT_ABI", &abi)
        .env("ASALI_RPC_URL", DEAD_ENDPOINT)
        .assert()
        .failure()
        .stderr(predicate::str::contains("contract address not configured"));
}

#[test]
fn chain_write_without_abi_reports_json_error() {
    let dir = TempDir::new().unwrap();
    let output = asali(&dir)
        .args([
            "--output",
            "json",
            "chain",
            "create-batch",
            "B-2024-001",
            "--description",
            "Acacia - Kilimanjaro Co - Qty: 25kg",
        ])
        .env(
            "ASALI_CONTRACT_ADDRESS",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        )
        .env("ASALI_RPC_URL", DEAD_ENDPOINT)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("contract ABI not found"));
}

#[test]
fn malformed_contract_address_is_rejected() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .args(["chain", "get-certificate", "CERT-1"])
        .env("ASALI_CONTRACT_ADDRESS", "0x1234")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

// ──────────────────────────────────────────────
// 4. Unreachable node and backend
// ──────────────────────────────────────────────

#[test]
fn verify_without_reachable_node_is_not_connected() {
    let dir = TempDir::new().unwrap();
    let abi = abi_file(&dir);
    asali(&dir)
        .args(["verify", "B-2024-001"])
        .env(
            "ASALI_CONTRACT_ADDRESS",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        )
        .env("ASALI_CONTRACT_ABI", &abi)
        .env("ASALI_RPC_URL", DEAD_ENDPOINT)
        .env("ASALI_API_URL", DEAD_ENDPOINT)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not connected"));
}

#[test]
fn node_status_without_node_fails() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .args(["node", "status"])
        .env("ASALI_RPC_URL", DEAD_ENDPOINT)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn quiet_suppresses_text_errors() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .args(["--quiet", "batches", "list"])
        .env("ASALI_API_URL", DEAD_ENDPOINT)
        .assert()
        .failure()
        .stderr(predicate::str::is_empty());
}

#[test]
fn batches_create_rejects_bad_date() {
    let dir = TempDir::new().unwrap();
    asali(&dir)
        .args([
            "batches",
            "create",
            "B-2024-001",
            "--producer",
            "Kilimanjaro Co",
            "--honey-type",
            "Acacia",
            "--quantity",
            "25",
            "--production-date",
            "15/01/2024",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YYYY-MM-DD"));
}
