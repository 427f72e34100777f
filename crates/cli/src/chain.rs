//! `asali node` and `asali chain`: direct contract access through the node.

use asali_ledger::abi::parse_quantity;
use asali_ledger::{
    ChainBatchRecord, ChainCertificate, ChainClient, ChainHandle, ChainLabTest, ConnectionStatus,
    TxReceipt,
};
use serde::Serialize;
use serde_json::json;

use crate::{CmdResult, Context};

#[derive(Serialize)]
struct NodeStatus {
    #[serde(flatten)]
    connection: ConnectionStatus,
    block_number: u64,
}

pub(crate) fn cmd_node_status(ctx: &Context) {
    let result = ctx.block_on(node_status(ctx));
    ctx.finish(result, |s| {
        let account = s
            .connection
            .account
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "state:    {}\nendpoint: {}\nchain id: {}\naccount:  {}\nblock:    {}",
            s.connection.state,
            s.connection.endpoint.as_deref().unwrap_or("-"),
            s.connection
                .chain_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            account,
            s.block_number,
        )
    });
}

async fn node_status(ctx: &Context) -> CmdResult<NodeStatus> {
    let mut connection = ctx.connection();
    connection.connect_direct_node().await?;
    let handle = connection.active_handle()?;
    let raw = handle
        .provider()
        .transport()
        .request("eth_blockNumber", json!([]))
        .await?;
    let block_number = parse_quantity(raw.as_str().unwrap_or_default())?;
    Ok(NodeStatus {
        connection: connection.status(),
        block_number,
    })
}

/// Validate the contract binding, then connect to the node.
///
/// The binding is checked first so a missing address or ABI never costs a
/// network round trip.
async fn open(ctx: &Context) -> CmdResult<(ChainClient, ChainHandle)> {
    let client = ctx.chain_client()?;
    client.config().binding()?;
    let mut connection = ctx.connection();
    connection.connect_direct_node().await?;
    let handle = connection.active_handle()?;
    Ok((client, handle))
}

pub(crate) fn cmd_get_batch(ctx: &Context, batch_id: &str) {
    let result = ctx.block_on(async {
        let (client, handle) = open(ctx).await?;
        let record: Option<ChainBatchRecord> = client.read_batch(&handle, batch_id).await?;
        CmdResult::Ok(record)
    });
    ctx.finish(result, |record| match record {
        Some(r) => format!(
            "batch:       {}\ndescription: {}\ntimestamp:   {}\ncreated by:  {}",
            r.batch_id, r.description, r.timestamp, r.created_by
        ),
        None => format!("batch '{}' is not recorded on chain", batch_id),
    });
}

pub(crate) fn cmd_get_lab_test(ctx: &Context, test_id: &str) {
    let result = ctx.block_on(async {
        let (client, handle) = open(ctx).await?;
        let record: Option<ChainLabTest> = client.read_lab_test(&handle, test_id).await?;
        CmdResult::Ok(record)
    });
    ctx.finish(result, |record| match record {
        Some(r) => format!(
            "lab test:  {}\nbatch:     {}\nresult:    {}\ntimestamp: {}",
            r.test_id, r.batch_id, r.result, r.timestamp
        ),
        None => format!("lab test '{}' is not recorded on chain", test_id),
    });
}

pub(crate) fn cmd_get_certificate(ctx: &Context, cert_id: &str) {
    let result = ctx.block_on(async {
        let (client, handle) = open(ctx).await?;
        let record: Option<ChainCertificate> = client.read_certificate(&handle, cert_id).await?;
        CmdResult::Ok(record)
    });
    ctx.finish(result, |record| match record {
        Some(r) => format!(
            "certificate: {}\nbatch:       {}\nissuer:      {}\ntimestamp:   {}",
            r.cert_id, r.batch_id, r.issuer, r.timestamp
        ),
        None => format!("certificate '{}' is not recorded on chain", cert_id),
    });
}

pub(crate) fn cmd_create_batch(ctx: &Context, batch_id: &str, description: &str) {
    let result = ctx.block_on(async {
        let (client, handle) = open(ctx).await?;
        let receipt = client.write_batch(&handle, batch_id, description).await?;
        CmdResult::Ok(receipt)
    });
    ctx.finish(result, |r| render_receipt("batch", batch_id, r));
}

pub(crate) fn cmd_add_lab_test(ctx: &Context, test_id: &str, batch_id: &str, result: &str) {
    let outcome = ctx.block_on(async {
        let (client, handle) = open(ctx).await?;
        let receipt = client
            .write_lab_test(&handle, test_id, batch_id, result)
            .await?;
        CmdResult::Ok(receipt)
    });
    ctx.finish(outcome, |r| render_receipt("lab test", test_id, r));
}

pub(crate) fn cmd_issue_certificate(ctx: &Context, cert_id: &str, batch_id: &str, issuer: &str) {
    let result = ctx.block_on(async {
        let (client, handle) = open(ctx).await?;
        let receipt = client
            .write_certificate(&handle, cert_id, batch_id, issuer)
            .await?;
        CmdResult::Ok(receipt)
    });
    ctx.finish(result, |r| render_receipt("certificate", cert_id, r));
}

fn render_receipt(kind: &str, id: &str, receipt: &TxReceipt) -> String {
    format!(
        "{} '{}' written in block {}\ntx: {}",
        kind, id, receipt.block_number, receipt.tx_hash
    )
}
