//! `asali verify` and `asali record`.

use asali_backend::{BackendError, BatchRecord, RecordOutcome, TraceBackend};
use asali_verify::{VerificationCoordinator, VerificationResult};

use crate::{CmdResult, Context};

pub(crate) fn cmd_verify(ctx: &Context, batch_id: &str, via_backend: bool) {
    let result = ctx.block_on(run_verify(ctx, batch_id, via_backend));
    // A completed verification exits 0 whatever the verdict.
    ctx.finish(result, render_verification);
}

async fn run_verify(
    ctx: &Context,
    batch_id: &str,
    via_backend: bool,
) -> CmdResult<VerificationResult> {
    let coordinator = VerificationCoordinator::new(ctx.chain_client()?, ctx.backend());
    if via_backend {
        return Ok(coordinator.verify_via_backend(batch_id).await?);
    }

    coordinator.chain().config().binding()?;
    let mut connection = ctx.connection();
    if !connection.auto_connect().await && ctx.settings.chain.wallet_url.is_some() {
        connection.connect_browser_wallet().await?;
    }
    Ok(coordinator.verify(&connection, batch_id).await?)
}

fn render_verification(result: &VerificationResult) -> String {
    let mut out = format!(
        "batch {}: {}\nreason: {}\n",
        result.batch_id,
        if result.matched { "MATCHED" } else { "NOT MATCHED" },
        result.reason
    );
    match &result.database_record {
        Some(db) => out.push_str(&format!(
            "database: {} {} kg from {} ({}), tx {}\n",
            db.honey_type,
            db.quantity,
            db.producer_name,
            db.production_date,
            db.tx_hash().unwrap_or("-")
        )),
        None => out.push_str("database: no record\n"),
    }
    match &result.chain_record {
        Some(chain) => out.push_str(&format!(
            "ledger:   \"{}\" at {} by {}\n",
            chain.description, chain.timestamp, chain.created_by
        )),
        None => out.push_str("ledger:   no record\n"),
    }
    if let Some(consistent) = result.description_consistent {
        out.push_str(&format!(
            "description {}\n",
            if consistent {
                "matches the database fields"
            } else {
                "differs from the database fields"
            }
        ));
    }
    out
}

pub(crate) fn cmd_record(ctx: &Context, batch_id: &str, description: Option<&str>) {
    let result = ctx.block_on(run_record(ctx, batch_id, description));
    ctx.finish(result, |outcome| {
        if outcome.already_recorded {
            format!(
                "batch '{}' was already recorded\ntx: {}",
                outcome.record.batch_id, outcome.tx_hash
            )
        } else {
            format!(
                "batch '{}' recorded on chain\ntx: {}",
                outcome.record.batch_id, outcome.tx_hash
            )
        }
    });
}

async fn run_record(
    ctx: &Context,
    batch_id: &str,
    description: Option<&str>,
) -> CmdResult<RecordOutcome<BatchRecord>> {
    let coordinator = VerificationCoordinator::new(ctx.chain_client()?, ctx.backend());
    let record = coordinator
        .backend()
        .find_batch(batch_id)
        .await?
        .ok_or_else(|| BackendError::not_found("batch", batch_id))?;
    Ok(coordinator
        .record_batch_on_chain(record.id, description)
        .await?)
}
