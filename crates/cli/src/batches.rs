//! `asali batches`: backend batch records.

use asali_backend::{BatchRecord, BatchStatus, CreatedBatch, NewBatch, TraceBackend};
use rust_decimal::Decimal;
use time::Date;

use crate::{CmdResult, Context};

pub(crate) struct CreateArgs {
    pub batch_id: String,
    pub producer_name: String,
    pub honey_type: String,
    pub quantity: Decimal,
    pub production_date: Date,
}

pub(crate) fn cmd_list(ctx: &Context) {
    let backend = ctx.backend();
    let result = ctx.block_on(async { CmdResult::Ok(backend.list_batches().await?) });
    ctx.finish(result, |batches| {
        if batches.is_empty() {
            return "no batches".to_string();
        }
        batches.iter().map(render_row).collect::<Vec<_>>().join("\n")
    });
}

fn render_row(batch: &BatchRecord) -> String {
    format!(
        "{:<16} {:<12} {:>10} kg  {:<9} {}",
        batch.batch_id,
        batch.honey_type,
        batch.quantity,
        status_label(batch.status),
        batch.tx_hash().unwrap_or("-")
    )
}

fn status_label(status: BatchStatus) -> &'static str {
    match status {
        BatchStatus::Created => "created",
        BatchStatus::Tested => "tested",
        BatchStatus::Certified => "certified",
        BatchStatus::Shipped => "shipped",
    }
}

pub(crate) fn cmd_create(ctx: &Context, args: CreateArgs) {
    let backend = ctx.backend();
    let batch = NewBatch {
        batch_id: args.batch_id,
        producer_name: args.producer_name,
        production_date: args.production_date,
        honey_type: args.honey_type,
        quantity: args.quantity,
        status: BatchStatus::default(),
    };
    let result = ctx.block_on(async { CmdResult::Ok(backend.create_batch(batch).await?) });
    if let Ok(CreatedBatch {
        blockchain_warning: Some(warning),
        ..
    }) = &result
    {
        ctx.warn(warning);
    }
    ctx.finish(result, |created| {
        format!(
            "created batch '{}' (id {})\ntx: {}",
            created.record.batch_id,
            created.record.id,
            created.record.tx_hash().unwrap_or("-")
        )
    });
}
