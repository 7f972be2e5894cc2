//! Traffic class and service binding reconciliation.

use serde::Serialize;
use tabled::Tabled;

use nasshape_core::{DispatchStats, Engine, PlannedOp, ReconcileOutcome};

use crate::cli::{GlobalOpts, OutputFormat, ReconcileBindingArgs, ReconcileClassArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct OpRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Operation")]
    op: String,
}

impl From<&PlannedOp> for OpRow {
    fn from(p: &PlannedOp) -> Self {
        Self {
            device: p.device_id.to_string(),
            op: p.op.to_string(),
        }
    }
}

/// Plan plus what the workers made of it.
#[derive(Serialize)]
struct RunReport {
    ops: Vec<PlannedOp>,
    enqueued: usize,
    dispatch: DispatchStats,
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn reconcile_class(
    engine: &Engine,
    args: ReconcileClassArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let outcome = engine.resync_class(&args.name).await?;
    finish(engine, outcome, global).await
}

pub async fn reconcile_binding(
    engine: &Engine,
    args: ReconcileBindingArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let binding = engine
        .store()
        .binding(args.id)
        .await?
        .ok_or_else(|| CliError::NotFound {
            entity: "binding".into(),
            identifier: args.id.to_string(),
        })?;
    let outcome = engine
        .reconcile_binding(Some(&binding), Some(&binding))
        .await?;
    finish(engine, outcome, global).await
}

async fn finish(
    engine: &Engine,
    outcome: ReconcileOutcome,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    util::drain(engine).await;
    let report = RunReport {
        enqueued: outcome.enqueued,
        ops: outcome.ops,
        dispatch: engine.stats(),
    };

    let out = output::render_single(global.output, &report, |r| {
        let table = output::render_list(OutputFormat::Table, &r.ops, |p| OpRow::from(p))
            .unwrap_or_default();
        format!(
            "{table}\n{} queued, {} completed, {} failed, {} dropped",
            r.enqueued, r.dispatch.completed, r.dispatch.failed, r.dispatch.dropped
        )
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
