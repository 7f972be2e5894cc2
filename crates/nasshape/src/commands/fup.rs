//! FUP reset handlers.

use serde::Serialize;

use nasshape_core::{Engine, ResetKind, ResetReport};

use crate::cli::{BulkResetArgs, GlobalOpts, ResetFupArgs};
use crate::error::CliError;
use crate::output;

use super::util;

fn detail(r: &ResetReport) -> String {
    output::detail_lines(&[
        ("Subscriber", format!("{} ({})", r.username, r.subscriber_id)),
        ("Baseline down", format!("{} bytes", r.baseline_download)),
        ("Baseline up", format!("{} bytes", r.baseline_upload)),
        ("Rate", r.rate.to_string()),
        (
            "Live push",
            if r.live_push { "queued" } else { "offline" }.to_string(),
        ),
    ])
}

#[derive(Serialize)]
struct BulkReport {
    kind: ResetKind,
    requested: usize,
    updated: usize,
}

pub async fn reset_fup(
    engine: &Engine,
    args: ResetFupArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let report = engine.reset_fup(args.id).await?;
    util::drain(engine).await;
    let out = output::render_single(global.output, &report, detail)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn bulk_reset(
    engine: &Engine,
    args: BulkResetArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let kind = ResetKind::from(args.kind);
    let updated = engine.bulk_reset(&args.ids, kind).await?;
    util::drain(engine).await;

    let report = BulkReport {
        kind,
        requested: args.ids.len(),
        updated,
    };
    let out = output::render_single(global.output, &report, |r| {
        format!(
            "{} reset: {} of {} subscribers updated",
            r.kind, r.updated, r.requested
        )
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
