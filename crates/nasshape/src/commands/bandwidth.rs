//! Bandwidth rule application and evaluation.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use tabled::Tabled;

use nasshape_core::{Engine, Evaluation, RuleId};

use crate::cli::{ApplyRuleArgs, EvaluateArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct EvaluationRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Down %")]
    download: u32,
    #[tabled(rename = "Up %")]
    upload: u32,
}

impl From<&Evaluation> for EvaluationRow {
    fn from(e: &Evaluation) -> Self {
        Self {
            scope: e.scope.to_string(),
            rule: e.rule_id.to_string(),
            download: e.multiplier.download,
            upload: e.multiplier.upload,
        }
    }
}

#[derive(Serialize)]
struct ApplyReport {
    rule_id: RuleId,
    kind: &'static str,
    updated: usize,
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn apply_rule(
    engine: &Engine,
    args: ApplyRuleArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (kind, updated) = if args.cdn {
        ("cdn", engine.apply_cdn_bandwidth_rule(args.id).await?)
    } else {
        ("service", engine.apply_bandwidth_rule(args.id).await?)
    };
    util::drain(engine).await;

    let report = ApplyReport {
        rule_id: args.id,
        kind,
        updated,
    };
    let out = output::render_single(global.output, &report, |r| {
        let what = if args.cdn { "bindings" } else { "subscribers" };
        format!("{} rule {}: {} {what} updated", r.kind, r.rule_id, r.updated)
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn evaluate(
    engine: &Engine,
    args: EvaluateArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let at = match args.at.as_deref() {
        Some(raw) => parse_instant(raw)?,
        None => Local::now().naive_local(),
    };
    let evaluations = engine.evaluate(at).await?;
    let out = output::render_list(global.output, &evaluations, |e| EvaluationRow::from(e))?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Wall-clock time as written in the RFC 3339 value, offset dropped.
fn parse_instant(raw: &str) -> Result<NaiveDateTime, CliError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .map_err(|e| CliError::Validation {
            field: "--at".into(),
            reason: format!("{raw:?} is not RFC 3339: {e}"),
        })
}
