//! Clap derive structures for the `nasshape` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use nasshape_core::{BindingId, ResetKind, RuleId, SubscriberId};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// nasshape -- traffic-class sync and FUP enforcement for NAS routers
#[derive(Debug, Parser)]
#[command(
    name = "nasshape",
    version,
    about = "Push traffic classes, bandwidth rules and FUP resets to NAS routers",
    long_about = "Drives the nasshape engine against a policy snapshot file.\n\n\
        Every command plans its device work, queues it on per-router workers,\n\
        and exits once the queues have drained.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "NASSHAPE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Policy snapshot standing in for the policy store
    #[arg(long, env = "NASSHAPE_POLICY", global = true)]
    pub policy: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "NASSHAPE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Push a traffic class's address list and mark rule to its devices
    ReconcileClass(ReconcileClassArgs),

    /// Push a service binding's PCQ queue setup to its devices
    ReconcileBinding(ReconcileBindingArgs),

    /// Apply a bandwidth rule now, regardless of its time window
    ApplyRule(ApplyRuleArgs),

    /// Show which rule wins per scope at a point in time
    Evaluate(EvaluateArgs),

    /// Reset one subscriber's FUP state and restore their rate
    ResetFup(ResetFupArgs),

    /// Reset accounting counters for many subscribers
    BulkReset(BulkResetArgs),

    /// Re-apply bandwidth rules on an interval until Ctrl-C
    Watch(WatchArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

// ── Sync ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReconcileClassArgs {
    /// Traffic class name
    pub name: String,
}

#[derive(Debug, Args)]
pub struct ReconcileBindingArgs {
    /// Service traffic binding id
    pub id: BindingId,
}

// ── Bandwidth rules ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ApplyRuleArgs {
    /// Rule id
    pub id: RuleId,

    /// Treat the id as a CDN bandwidth rule
    #[arg(long)]
    pub cdn: bool,
}

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Evaluate at this RFC 3339 instant instead of now
    #[arg(long, value_name = "RFC3339")]
    pub at: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Override the evaluation interval in seconds
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,
}

// ── FUP ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ResetFupArgs {
    /// Subscriber id
    pub id: SubscriberId,
}

#[derive(Debug, Args)]
pub struct BulkResetArgs {
    /// Which counters to reset
    #[arg(long, value_enum)]
    pub kind: ResetKindArg,

    /// Subscriber ids
    #[arg(required = true)]
    pub ids: Vec<SubscriberId>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResetKindArg {
    /// FUP levels and quota counters
    Fup,
    /// Daily quota and byte counters
    Daily,
    /// Monthly quota and byte counters
    Monthly,
    /// All of the above
    All,
}

impl From<ResetKindArg> for ResetKind {
    fn from(kind: ResetKindArg) -> Self {
        match kind {
            ResetKindArg::Fup => Self::Fup,
            ResetKindArg::Daily => Self::Daily,
            ResetKindArg::Monthly => Self::Monthly,
            ResetKindArg::All => Self::All,
        }
    }
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bulk_reset_parses_kind_and_ids() {
        let cli = Cli::try_parse_from(["nasshape", "bulk-reset", "--kind", "monthly", "5", "6", "7"])
            .unwrap();
        let Command::BulkReset(args) = cli.command else {
            panic!("expected bulk-reset");
        };
        assert!(matches!(args.kind, ResetKindArg::Monthly));
        assert_eq!(args.ids, vec![SubscriberId(5), SubscriberId(6), SubscriberId(7)]);
    }

    #[test]
    fn apply_rule_cdn_flag() {
        let cli = Cli::try_parse_from(["nasshape", "apply-rule", "3", "--cdn"]).unwrap();
        let Command::ApplyRule(args) = cli.command else {
            panic!("expected apply-rule");
        };
        assert_eq!(args.id, RuleId(3));
        assert!(args.cdn);
    }
}
