//! Command dispatch: bridges CLI args -> engine operations -> output formatting.

pub mod bandwidth;
pub mod config_cmd;
pub mod fup;
pub mod sync;
pub mod util;
pub mod watch;

use std::sync::Arc;

use nasshape_config::Config;
use nasshape_core::Engine;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an engine-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    engine: &Arc<Engine>,
    config: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::ReconcileClass(args) => sync::reconcile_class(engine, args, global).await,
        Command::ReconcileBinding(args) => sync::reconcile_binding(engine, args, global).await,
        Command::ApplyRule(args) => bandwidth::apply_rule(engine, args, global).await,
        Command::Evaluate(args) => bandwidth::evaluate(engine, args, global).await,
        Command::ResetFup(args) => fup::reset_fup(engine, args, global).await,
        Command::BulkReset(args) => fup::bulk_reset(engine, args, global).await,
        Command::Watch(args) => watch::handle(engine, args, config).await,
        Command::Config(args) => config_cmd::handle(args, config, global),
    }
}
