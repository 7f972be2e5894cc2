//! Long-running bandwidth scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nasshape_config::Config;
use nasshape_core::{BandwidthScheduler, Engine};

use crate::cli::WatchArgs;
use crate::error::CliError;

use super::util;

pub async fn handle(engine: &Arc<Engine>, args: WatchArgs, config: &Config) -> Result<(), CliError> {
    let secs = args
        .interval
        .unwrap_or(config.engine.evaluation_interval_secs);
    if secs == 0 {
        return Err(CliError::Validation {
            field: "interval".into(),
            reason: "must be greater than 0 to watch".into(),
        });
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for Ctrl-C");
            return;
        }
        info!("interrupt received, stopping");
        on_signal.cancel();
    });

    info!(interval_secs = secs, "watching bandwidth rules");
    BandwidthScheduler::new(Arc::clone(engine), Duration::from_secs(secs))
        .run(cancel)
        .await;
    util::drain(engine).await;
    Ok(())
}
