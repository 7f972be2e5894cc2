//! Shared helpers: config and policy loading, engine construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use nasshape_config::Config;
use nasshape_core::{Engine, MemoryStore, PolicySnapshot};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(nasshape_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(nasshape_config::load_config_from(&config_file(global))?)
}

/// Snapshot path: `--policy` wins over the config file's `policy`.
pub fn policy_path(global: &GlobalOpts, config: &Config) -> Result<PathBuf, CliError> {
    global
        .policy
        .clone()
        .or_else(|| config.policy.clone())
        .ok_or_else(|| CliError::NoPolicy {
            config: config_file(global).display().to_string(),
        })
}

pub fn read_snapshot(path: &Path) -> Result<PolicySnapshot, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::PolicyRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| CliError::PolicyParse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

/// Load the snapshot into a memory store and wire an engine to the routers.
pub fn build_engine(global: &GlobalOpts, config: &Config) -> Result<Arc<Engine>, CliError> {
    let path = policy_path(global, config)?;
    let snapshot = read_snapshot(&path)?;
    debug!(
        policy = %path.display(),
        devices = snapshot.devices.len(),
        classes = snapshot.traffic_classes.len(),
        subscribers = snapshot.subscribers.len(),
        "policy snapshot loaded"
    );
    let store = MemoryStore::from_snapshot(snapshot)?;
    Ok(Arc::new(Engine::with_routers(
        &config.engine_config(),
        Arc::new(store),
    )))
}

/// Drain every device queue, then stop the workers.
pub async fn drain(engine: &Engine) {
    engine.wait_idle().await;
    let stats = engine.stats();
    info!(
        completed = stats.completed,
        failed = stats.failed,
        dropped = stats.dropped,
        "device queues drained"
    );
    engine.shutdown();
}
