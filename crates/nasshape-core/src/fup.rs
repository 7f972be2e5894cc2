// ── Live rate enforcement ──
//
// Pushing a subscriber's rate to a live session is an ordered list of
// strategies: RADIUS CoA first, then the router's management API. Each
// attempt reports success, a retryable failure or a fatal one; the chain
// moves on after a fatal failure or once retries are spent.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::client::{CoaClient, DeviceClient};
use crate::config::DispatchConfig;
use crate::model::Rate;

/// The session a rate push targets.
#[derive(Debug, Clone)]
pub struct RateTarget {
    pub username: String,
    pub session_id: Option<String>,
    pub address: Option<String>,
    pub rate: Rate,
}

/// Result of one strategy attempt.
#[derive(Debug)]
pub enum Attempt {
    Applied,
    Retryable(String),
    Fatal(String),
}

impl Attempt {
    fn from_result(result: Result<(), nasshape_api::Error>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(e) if e.is_transient() => Self::Retryable(e.to_string()),
            Err(e) => Self::Fatal(e.to_string()),
        }
    }
}

/// One way of changing a live session's rate.
#[async_trait]
pub trait RateStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, target: &RateTarget) -> Attempt;
}

/// CoA-Request with a `Mikrotik-Rate-Limit` attribute.
pub struct CoaStrategy(pub Arc<dyn CoaClient>);

#[async_trait]
impl RateStrategy for CoaStrategy {
    fn name(&self) -> &'static str {
        "coa"
    }

    async fn apply(&self, target: &RateTarget) -> Attempt {
        let rate = target.rate.to_string();
        Attempt::from_result(
            self.0
                .update_rate_limit(&target.username, target.session_id.as_deref(), &rate)
                .await,
        )
    }
}

/// Direct rewrite of the session's queue through the management API.
pub struct DeviceStrategy(pub Arc<dyn DeviceClient>);

#[async_trait]
impl RateStrategy for DeviceStrategy {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn apply(&self, target: &RateTarget) -> Attempt {
        Attempt::from_result(
            self.0
                .restore_rate(&target.username, target.address.as_deref(), target.rate)
                .await,
        )
    }
}

/// How a chain run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Applied { strategy: &'static str },
    Exhausted { failures: Vec<(&'static str, String)> },
}

/// Ordered rate strategies, tried until one applies.
pub struct FallbackChain {
    strategies: Vec<Box<dyn RateStrategy>>,
}

impl FallbackChain {
    pub fn new(strategies: Vec<Box<dyn RateStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard chain for one device: CoA when configured, then the
    /// management API.
    pub fn for_device(coa: Option<Arc<dyn CoaClient>>, device: Arc<dyn DeviceClient>) -> Self {
        let mut strategies: Vec<Box<dyn RateStrategy>> = Vec::with_capacity(2);
        if let Some(coa) = coa {
            strategies.push(Box::new(CoaStrategy(coa)));
        }
        strategies.push(Box::new(DeviceStrategy(device)));
        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order. Retryable failures are retried with
    /// the dispatch backoff up to `max_attempts` per strategy.
    pub async fn run(&self, target: &RateTarget, policy: &DispatchConfig) -> ChainOutcome {
        let mut failures = Vec::new();
        let max_attempts = policy.max_attempts.max(1);

        for strategy in &self.strategies {
            let mut attempt = 1;
            loop {
                match strategy.apply(target).await {
                    Attempt::Applied => {
                        info!(
                            subscriber = %target.username,
                            strategy = strategy.name(),
                            rate = %target.rate,
                            "live rate applied"
                        );
                        return ChainOutcome::Applied {
                            strategy: strategy.name(),
                        };
                    }
                    Attempt::Retryable(reason) if attempt < max_attempts => {
                        debug!(
                            subscriber = %target.username,
                            strategy = strategy.name(),
                            attempt,
                            %reason,
                            "rate push failed, retrying"
                        );
                        tokio::time::sleep(policy.backoff_for(attempt)).await;
                        attempt += 1;
                    }
                    Attempt::Retryable(reason) | Attempt::Fatal(reason) => {
                        warn!(
                            subscriber = %target.username,
                            strategy = strategy.name(),
                            %reason,
                            "rate push failed, falling back"
                        );
                        failures.push((strategy.name(), reason));
                        break;
                    }
                }
            }
        }

        warn!(
            subscriber = %target.username,
            rate = %target.rate,
            "every rate strategy failed; rate applies on next re-authentication"
        );
        ChainOutcome::Exhausted { failures }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Scripted strategy that records each call.
    struct Scripted {
        name: &'static str,
        script: Mutex<Vec<Attempt>>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl RateStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn apply(&self, _target: &RateTarget) -> Attempt {
            self.log.lock().unwrap_or_else(|e| e.into_inner()).push(self.name);
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            if script.is_empty() {
                Attempt::Applied
            } else {
                script.remove(0)
            }
        }
    }

    fn scripted(
        name: &'static str,
        script: Vec<Attempt>,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn RateStrategy> {
        Box::new(Scripted {
            name,
            script: Mutex::new(script),
            log: Arc::clone(log),
        })
    }

    fn target() -> RateTarget {
        RateTarget {
            username: "alice".into(),
            session_id: Some("81a00002".into()),
            address: Some("100.64.0.10".into()),
            rate: Rate::new(20_480, 5_120),
        }
    }

    fn policy() -> DispatchConfig {
        DispatchConfig {
            max_attempts: 2,
            retry_backoff: Duration::from_millis(1),
            retry_backoff_max: Duration::from_millis(1),
            ..DispatchConfig::default()
        }
    }

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FallbackChain::new(vec![
            scripted("coa", vec![], &log),
            scripted("device", vec![], &log),
        ]);
        let outcome = chain.run(&target(), &policy()).await;
        assert_eq!(outcome, ChainOutcome::Applied { strategy: "coa" });
        assert_eq!(*log.lock().unwrap(), vec!["coa"]);
    }

    #[tokio::test]
    async fn fatal_failure_falls_through_without_retry() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FallbackChain::new(vec![
            scripted("coa", vec![Attempt::Fatal("NAK".into())], &log),
            scripted("device", vec![], &log),
        ]);
        let outcome = chain.run(&target(), &policy()).await;
        assert_eq!(outcome, ChainOutcome::Applied { strategy: "device" });
        assert_eq!(*log.lock().unwrap(), vec!["coa", "device"]);
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_before_fallback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FallbackChain::new(vec![
            scripted(
                "coa",
                vec![Attempt::Retryable("timeout".into()), Attempt::Retryable("timeout".into())],
                &log,
            ),
            scripted("device", vec![Attempt::Fatal("no queue".into())], &log),
        ]);
        let outcome = chain.run(&target(), &policy()).await;
        assert_eq!(*log.lock().unwrap(), vec!["coa", "coa", "device"]);
        match outcome {
            ChainOutcome::Exhausted { failures } => {
                let names: Vec<&str> = failures.iter().map(|(n, _)| *n).collect();
                assert_eq!(names, vec!["coa", "device"]);
            }
            ChainOutcome::Applied { .. } => panic!("chain should be exhausted"),
        }
    }
}
