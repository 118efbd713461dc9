//! Starts and stops relay workers in response to rule changes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ForwarderConfig;
use crate::error::ForwarderError;
use crate::forwarder::registry::{Detached, ForwarderRegistry, WorkerState};
use crate::forwarder::worker::{RelayWorker, WorkerDeps};
use crate::platform::Connector;
use crate::store::{Database, RuleFilter};

/// Owns the worker registry and drives every worker's lifecycle.
pub struct Orchestrator {
    deps: WorkerDeps,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Database>, connector: Arc<dyn Connector>, config: ForwarderConfig) -> Self {
        Self {
            deps: WorkerDeps {
                store,
                connector,
                registry: Arc::new(ForwarderRegistry::new()),
                config,
            },
        }
    }

    pub fn registry(&self) -> &Arc<ForwarderRegistry> {
        &self.deps.registry
    }

    /// Spawn a worker for the rule unless one is already registered.
    ///
    /// Returns once the worker task is spawned; startup continues in the
    /// background. Returns `Ok(false)` if a worker already existed, and
    /// `ShuttingDown` once [`Orchestrator::shutdown`] has begun.
    pub async fn start_rule(&self, rule_id: &str) -> Result<bool, ForwarderError> {
        let rule = self
            .deps
            .store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| ForwarderError::RuleNotFound(rule_id.to_string()))?;

        let Some(reservation) = self.deps.registry.reserve(&rule.worker_key()).await else {
            if self.deps.registry.is_closed() {
                return Err(ForwarderError::ShuttingDown);
            }
            debug!(rule_id = %rule_id, "Worker already registered");
            return Ok(false);
        };

        let worker = RelayWorker::new(rule, reservation.clone(), self.deps.clone());
        let handle = tokio::spawn(worker.run());
        self.deps.registry.attach(&reservation, handle).await;

        info!(rule_id = %rule_id, "Relay worker spawned");
        Ok(true)
    }

    /// Stop every worker registered for the rule and wait for it to disconnect.
    ///
    /// Returns how many workers were stopped.
    pub async fn stop_rule(&self, rule_id: &str) -> usize {
        let detached = self.deps.registry.take_matching(rule_id).await;
        let count = detached.len();
        for worker in detached {
            self.stop_worker(worker).await;
        }
        if count > 0 {
            info!(rule_id = %rule_id, "Relay worker stopped by request");
        }
        count
    }

    /// Whether a worker for the rule is subscribed and relaying.
    pub async fn is_running(&self, rule_id: &str) -> bool {
        self.deps.registry.state_of(rule_id).await == Some(WorkerState::Running)
    }

    /// Start a worker for every active rule. Returns how many were spawned.
    pub async fn start_active_rules(&self) -> Result<usize, ForwarderError> {
        let rules = self.deps.store.list_rules(&RuleFilter::active()).await?;
        info!(count = rules.len(), "Starting active rules");

        let mut started = 0;
        for rule in rules {
            match self.start_rule(&rule.rule_id).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(ForwarderError::ShuttingDown) => {
                    debug!("Shutdown in progress, remaining rules not started");
                    break;
                }
                Err(e) => warn!(rule_id = %rule.rule_id, "Failed to start rule: {e}"),
            }
        }
        Ok(started)
    }

    /// Refuse new starts, then disconnect every registered worker.
    pub async fn shutdown(&self) {
        let detached = self.deps.registry.close().await;
        info!(count = detached.len(), "Stopping all relay workers");
        for worker in detached {
            self.stop_worker(worker).await;
        }
    }

    async fn stop_worker(&self, worker: Detached) {
        worker.cancel.cancel();
        let Some(handle) = worker.handle else {
            return;
        };
        match tokio::time::timeout(self.deps.config.stop_grace_period, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(key = %worker.key, "Relay worker task failed: {e}"),
            Err(_) => warn!(key = %worker.key, "Relay worker did not stop within grace period"),
        }
    }
}
