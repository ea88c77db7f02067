// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reconciliation Checker
//!
//! Periodically compares the registered state machines with the remote
//! engine's deployment listing and evicts machines the remote no longer
//! knows about. Machines still in an initial state are skipped: the remote
//! may not have registered the deployment yet.
//!
//! A machine resting in `UNDEPLOYED` that the remote does not list on two
//! consecutive runs is retired: its unit is removed from the registry. One
//! run is not enough since a deploy may be about to be submitted.
//!
//! A failed listing evicts nothing. The checker always reschedules itself,
//! so a remote outage only delays reconciliation.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::registry::StateMachineRegistry;
use crate::domain::deployment::DeploymentId;
use crate::domain::events::LifecycleEvent;
use crate::domain::lifecycle::{LifecycleEventKind, LifecycleState};
use crate::domain::provisioning::ProvisioningClient;
use crate::infrastructure::worker_pool::WorkerPool;

/// What a single reconciliation run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub evicted: Vec<DeploymentId>,
    pub skipped_initial: Vec<DeploymentId>,
    /// Undeployed machines removed from the registry
    pub retired: Vec<DeploymentId>,
}

pub struct ReconciliationChecker {
    client: Arc<dyn ProvisioningClient>,
    registry: StateMachineRegistry,
    interval: Duration,
    /// Undeployed and unknown remotely on the previous run
    retirement_candidates: Mutex<HashSet<DeploymentId>>,
}

impl ReconciliationChecker {
    pub fn new(
        client: Arc<dyn ProvisioningClient>,
        registry: StateMachineRegistry,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            interval,
            retirement_candidates: Mutex::new(HashSet::new()),
        }
    }

    pub fn start(self, pool: &WorkerPool) -> JoinHandle<()> {
        let shutdown = pool.shutdown_token();
        pool.spawn(self.run(shutdown))
    }

    /// Run every `interval` until shutdown. The first run happens one
    /// interval after start.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Reconciliation checker started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.run_once().await {
                Ok(report) if report.evicted.is_empty() && report.retired.is_empty() => {
                    debug!(
                        skipped = report.skipped_initial.len(),
                        "Reconciliation found no orphaned state machines"
                    );
                }
                Ok(report) => {
                    info!(
                        evicted = ?report.evicted,
                        retired = ?report.retired,
                        "Reconciliation evicted orphaned state machines"
                    );
                }
                Err(e) => {
                    warn!("Reconciliation run failed, nothing evicted: {:#}", e);
                }
            }
        }
        info!("Reconciliation checker stopped");
    }

    /// Evict every non-initial local machine absent from the remote listing
    /// and retire undeployed ones that stayed absent since the last run.
    pub async fn run_once(&self) -> anyhow::Result<ReconciliationReport> {
        let remote = match self.client.list_deployments().await {
            Ok(remote) => remote,
            Err(e) => {
                metrics::counter!("yorc_bridge_reconciliation_runs_total", "outcome" => "error")
                    .increment(1);
                return Err(anyhow::Error::new(e).context("Failed to list remote deployments"));
            }
        };
        let remote_ids: HashSet<DeploymentId> =
            remote.into_iter().map(|deployment| deployment.id).collect();

        let local = self.registry.snapshot().await?;
        let mut report = ReconciliationReport::default();
        let previous = std::mem::take(&mut *self.retirement_candidates.lock());
        let mut candidates = HashSet::new();

        for (id, state) in local {
            if remote_ids.contains(&id) {
                continue;
            }
            if state == LifecycleState::Undeployed && previous.contains(&id) {
                if self.registry.remove_if_state(&id, LifecycleState::Undeployed).await? {
                    info!(deployment_id = %id, "Undeployed state machine retired");
                    metrics::counter!("yorc_bridge_reconciliation_retirements_total").increment(1);
                    report.retired.push(id);
                }
                continue;
            }
            if state == LifecycleState::Undeployed {
                candidates.insert(id.clone());
            }
            if state.is_initial() {
                debug!(deployment_id = %id, state = %state, "Not known remotely yet, keeping");
                report.skipped_initial.push(id);
                continue;
            }

            match self
                .registry
                .dispatch(LifecycleEvent::new(id.clone(), LifecycleEventKind::Eviction))
                .await
            {
                Ok(()) => {
                    info!(
                        deployment_id = %id,
                        state = %state,
                        "Deployment no longer exists remotely, evicting"
                    );
                    metrics::counter!("yorc_bridge_reconciliation_evictions_total").increment(1);
                    report.evicted.push(id);
                }
                // Removed concurrently
                Err(e) => debug!(deployment_id = %id, "Eviction not dispatched: {}", e),
            }
        }

        *self.retirement_candidates.lock() = candidates;
        metrics::counter!("yorc_bridge_reconciliation_runs_total", "outcome" => "ok").increment(1);
        Ok(report)
    }
}
