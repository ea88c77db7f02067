// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Service
//!
//! Entry point used by the deployment-management layer. Lifecycle
//! operations are turned into lifecycle events and routed through the
//! [`StateMachineRegistry`]; the service never touches a state machine
//! directly. Operations that do not move the lifecycle (scale, workflows,
//! custom commands) call the remote engine here and track the returned
//! task until the event stream reports it finished.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Deploy, update, undeploy, scale, purge and observe deployments

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::registry::StateMachineRegistry;
use crate::domain::archive::DeploymentArchive;
use crate::domain::deployment::{DeploymentId, DeploymentStatus, TaskHandle};
use crate::domain::events::{wait_for, LifecycleEvent, LogRecord, OperationCallback, RemoteEvent};
use crate::domain::lifecycle::{
    event_for_remote_status, state_for_remote_status, LifecycleError, LifecycleEventKind,
    LifecycleState,
};
use crate::domain::provisioning::{CustomCommand, ProvisioningClient, ProvisioningError};
use crate::infrastructure::event_bus::{BusReceiver, EventBus, EventBusError};
use crate::infrastructure::worker_pool::WorkerPool;

/// Outcome of re-attaching to the remote engine's deployments at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub attached: Vec<(DeploymentId, LifecycleState)>,
    /// Deployments whose remote status has no lifecycle counterpart
    pub skipped: Vec<(DeploymentId, String)>,
}

/// Register a state machine for every deployment the remote engine already
/// knows, in the state matching its remote status.
///
/// A deployment the remote reports `UNDEPLOYED` was undeployed but never
/// purged. It is attached in `UNDEPLOYMENT_IN_PROGRESS` and handed
/// `UNDEPLOYMENT_SUCCESS`, so the purge edge runs as it would have.
pub async fn bootstrap(
    client: &dyn ProvisioningClient,
    registry: &StateMachineRegistry,
) -> Result<BootstrapReport, LifecycleError> {
    let remote = client.list_deployments().await?;
    let mut report = BootstrapReport::default();
    let mut entries = Vec::with_capacity(remote.len());
    let mut unpurged = Vec::new();

    for deployment in remote {
        match state_for_remote_status(&deployment.status) {
            Ok(LifecycleState::UndeploymentPurging) => {
                unpurged.push(deployment.id.clone());
                entries.push((deployment.id, LifecycleState::UndeploymentInProgress));
            }
            Ok(state) => entries.push((deployment.id, state)),
            Err(e) => {
                warn!(deployment_id = %deployment.id, "Not re-attaching deployment: {}", e);
                report.skipped.push((deployment.id, deployment.status));
            }
        }
    }

    let created = registry.create_with_states(entries.clone()).await?;
    for id in unpurged.into_iter().filter(|id| created.contains(id)) {
        info!(deployment_id = %id, "Purging deployment left undeployed on the remote engine");
        let purge = LifecycleEvent::new(id.clone(), LifecycleEventKind::UndeploymentSuccess);
        if let Err(e) = registry.dispatch(purge).await {
            warn!(deployment_id = %id, "Could not schedule purge: {}", e);
        }
    }
    report.attached = entries.into_iter().filter(|(id, _)| created.contains(id)).collect();

    info!(
        attached = report.attached.len(),
        skipped = report.skipped.len(),
        "Re-attached to remote deployments"
    );
    Ok(report)
}

#[derive(Clone)]
pub struct DeploymentService {
    client: Arc<dyn ProvisioningClient>,
    registry: StateMachineRegistry,
    bus: EventBus,
    pool: WorkerPool,
}

impl DeploymentService {
    pub fn new(
        client: Arc<dyn ProvisioningClient>,
        registry: StateMachineRegistry,
        bus: EventBus,
        pool: WorkerPool,
    ) -> Self {
        Self {
            client,
            registry,
            bus,
            pool,
        }
    }

    pub fn registry(&self) -> &StateMachineRegistry {
        &self.registry
    }

    pub async fn bootstrap(&self) -> Result<BootstrapReport, LifecycleError> {
        bootstrap(self.client.as_ref(), &self.registry).await
    }

    /// Retry [`bootstrap`] every `retry_backoff` until the remote listing
    /// succeeds. Returns `None` on shutdown or when the registry stopped.
    pub async fn bootstrap_until_ready(
        &self,
        retry_backoff: Duration,
        shutdown: CancellationToken,
    ) -> Option<BootstrapReport> {
        loop {
            match self.bootstrap().await {
                Ok(report) => return Some(report),
                Err(LifecycleError::RegistryClosed) => return None,
                Err(e) => warn!(
                    backoff_secs = retry_backoff.as_secs_f64(),
                    "Failed to list remote deployments, retrying: {}",
                    e
                ),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(retry_backoff) => {}
            }
        }
    }

    /// Run [`DeploymentService::bootstrap_until_ready`] on the worker pool.
    pub fn start_bootstrap(&self, retry_backoff: Duration) -> JoinHandle<Option<BootstrapReport>> {
        let service = self.clone();
        let shutdown = self.pool.shutdown_token();
        self.pool
            .spawn(async move { service.bootstrap_until_ready(retry_backoff, shutdown).await })
    }

    /// Submit a new deployment. Resolves once the remote engine accepted or
    /// refused the archive; progress then arrives through the event stream.
    pub async fn deploy(
        &self,
        id: &DeploymentId,
        archive: Arc<dyn DeploymentArchive>,
    ) -> Result<(), LifecycleError> {
        self.registry.create([id.clone()]).await?;
        let event = LifecycleEvent::new(id.clone(), LifecycleEventKind::DeploymentStarted)
            .with_archive(archive);
        self.dispatch_and_wait(event).await
    }

    /// Submit an updated topology for a deployed deployment.
    pub async fn update(
        &self,
        id: &DeploymentId,
        archive: Arc<dyn DeploymentArchive>,
    ) -> Result<(), LifecycleError> {
        let event = LifecycleEvent::new(id.clone(), LifecycleEventKind::UpdateStarted)
            .with_archive(archive);
        self.dispatch_and_wait(event).await
    }

    /// Undeploy. While a deployment task is still in flight this goes
    /// through the cancellation chain first.
    pub async fn undeploy(&self, id: &DeploymentId) -> Result<(), LifecycleError> {
        let event = LifecycleEvent::new(id.clone(), LifecycleEventKind::UndeploymentStarted);
        self.dispatch_and_wait(event).await
    }

    pub async fn scale(
        &self,
        id: &DeploymentId,
        node: &str,
        delta: i32,
    ) -> Result<TaskHandle, LifecycleError> {
        self.run_task_operation(id, "scale", || self.client.scale(id, node, delta))
            .await
    }

    pub async fn execute_workflow(
        &self,
        id: &DeploymentId,
        workflow: &str,
        inputs: HashMap<String, serde_json::Value>,
        continue_on_error: bool,
    ) -> Result<TaskHandle, LifecycleError> {
        self.run_task_operation(id, "execute_workflow", || {
            self.client.execute_workflow(id, workflow, inputs, continue_on_error)
        })
        .await
    }

    pub async fn execute_custom_command(
        &self,
        id: &DeploymentId,
        command: &CustomCommand,
    ) -> Result<TaskHandle, LifecycleError> {
        self.run_task_operation(id, "execute_custom_command", || {
            self.client.execute_custom_command(id, command)
        })
        .await
    }

    /// Cancel the task cached for `id` and forget it.
    pub async fn cancel_task(&self, id: &DeploymentId) -> Result<(), LifecycleError> {
        let task = self.cached_task(id).await?;
        self.client.cancel_task(&task).await?;
        self.registry.task_handles().remove_if_task(id, task.task_id());
        info!(deployment_id = %id, task_id = task.task_id(), "Task cancelled");
        Ok(())
    }

    pub async fn resume_task(&self, id: &DeploymentId) -> Result<(), LifecycleError> {
        let task = self.cached_task(id).await?;
        self.client.resume_task(&task).await?;
        info!(deployment_id = %id, task_id = task.task_id(), "Task resumed");
        Ok(())
    }

    /// Operator purge: synchronous remote purge, then the local coordination
    /// unit and its channels are destroyed. A deployment the remote no
    /// longer knows is purged locally all the same.
    pub async fn purge(&self, id: &DeploymentId, force: bool) -> Result<(), LifecycleError> {
        match self.client.purge(id, force).await {
            Ok(()) => {}
            Err(ProvisioningError::NotFound(_)) => {
                debug!(deployment_id = %id, "Deployment already absent remotely");
            }
            Err(e) => return Err(e.into()),
        }

        if self.registry.remove(id).await? {
            info!(deployment_id = %id, "Deployment purged");
        }
        Ok(())
    }

    pub async fn status(&self, id: &DeploymentId) -> Result<DeploymentStatus, LifecycleError> {
        self.registry.state_of(id).await
    }

    /// Every registered deployment with its external status.
    pub async fn deployments(
        &self,
    ) -> Result<Vec<(DeploymentId, DeploymentStatus)>, LifecycleError> {
        let mut deployments: Vec<_> = self
            .registry
            .snapshot()
            .await?
            .into_iter()
            .map(|(id, state)| (id, state.status()))
            .collect();
        deployments.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(deployments)
    }

    /// Query the remote status of `id` and feed it to its state machine.
    /// A deployment missing remotely yields `DEPLOYMENT_NOT_EXISTING`.
    pub async fn refresh(&self, id: &DeploymentId) -> Result<LifecycleEventKind, LifecycleError> {
        let kind = match self.client.get_deployment(id).await? {
            None => LifecycleEventKind::DeploymentNotExisting,
            Some(deployment) => event_for_remote_status(&deployment.status)?,
        };
        self.registry.dispatch(LifecycleEvent::new(id.clone(), kind)).await?;
        Ok(kind)
    }

    pub fn subscribe_logs(
        &self,
        id: &DeploymentId,
    ) -> Result<BusReceiver<LogRecord>, LifecycleError> {
        self.bus
            .subscribe_logs(id)
            .map_err(|_| LifecycleError::NotFound(id.clone()))
    }

    pub fn subscribe_remote_events(
        &self,
        id: &DeploymentId,
    ) -> Result<BusReceiver<RemoteEvent>, LifecycleError> {
        self.bus
            .subscribe_remote_events(id)
            .map_err(|_| LifecycleError::NotFound(id.clone()))
    }

    async fn dispatch_and_wait(&self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        let (callback, result) = OperationCallback::new();
        self.registry.dispatch(event.with_callback(callback)).await?;
        wait_for(result).await
    }

    async fn cached_task(&self, id: &DeploymentId) -> Result<TaskHandle, LifecycleError> {
        self.registry.lifecycle_state(id).await?;
        self.registry
            .task_handles()
            .get(id)
            .ok_or_else(|| LifecycleError::NoTaskInFlight(id.clone()))
    }

    async fn run_task_operation<F, Fut>(
        &self,
        id: &DeploymentId,
        operation: &'static str,
        submit: F,
    ) -> Result<TaskHandle, LifecycleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TaskHandle, ProvisioningError>>,
    {
        let state = self.registry.lifecycle_state(id).await?;
        if !matches!(state, LifecycleState::Deployed | LifecycleState::Updated) {
            return Err(LifecycleError::InvalidState {
                deployment_id: id.clone(),
                state,
                operation,
            });
        }

        // Subscribe before submitting so the task's end cannot be missed
        let events = self.subscribe_remote_events(id)?;
        let task = submit().await?;
        self.registry.task_handles().insert(task.clone());
        info!(deployment_id = %id, task_id = task.task_id(), operation, "Remote task started");

        self.watch_task(events, task.clone());
        Ok(task)
    }

    /// Drop the cached handle once the event stream reports `task` ended.
    fn watch_task(&self, mut events: BusReceiver<RemoteEvent>, task: TaskHandle) {
        let tasks = self.registry.task_handles().clone();
        let shutdown = self.pool.shutdown_token();

        self.pool.spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    next = events.recv() => next,
                };
                match next {
                    Ok(event) => {
                        let ours = event.task_id.as_deref() == Some(task.task_id());
                        if ours && event.is_terminal_task_status() {
                            if tasks.remove_if_task(&task.deployment_id, task.task_id()) {
                                debug!(
                                    deployment_id = %task.deployment_id,
                                    task_id = task.task_id(),
                                    status = %event.status,
                                    "Remote task finished"
                                );
                            }
                            return;
                        }
                    }
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(_) => return,
                }
            }
        });
    }
}
