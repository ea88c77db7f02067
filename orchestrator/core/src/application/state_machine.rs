// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lifecycle State Machine
//!
//! One instance per deployment id, driven exclusively by the lifecycle
//! channel of that id. Each event is looked up in the static transition
//! table; the edge's action runs to completion before the target state is
//! committed, so an observer never sees a half-applied transition.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Execute lifecycle side effects and own the current state
//!
//! # Failure handling
//!
//! When a fallible action fails, the attempted target state is not
//! committed. A `FAILURE` is synthesized and resolved inline against the
//! attempted target's own `FAILURE` edge, and only the result of that chain
//! is committed: a failed submission lands in `FAILED`, a failed update in
//! `UPDATE_FAILED`, a failed cancel escalates to the undeploy edge.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::registry::TaskHandleStore;
use crate::domain::archive::ArchiveError;
use crate::domain::deployment::DeploymentId;
use crate::domain::events::LifecycleEvent;
use crate::domain::lifecycle::{
    transition, Action, LifecycleError, LifecycleEventKind, LifecycleState, Transition,
};
use crate::domain::provisioning::{ProvisioningClient, ProvisioningError, UndeployOptions};
use crate::infrastructure::event_bus::{BusReceiver, EventBus, EventBusError};

/// Upper bound on chained action failures resolved for a single event.
const MAX_FAILURE_HOPS: usize = 4;

/// Result of handling one lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// An edge was taken; carries the committed state
    Applied(LifecycleState),
    /// No edge for `(state, event)`; nothing changed
    Ignored,
    /// The machine took its eviction edge and must be released
    Evicted,
}

/// Why a consumer loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineExit {
    Evicted,
    ChannelClosed,
    Shutdown,
}

pub struct LifecycleStateMachine {
    deployment_id: DeploymentId,
    state: LifecycleState,
    client: Arc<dyn ProvisioningClient>,
    bus: EventBus,
    tasks: TaskHandleStore,
    state_tx: watch::Sender<LifecycleState>,
}

impl LifecycleStateMachine {
    pub fn new(
        deployment_id: DeploymentId,
        initial: LifecycleState,
        client: Arc<dyn ProvisioningClient>,
        bus: EventBus,
        tasks: TaskHandleStore,
    ) -> (Self, watch::Receiver<LifecycleState>) {
        let (state_tx, state_rx) = watch::channel(initial);
        (
            Self {
                deployment_id,
                state: initial,
                client,
                bus,
                tasks,
                state_tx,
            },
            state_rx,
        )
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Consume the deployment's lifecycle channel until eviction, channel
    /// removal or shutdown. Events are handled strictly one at a time.
    pub async fn run(
        mut self,
        mut events: BusReceiver<LifecycleEvent>,
        shutdown: CancellationToken,
    ) -> MachineExit {
        debug!(
            deployment_id = %self.deployment_id,
            state = %self.state,
            "State machine consumer started"
        );
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return MachineExit::Shutdown,
                next = events.recv() => next,
            };

            match next {
                Ok(event) => {
                    if self.handle(event).await == HandleOutcome::Evicted {
                        return MachineExit::Evicted;
                    }
                }
                Err(EventBusError::Lagged(missed)) => {
                    error!(
                        deployment_id = %self.deployment_id,
                        missed,
                        "Lifecycle consumer lagged, events were lost"
                    );
                }
                Err(EventBusError::Closed) => {
                    debug!(deployment_id = %self.deployment_id, "Lifecycle channel closed");
                    return MachineExit::ChannelClosed;
                }
                Err(e) => {
                    warn!(deployment_id = %self.deployment_id, "Lifecycle receive error: {}", e);
                }
            }
        }
    }

    /// Apply one event. Unknown `(state, event)` pairs are logged and dropped.
    pub async fn handle(&mut self, event: LifecycleEvent) -> HandleOutcome {
        if event.deployment_id != self.deployment_id {
            error!(
                deployment_id = %self.deployment_id,
                foreign = %event.deployment_id,
                "Dropping lifecycle event addressed to another deployment"
            );
            return HandleOutcome::Ignored;
        }

        let from = self.state;
        let Some(edge) = transition(from, event.kind) else {
            error!(
                deployment_id = %self.deployment_id,
                state = %from,
                event = %event.kind,
                "No transition for event in current state, dropping"
            );
            metrics::counter!(
                "yorc_bridge_invalid_transitions_total",
                "state" => from.as_str(),
                "event" => event.kind.as_str()
            )
            .increment(1);
            if let Some(callback) = &event.payload.callback {
                callback.fail(LifecycleError::InvalidTransition {
                    deployment_id: self.deployment_id.clone(),
                    state: from,
                    event: event.kind,
                });
            }
            return HandleOutcome::Ignored;
        };

        let callback = event.payload.callback.clone();
        let mut current = edge;
        let mut hops = 0;
        let mut failure = None;

        let committed = loop {
            match self.execute(current, &event).await {
                Ok(()) => break Some(current),
                Err(err) => {
                    warn!(
                        deployment_id = %self.deployment_id,
                        action = current.action.as_str(),
                        target = %current.to,
                        "Lifecycle action failed, synthesizing FAILURE: {}",
                        err
                    );
                    metrics::counter!(
                        "yorc_bridge_action_failures_total",
                        "action" => current.action.as_str()
                    )
                    .increment(1);
                    failure = Some(err);

                    hops += 1;
                    match transition(current.to, LifecycleEventKind::Failure) {
                        Some(failure_edge) if hops < MAX_FAILURE_HOPS => current = failure_edge,
                        _ => {
                            error!(
                                deployment_id = %self.deployment_id,
                                state = %from,
                                attempted = %current.to,
                                "Action failure could not be resolved, keeping current state"
                            );
                            break None;
                        }
                    }
                }
            }
        };

        let Some(committed) = committed else {
            if let (Some(callback), Some(err)) = (&callback, failure) {
                callback.fail(err);
            }
            return HandleOutcome::Ignored;
        };

        self.commit(from, committed.to, event.kind);

        // A failed step still counts as done when the chain ended on a
        // remote call that went through, e.g. a failed cancel escalating
        // to undeploy.
        if let Some(callback) = &callback {
            match failure {
                Some(err) if !committed.action.is_fallible() => callback.fail(err),
                _ if committed.action == Action::RequestCancellation => {}
                _ => callback.succeed(),
            }
        }

        if committed.action == Action::Evict {
            HandleOutcome::Evicted
        } else {
            HandleOutcome::Applied(committed.to)
        }
    }

    fn commit(&mut self, from: LifecycleState, to: LifecycleState, on: LifecycleEventKind) {
        self.state = to;
        self.state_tx.send_replace(to);
        metrics::counter!(
            "yorc_bridge_lifecycle_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str(),
            "event" => on.as_str()
        )
        .increment(1);
        info!(
            deployment_id = %self.deployment_id,
            from = %from,
            to = %to,
            event = %on,
            "Lifecycle transition"
        );
    }

    async fn execute(
        &self,
        edge: &Transition,
        event: &LifecycleEvent,
    ) -> Result<(), LifecycleError> {
        let id = &self.deployment_id;
        match edge.action {
            Action::None => Ok(()),

            Action::SubmitDeployment => {
                let archive = event.payload.archive.as_ref().ok_or(ArchiveError::Missing)?;
                let bytes = archive.package()?;
                let task = self.client.submit_topology(id, bytes).await?;
                info!(deployment_id = %id, task_id = task.task_id(), "Deployment submitted");
                self.tasks.insert(task);
                Ok(())
            }

            Action::SubmitUpdate => {
                let archive = event.payload.archive.as_ref().ok_or(ArchiveError::Missing)?;
                let bytes = archive.package()?;
                match self.client.update_topology(id, bytes).await? {
                    Some(task) => {
                        info!(deployment_id = %id, task_id = task.task_id(), "Update submitted");
                        self.tasks.insert(task);
                    }
                    None => {
                        // Applied synchronously, no task will report back
                        self.follow_up(self.own_event(LifecycleEventKind::UpdateSuccess));
                    }
                }
                Ok(())
            }

            Action::RequestCancellation => {
                let mut next = self.own_event(LifecycleEventKind::UndeploymentStarted);
                if let Some(callback) = &event.payload.callback {
                    next = next.with_callback(callback.clone());
                }
                self.follow_up(next);
                Ok(())
            }

            Action::CancelTask => {
                let task = self
                    .tasks
                    .get(id)
                    .ok_or_else(|| LifecycleError::NoTaskInFlight(id.clone()))?;
                self.client.cancel_task(&task).await?;
                info!(
                    deployment_id = %id,
                    task_id = task.task_id(),
                    "Cancellation requested for in-flight task"
                );
                self.tasks.remove(id);
                Ok(())
            }

            Action::Undeploy => {
                let task = self.client.undeploy(id, UndeployOptions::default()).await?;
                info!(deployment_id = %id, task_id = task.task_id(), "Undeploy requested");
                self.tasks.insert(task);
                Ok(())
            }

            Action::Purge => {
                match self.client.purge(id, false).await {
                    Ok(()) => {
                        self.tasks.remove(id);
                        self.follow_up(self.own_event(LifecycleEventKind::DeploymentPurged));
                    }
                    Err(ProvisioningError::NotFound(_)) => {
                        self.tasks.remove(id);
                        self.follow_up(self.own_event(LifecycleEventKind::DeploymentNotExisting));
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(())
            }

            Action::ReleaseTask => {
                if let Some(task) = self.tasks.remove(id) {
                    debug!(deployment_id = %id, task_id = task.task_id(), "Task handle released");
                }
                if let Some(cause) = &event.payload.cause {
                    if event.kind == LifecycleEventKind::Failure {
                        warn!(deployment_id = %id, cause = %cause, "Remote operation failed");
                    }
                }
                Ok(())
            }

            Action::Cleanup | Action::Evict => {
                self.tasks.remove(id);
                Ok(())
            }
        }
    }

    /// Publish an event this machine will consume after the current one.
    fn own_event(&self, kind: LifecycleEventKind) -> LifecycleEvent {
        LifecycleEvent::new(self.deployment_id.clone(), kind)
    }

    fn follow_up(&self, event: LifecycleEvent) {
        if let Err(e) = self.bus.publish_lifecycle_event(event) {
            warn!(deployment_id = %self.deployment_id, "Follow-up lifecycle event dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deployment::TaskHandle;
    use crate::domain::events::{wait_for, EventsPage, LogsPage, OperationCallback};
    use crate::domain::provisioning::{CustomCommand, RemoteDeployment, RemoteTask};
    use crate::domain::lifecycle::LifecycleState as S;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Minimal client covering the calls lifecycle actions make
    #[derive(Default)]
    struct ActionClient {
        calls: Mutex<Vec<String>>,
        fail_submit: bool,
        fail_cancel: bool,
        update_without_task: bool,
    }

    impl ActionClient {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    fn unused() -> ProvisioningError {
        ProvisioningError::Configuration("not scripted".to_string())
    }

    #[async_trait]
    impl ProvisioningClient for ActionClient {
        async fn submit_topology(
            &self,
            id: &DeploymentId,
            _archive: Bytes,
        ) -> Result<TaskHandle, ProvisioningError> {
            self.record("submit");
            if self.fail_submit {
                return Err(ProvisioningError::Http { status: 500, body: "boom".into() });
            }
            Ok(TaskHandle::new(id.clone(), format!("/deployments/{}/tasks/t1", id)))
        }
        async fn update_topology(
            &self,
            id: &DeploymentId,
            _archive: Bytes,
        ) -> Result<Option<TaskHandle>, ProvisioningError> {
            self.record("update");
            if self.update_without_task {
                return Ok(None);
            }
            Ok(Some(TaskHandle::new(id.clone(), format!("/deployments/{}/tasks/u1", id))))
        }
        async fn get_deployment(
            &self,
            _id: &DeploymentId,
        ) -> Result<Option<RemoteDeployment>, ProvisioningError> {
            Err(unused())
        }
        async fn list_deployments(&self) -> Result<Vec<RemoteDeployment>, ProvisioningError> {
            Err(unused())
        }
        async fn scale(
            &self,
            _id: &DeploymentId,
            _node: &str,
            _delta: i32,
        ) -> Result<TaskHandle, ProvisioningError> {
            Err(unused())
        }
        async fn undeploy(
            &self,
            id: &DeploymentId,
            _options: UndeployOptions,
        ) -> Result<TaskHandle, ProvisioningError> {
            self.record("undeploy");
            Ok(TaskHandle::new(id.clone(), format!("/deployments/{}/tasks/x1", id)))
        }
        async fn purge(&self, _id: &DeploymentId, _force: bool) -> Result<(), ProvisioningError> {
            self.record("purge");
            Ok(())
        }
        async fn execute_workflow(
            &self,
            _id: &DeploymentId,
            _workflow: &str,
            _inputs: HashMap<String, serde_json::Value>,
            _continue_on_error: bool,
        ) -> Result<TaskHandle, ProvisioningError> {
            Err(unused())
        }
        async fn execute_custom_command(
            &self,
            _id: &DeploymentId,
            _command: &CustomCommand,
        ) -> Result<TaskHandle, ProvisioningError> {
            Err(unused())
        }
        async fn get_task(&self, _task: &TaskHandle) -> Result<RemoteTask, ProvisioningError> {
            Err(unused())
        }
        async fn cancel_task(&self, task: &TaskHandle) -> Result<(), ProvisioningError> {
            self.record(format!("cancel {}", task.task_id()));
            if self.fail_cancel {
                return Err(ProvisioningError::Transport("connection reset".into()));
            }
            Ok(())
        }
        async fn resume_task(&self, _task: &TaskHandle) -> Result<(), ProvisioningError> {
            Err(unused())
        }
        async fn poll_events(&self, _index: u64) -> Result<EventsPage, ProvisioningError> {
            Err(unused())
        }
        async fn poll_logs(&self, _index: u64) -> Result<LogsPage, ProvisioningError> {
            Err(unused())
        }
        async fn latest_event_index(&self) -> Result<u64, ProvisioningError> {
            Err(unused())
        }
        async fn latest_log_index(&self) -> Result<u64, ProvisioningError> {
            Err(unused())
        }
    }

    fn build_machine(
        client: Arc<ActionClient>,
        initial: LifecycleState) -> (LifecycleStateMachine, EventBus, TaskHandleStore,
    ) {
        let bus = EventBus::new(16);
        let id = DeploymentId::from("d1");
        bus.create_channels(&id);
        let tasks = TaskHandleStore::new();
        let (machine, _state) =
            LifecycleStateMachine::new(id, initial, client, bus.clone(), tasks.clone());
        (machine, bus, tasks)
    }

    fn event(kind: LifecycleEventKind) -> LifecycleEvent {
        LifecycleEvent::new(DeploymentId::from("d1"), kind)
    }

    #[tokio::test]
    async fn test_unknown_pairs_leave_state_untouched() {
        for state in LifecycleState::ALL {
            for kind in LifecycleEventKind::ALL {
                if transition(state, kind).is_some() {
                    continue;
                }
                let client = Arc::new(ActionClient::default());
                let (mut machine, _bus, _tasks) = build_machine(client.clone(), state);
                let (callback, rx) = OperationCallback::new();

                let outcome = machine.handle(event(kind).with_callback(callback)).await;

                assert_eq!(outcome, HandleOutcome::Ignored);
                assert_eq!(machine.state(), state);
                assert!(client.calls().is_empty(), "{} on {} must not run an action", kind, state);
                let result = wait_for(rx).await;
                assert!(matches!(result, Err(LifecycleError::InvalidTransition { .. })));
            }
        }
    }

    #[tokio::test]
    async fn test_submit_success_caches_task_and_completes_callback() {
        let client = Arc::new(ActionClient::default());
        let (mut machine, _bus, tasks) = build_machine(client.clone(), S::Undeployed);
        let (callback, rx) = OperationCallback::new();

        let outcome = machine
            .handle(
                event(LifecycleEventKind::DeploymentStarted)
                    .with_archive(Arc::new(Bytes::from_static(b"zip")))
                    .with_callback(callback),
            )
            .await;

        assert_eq!(outcome, HandleOutcome::Applied(S::DeploymentInit));
        assert_eq!(tasks.get(&DeploymentId::from("d1")).unwrap().task_id(), "t1");
        assert!(wait_for(rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_failure_lands_in_failed() {
        let client = Arc::new(ActionClient {
            fail_submit: true,
            ..Default::default()
        });
        let (mut machine, _bus, tasks) = build_machine(client.clone(), S::Undeployed);
        let (callback, rx) = OperationCallback::new();

        let outcome = machine
            .handle(
                event(LifecycleEventKind::DeploymentStarted)
                    .with_archive(Arc::new(Bytes::from_static(b"zip")))
                    .with_callback(callback),
            )
            .await;

        assert_eq!(outcome, HandleOutcome::Applied(S::Failed));
        assert!(tasks.get(&DeploymentId::from("d1")).is_none());
        assert!(matches!(wait_for(rx).await, Err(LifecycleError::RemoteFailure(_))));
    }

    #[tokio::test]
    async fn test_packaging_failure_fails_before_any_network_call() {
        let client = Arc::new(ActionClient::default());
        let (mut machine, _bus, _tasks) = build_machine(client.clone(), S::Undeployed);
        let (callback, rx) = OperationCallback::new();

        let outcome = machine
            .handle(
                event(LifecycleEventKind::DeploymentStarted)
                    .with_archive(Arc::new(Bytes::new()))
                    .with_callback(callback),
            )
            .await;

        assert_eq!(outcome, HandleOutcome::Applied(S::Failed));
        assert!(client.calls().is_empty());
        assert!(matches!(wait_for(rx).await, Err(LifecycleError::Archive(ArchiveError::Empty))));
    }

    #[tokio::test]
    async fn test_failed_cancel_escalates_to_undeploy() {
        let client = Arc::new(ActionClient {
            fail_cancel: true,
            ..Default::default()
        });
        let (mut machine, _bus, tasks) = build_machine(client.clone(), S::CancellationRequested);
        tasks.insert(TaskHandle::new(DeploymentId::from("d1"), "/deployments/d1/tasks/t2"));

        let outcome = machine.handle(event(LifecycleEventKind::UndeploymentStarted)).await;

        assert_eq!(outcome, HandleOutcome::Applied(S::UndeploymentInProgress));
        assert_eq!(client.calls(), vec!["cancel t2", "undeploy"]);
    }

    #[tokio::test]
    async fn test_failed_cancel_still_completes_undeploy_callback() {
        let client = Arc::new(ActionClient {
            fail_cancel: true,
            ..Default::default()
        });
        let (mut machine, _bus, tasks) = build_machine(client.clone(), S::CancellationRequested);
        tasks.insert(TaskHandle::new(DeploymentId::from("d1"), "/deployments/d1/tasks/t2"));
        let (callback, rx) = OperationCallback::new();

        let outcome = machine
            .handle(event(LifecycleEventKind::UndeploymentStarted).with_callback(callback))
            .await;

        assert_eq!(outcome, HandleOutcome::Applied(S::UndeploymentInProgress));
        assert!(wait_for(rx).await.is_ok());
        assert_eq!(tasks.get(&DeploymentId::from("d1")).unwrap().task_id(), "x1");
    }

    #[tokio::test]
    async fn test_synchronous_update_emits_update_success() {
        let client = Arc::new(ActionClient {
            update_without_task: true,
            ..Default::default()
        });
        let (mut machine, bus, _tasks) = build_machine(client.clone(), S::Deployed);
        let mut lifecycle = bus.subscribe_lifecycle(&DeploymentId::from("d1")).unwrap();

        let archive = Arc::new(Bytes::from_static(b"zip"));
        let outcome = machine
            .handle(event(LifecycleEventKind::UpdateStarted).with_archive(archive))
            .await;
        assert_eq!(outcome, HandleOutcome::Applied(S::UpdateInProgress));

        let follow_up = lifecycle.recv().await.unwrap();
        assert_eq!(follow_up.kind, LifecycleEventKind::UpdateSuccess);
        assert_eq!(machine.handle(follow_up).await, HandleOutcome::Applied(S::Updated));
    }

    #[tokio::test]
    async fn test_purge_emits_deployment_purged() {
        let client = Arc::new(ActionClient::default());
        let (mut machine, bus, _tasks) = build_machine(client.clone(), S::UndeploymentInProgress);
        let mut lifecycle = bus.subscribe_lifecycle(&DeploymentId::from("d1")).unwrap();

        let outcome = machine.handle(event(LifecycleEventKind::UndeploymentSuccess)).await;
        assert_eq!(outcome, HandleOutcome::Applied(S::UndeploymentPurging));
        assert_eq!(client.calls(), vec!["purge"]);
        assert_eq!(lifecycle.recv().await.unwrap().kind, LifecycleEventKind::DeploymentPurged);
    }

    #[tokio::test]
    async fn test_eviction_reports_evicted() {
        let client = Arc::new(ActionClient::default());
        let (mut machine, _bus, tasks) = build_machine(client, S::Deployed);
        tasks.insert(TaskHandle::new(DeploymentId::from("d1"), "/deployments/d1/tasks/s1"));

        let outcome = machine.handle(event(LifecycleEventKind::Eviction)).await;
        assert_eq!(outcome, HandleOutcome::Evicted);
        assert_eq!(machine.state(), S::Undeployed);
        assert!(tasks.get(&DeploymentId::from("d1")).is_none());
    }
}
