// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use yorc_bridge_core::application::deployment_service::DeploymentService;
use yorc_bridge_core::application::registry::StateMachineRegistry;
use yorc_bridge_core::domain::deployment::{DeploymentId, TaskHandle};
use yorc_bridge_core::domain::events::{EventsPage, LogsPage};
use yorc_bridge_core::domain::lifecycle::{LifecycleError, LifecycleState};
use yorc_bridge_core::domain::provisioning::{
    CustomCommand, ProvisioningClient, ProvisioningError, RemoteDeployment, RemoteTask,
    UndeployOptions,
};
use yorc_bridge_core::infrastructure::event_bus::EventBus;
use yorc_bridge_core::infrastructure::worker_pool::WorkerPool;

/// In-process provisioning engine. Deployment calls always succeed unless
/// told otherwise; the long-poll streams replay a script and then hang like
/// an idle server.
#[derive(Default)]
pub struct ScriptedClient {
    calls: Mutex<Vec<String>>,
    remote: Mutex<Vec<RemoteDeployment>>,
    listing_failures: Mutex<usize>,
    list_calls: Mutex<usize>,
    event_script: Mutex<VecDeque<Result<EventsPage, ProvisioningError>>>,
    event_polls: Mutex<Vec<(u64, Instant)>>,
    log_script: Mutex<VecDeque<Result<LogsPage, ProvisioningError>>>,
    log_polls: Mutex<Vec<u64>>,
    head_index: Mutex<u64>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn set_remote(&self, deployments: &[(&str, &str)]) {
        *self.remote.lock() = deployments
            .iter()
            .map(|(id, status)| RemoteDeployment {
                id: DeploymentId::from(*id),
                status: status.to_string(),
                links: Vec::new(),
            })
            .collect();
    }

    /// Make the next `count` listings fail with a transport error.
    pub fn fail_listings(&self, count: usize) {
        *self.listing_failures.lock() = count;
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock()
    }

    pub fn script_events(&self, script: Vec<Result<EventsPage, ProvisioningError>>) {
        self.event_script.lock().extend(script);
    }

    pub fn event_polls(&self) -> Vec<(u64, Instant)> {
        self.event_polls.lock().clone()
    }

    pub fn script_logs(&self, script: Vec<Result<LogsPage, ProvisioningError>>) {
        self.log_script.lock().extend(script);
    }

    pub fn log_polls(&self) -> Vec<u64> {
        self.log_polls.lock().clone()
    }

    pub fn set_head_index(&self, index: u64) {
        *self.head_index.lock() = index;
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

fn task(id: &DeploymentId, task_id: &str) -> TaskHandle {
    TaskHandle::new(id.clone(), format!("/deployments/{}/tasks/{}", id, task_id))
}

#[async_trait]
impl ProvisioningClient for ScriptedClient {
    async fn submit_topology(
        &self,
        id: &DeploymentId,
        _archive: Bytes,
    ) -> Result<TaskHandle, ProvisioningError> {
        self.record(format!("submit {}", id));
        Ok(task(id, "t1"))
    }

    async fn update_topology(
        &self,
        id: &DeploymentId,
        _archive: Bytes,
    ) -> Result<Option<TaskHandle>, ProvisioningError> {
        self.record(format!("update {}", id));
        Ok(Some(task(id, "u1")))
    }

    async fn get_deployment(
        &self,
        id: &DeploymentId,
    ) -> Result<Option<RemoteDeployment>, ProvisioningError> {
        self.record(format!("get {}", id));
        Ok(self.remote.lock().iter().find(|d| &d.id == id).cloned())
    }

    async fn list_deployments(&self) -> Result<Vec<RemoteDeployment>, ProvisioningError> {
        *self.list_calls.lock() += 1;
        let mut failures = self.listing_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(ProvisioningError::Transport("connection refused".into()));
        }
        Ok(self.remote.lock().clone())
    }

    async fn scale(
        &self,
        id: &DeploymentId,
        node: &str,
        delta: i32,
    ) -> Result<TaskHandle, ProvisioningError> {
        self.record(format!("scale {} {} {}", id, node, delta));
        Ok(task(id, "s1"))
    }

    async fn undeploy(
        &self,
        id: &DeploymentId,
        _options: UndeployOptions,
    ) -> Result<TaskHandle, ProvisioningError> {
        self.record(format!("undeploy {}", id));
        Ok(task(id, "x1"))
    }

    async fn purge(&self, id: &DeploymentId, _force: bool) -> Result<(), ProvisioningError> {
        self.record(format!("purge {}", id));
        Ok(())
    }

    async fn execute_workflow(
        &self,
        id: &DeploymentId,
        workflow: &str,
        _inputs: HashMap<String, serde_json::Value>,
        _continue_on_error: bool,
    ) -> Result<TaskHandle, ProvisioningError> {
        self.record(format!("workflow {} {}", id, workflow));
        Ok(task(id, "w1"))
    }

    async fn execute_custom_command(
        &self,
        id: &DeploymentId,
        command: &CustomCommand,
    ) -> Result<TaskHandle, ProvisioningError> {
        self.record(format!("custom {} {}", id, command.name));
        Ok(task(id, "c1"))
    }

    async fn get_task(&self, task: &TaskHandle) -> Result<RemoteTask, ProvisioningError> {
        Ok(RemoteTask {
            id: task.task_id().to_string(),
            target_id: task.deployment_id.to_string(),
            task_type: "Deploy".to_string(),
            status: "RUNNING".to_string(),
        })
    }

    async fn cancel_task(&self, task: &TaskHandle) -> Result<(), ProvisioningError> {
        self.record(format!("cancel {}", task.task_id()));
        Ok(())
    }

    async fn resume_task(&self, task: &TaskHandle) -> Result<(), ProvisioningError> {
        self.record(format!("resume {}", task.task_id()));
        Ok(())
    }

    async fn poll_events(&self, index: u64) -> Result<EventsPage, ProvisioningError> {
        self.event_polls.lock().push((index, Instant::now()));
        let next = self.event_script.lock().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn poll_logs(&self, index: u64) -> Result<LogsPage, ProvisioningError> {
        self.log_polls.lock().push(index);
        let next = self.log_script.lock().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn latest_event_index(&self) -> Result<u64, ProvisioningError> {
        Ok(*self.head_index.lock())
    }

    async fn latest_log_index(&self) -> Result<u64, ProvisioningError> {
        Ok(*self.head_index.lock())
    }
}

/// Registry, bus and facade wired around one scripted client
pub struct Harness {
    pub client: Arc<ScriptedClient>,
    pub bus: EventBus,
    pub pool: WorkerPool,
    pub registry: StateMachineRegistry,
    pub service: DeploymentService,
}

impl Harness {
    pub fn new(client: Arc<ScriptedClient>) -> Self {
        let bus = EventBus::new(64);
        let pool = WorkerPool::current();
        let registry = StateMachineRegistry::start(client.clone(), bus.clone(), &pool);
        let service =
            DeploymentService::new(client.clone(), registry.clone(), bus.clone(), pool.clone());
        Self {
            client,
            bus,
            pool,
            registry,
            service,
        }
    }

    pub async fn register(&self, id: &str, state: LifecycleState) -> DeploymentId {
        let id = DeploymentId::from(id);
        self.registry
            .create_with_states(vec![(id.clone(), state)])
            .await
            .expect("registry running");
        id
    }

    pub async fn wait_for_state(&self, id: &DeploymentId, state: LifecycleState) {
        self.registry
            .wait_for_state(id, state, Duration::from_secs(5))
            .await
            .unwrap_or_else(|e| panic!("{} never reached {}: {}", id, state, e));
    }

    /// Wait until the registry no longer knows `id`.
    pub async fn wait_for_release(&self, id: &DeploymentId) {
        let released = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Err(LifecycleError::NotFound(_)) = self.registry.state_of(id).await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(released.is_ok(), "{} was never released", id);
    }
}
