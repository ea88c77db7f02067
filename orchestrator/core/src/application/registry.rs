// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! State Machine Registry
//!
//! Single authority for "does a coordination unit exist for id X". The map
//! from deployment id to state machine is owned by one actor task; every
//! caller talks to it through [`StateMachineRegistry`], a cheap cloneable
//! handle that sends commands over an mpsc mailbox. No lock guards the
//! machine map.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Create, route to, observe and release per-deployment machines
//!
//! Each machine runs as its own consumer task on the [`WorkerPool`],
//! subscribed to its deployment's lifecycle channel before `create` returns.
//! After taking its eviction edge the consumer reports back and the actor
//! drops the entry, the bus channels and any cached task handle.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::state_machine::{LifecycleStateMachine, MachineExit};
use crate::domain::deployment::{DeploymentId, DeploymentStatus, TaskHandle};
use crate::domain::events::LifecycleEvent;
use crate::domain::lifecycle::{LifecycleError, LifecycleState};
use crate::domain::provisioning::ProvisioningClient;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::worker_pool::WorkerPool;

const MAILBOX_CAPACITY: usize = 256;

// ============================================================================
// Task Handles
// ============================================================================

/// In-flight remote task per deployment. Entries exist only between
/// "operation submitted" and "operation result observed".
#[derive(Clone, Default)]
pub struct TaskHandleStore {
    handles: Arc<Mutex<HashMap<DeploymentId, TaskHandle>>>,
}

impl TaskHandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache `handle`, replacing any previous task of the same deployment.
    pub fn insert(&self, handle: TaskHandle) -> Option<TaskHandle> {
        self.handles.lock().insert(handle.deployment_id.clone(), handle)
    }

    pub fn get(&self, id: &DeploymentId) -> Option<TaskHandle> {
        self.handles.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &DeploymentId) -> Option<TaskHandle> {
        self.handles.lock().remove(id)
    }

    /// Remove the cached handle only if it still refers to `task_id`.
    pub fn remove_if_task(&self, id: &DeploymentId, task_id: &str) -> bool {
        let mut handles = self.handles.lock();
        match handles.get(id) {
            Some(handle) if handle.task_id() == task_id => {
                handles.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

// ============================================================================
// Actor
// ============================================================================

enum RegistryCommand {
    Create {
        entries: Vec<(DeploymentId, LifecycleState)>,
        reply: oneshot::Sender<Vec<DeploymentId>>,
    },
    Dispatch {
        event: LifecycleEvent,
        reply: oneshot::Sender<Result<(), LifecycleError>>,
    },
    Watch {
        id: DeploymentId,
        reply: oneshot::Sender<Option<watch::Receiver<LifecycleState>>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<(DeploymentId, LifecycleState)>>,
    },
    /// Removes only while the machine is in `expected`, when set
    Remove {
        id: DeploymentId,
        expected: Option<LifecycleState>,
        reply: oneshot::Sender<bool>,
    },
    /// Sent by a consumer after its machine took the eviction edge
    Release { id: DeploymentId, generation: u64 },
}

struct MachineEntry {
    state: watch::Receiver<LifecycleState>,
    generation: u64,
    consumer: JoinHandle<()>,
}

struct RegistryActor {
    machines: HashMap<DeploymentId, MachineEntry>,
    next_generation: u64,
    client: Arc<dyn ProvisioningClient>,
    bus: EventBus,
    tasks: TaskHandleStore,
    pool: WorkerPool,
    mailbox: mpsc::Sender<RegistryCommand>,
}

impl RegistryActor {
    async fn run(mut self, mut commands: mpsc::Receiver<RegistryCommand>) {
        let shutdown = self.pool.shutdown_token();
        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                RegistryCommand::Create { entries, reply } => {
                    let created = entries
                        .into_iter()
                        .filter_map(|(id, initial)| self.create(id, initial))
                        .collect();
                    let _ = reply.send(created);
                }
                RegistryCommand::Dispatch { event, reply } => {
                    let _ = reply.send(self.dispatch(event));
                }
                RegistryCommand::Watch { id, reply } => {
                    let _ = reply.send(self.machines.get(&id).map(|entry| entry.state.clone()));
                }
                RegistryCommand::Snapshot { reply } => {
                    let snapshot = self
                        .machines
                        .iter()
                        .map(|(id, entry)| (id.clone(), *entry.state.borrow()))
                        .collect();
                    let _ = reply.send(snapshot);
                }
                RegistryCommand::Remove { id, expected, reply } => {
                    let matches = match (self.machines.get(&id), expected) {
                        (Some(entry), Some(expected)) => *entry.state.borrow() == expected,
                        (Some(_), None) => true,
                        (None, _) => false,
                    };
                    let removed = matches && self.machines.remove(&id).is_some();
                    if removed {
                        self.release_resources(&id);
                        info!(deployment_id = %id, "State machine removed");
                    }
                    let _ = reply.send(removed);
                }
                RegistryCommand::Release { id, generation } => {
                    let current = self.machines.get(&id).map(|entry| entry.generation);
                    if current == Some(generation) {
                        self.machines.remove(&id);
                        self.release_resources(&id);
                        info!(deployment_id = %id, "Evicted state machine released");
                    } else {
                        debug!(deployment_id = %id, "Stale release ignored");
                    }
                }
            }
        }

        for (_, entry) in self.machines.drain() {
            entry.consumer.abort();
        }
        debug!("State machine registry stopped");
    }

    fn create(&mut self, id: DeploymentId, initial: LifecycleState) -> Option<DeploymentId> {
        if self.machines.contains_key(&id) {
            return None;
        }

        self.bus.create_channels(&id);
        let events = match self.bus.subscribe_lifecycle(&id) {
            Ok(events) => events,
            Err(e) => {
                error!(deployment_id = %id, "Cannot subscribe state machine: {}", e);
                return None;
            }
        };

        let (machine, state) = LifecycleStateMachine::new(
            id.clone(),
            initial,
            self.client.clone(),
            self.bus.clone(),
            self.tasks.clone(),
        );

        let generation = self.next_generation;
        self.next_generation += 1;

        let mailbox = self.mailbox.clone();
        let shutdown = self.pool.shutdown_token();
        let machine_id = id.clone();
        let consumer = self.pool.spawn(async move {
            if machine.run(events, shutdown).await == MachineExit::Evicted {
                let _ = mailbox
                    .send(RegistryCommand::Release {
                        id: machine_id,
                        generation,
                    })
                    .await;
            }
        });

        self.machines.insert(
            id.clone(),
            MachineEntry {
                state,
                generation,
                consumer,
            },
        );
        self.record_gauge();
        info!(deployment_id = %id, state = %initial, "State machine created");
        Some(id)
    }

    fn dispatch(&self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        if !self.machines.contains_key(&event.deployment_id) {
            warn!(
                deployment_id = %event.deployment_id,
                event = %event.kind,
                "No state machine registered, dropping event"
            );
            let error = LifecycleError::NotFound(event.deployment_id.clone());
            if let Some(callback) = &event.payload.callback {
                callback.fail(error.clone());
            }
            return Err(error);
        }

        let id = event.deployment_id.clone();
        self.bus
            .publish_lifecycle_event(event)
            .map_err(|_| LifecycleError::NotFound(id))
    }

    fn release_resources(&mut self, id: &DeploymentId) {
        self.bus.remove_channels(id);
        self.tasks.remove(id);
        self.record_gauge();
    }

    fn record_gauge(&self) {
        metrics::gauge!("yorc_bridge_state_machines").set(self.machines.len() as f64);
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable handle to the registry actor
#[derive(Clone)]
pub struct StateMachineRegistry {
    mailbox: mpsc::Sender<RegistryCommand>,
    tasks: TaskHandleStore,
}

impl StateMachineRegistry {
    /// Spawn the registry actor on `pool`.
    pub fn start(client: Arc<dyn ProvisioningClient>, bus: EventBus, pool: &WorkerPool) -> Self {
        let (mailbox, commands) = mpsc::channel(MAILBOX_CAPACITY);
        let tasks = TaskHandleStore::new();

        let actor = RegistryActor {
            machines: HashMap::new(),
            next_generation: 0,
            client,
            bus,
            tasks: tasks.clone(),
            pool: pool.clone(),
            mailbox: mailbox.clone(),
        };
        pool.spawn(actor.run(commands));

        Self { mailbox, tasks }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, LifecycleError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(command(reply))
            .await
            .map_err(|_| LifecycleError::RegistryClosed)?;
        response.await.map_err(|_| LifecycleError::RegistryClosed)
    }

    /// Idempotently create machines in `UNDEPLOYED`. Returns the ids that
    /// were actually created.
    pub async fn create<I>(&self, ids: I) -> Result<Vec<DeploymentId>, LifecycleError>
    where
        I: IntoIterator<Item = DeploymentId>,
    {
        let entries = ids
            .into_iter()
            .map(|id| (id, LifecycleState::Undeployed))
            .collect();
        self.create_with_states(entries).await
    }

    /// Idempotently create machines re-attached to a known state, used at
    /// startup for deployments already active on the remote engine.
    pub async fn create_with_states(
        &self,
        entries: Vec<(DeploymentId, LifecycleState)>,
    ) -> Result<Vec<DeploymentId>, LifecycleError> {
        self.request(|reply| RegistryCommand::Create { entries, reply }).await
    }

    /// Route `event` to its machine. Without a machine the event is logged,
    /// its callback failed and `NotFound` returned.
    pub async fn dispatch(&self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        self.request(|reply| RegistryCommand::Dispatch { event, reply }).await?
    }

    /// Externally visible status of `id`.
    pub async fn state_of(&self, id: &DeploymentId) -> Result<DeploymentStatus, LifecycleError> {
        self.lifecycle_state(id).await.map(LifecycleState::status)
    }

    /// Internal lifecycle state of `id`.
    pub async fn lifecycle_state(
        &self,
        id: &DeploymentId,
    ) -> Result<LifecycleState, LifecycleError> {
        let receiver = self.watch(id).await?;
        let state = *receiver.borrow();
        Ok(state)
    }

    /// Receiver following every committed state of `id`.
    pub async fn watch(
        &self,
        id: &DeploymentId,
    ) -> Result<watch::Receiver<LifecycleState>, LifecycleError> {
        let lookup = id.clone();
        self.request(|reply| RegistryCommand::Watch { id: lookup, reply })
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))
    }

    /// Wait until `id` reaches `target`, or fail after `timeout`.
    pub async fn wait_for_state(
        &self,
        id: &DeploymentId,
        target: LifecycleState,
        timeout: Duration,
    ) -> Result<(), LifecycleError> {
        let mut receiver = self.watch(id).await?;
        let reached = tokio::time::timeout(timeout, receiver.wait_for(|state| *state == target))
            .await
            .map(|result| result.is_ok());
        match reached {
            Ok(true) => Ok(()),
            // Machine released while waiting
            Ok(false) => Err(LifecycleError::NotFound(id.clone())),
            Err(_) => {
                let state = *receiver.borrow();
                Err(LifecycleError::InvalidState {
                    deployment_id: id.clone(),
                    state,
                    operation: "wait_for_state",
                })
            }
        }
    }

    /// Every registered id with its current lifecycle state.
    pub async fn snapshot(&self) -> Result<Vec<(DeploymentId, LifecycleState)>, LifecycleError> {
        self.request(|reply| RegistryCommand::Snapshot { reply }).await
    }

    pub async fn local_ids(&self) -> Result<Vec<DeploymentId>, LifecycleError> {
        Ok(self.snapshot().await?.into_iter().map(|(id, _)| id).collect())
    }

    /// Destroy the coordination unit of `id` (operator purge).
    pub async fn remove(&self, id: &DeploymentId) -> Result<bool, LifecycleError> {
        let id = id.clone();
        self.request(|reply| RegistryCommand::Remove {
            id,
            expected: None,
            reply,
        })
        .await
    }

    /// Remove `id` only if its machine is currently in `state`. Returns
    /// whether it was removed.
    pub async fn remove_if_state(
        &self,
        id: &DeploymentId,
        state: LifecycleState,
    ) -> Result<bool, LifecycleError> {
        let id = id.clone();
        self.request(|reply| RegistryCommand::Remove {
            id,
            expected: Some(state),
            reply,
        })
        .await
    }

    pub fn task_handles(&self) -> &TaskHandleStore {
        &self.tasks
    }
}
