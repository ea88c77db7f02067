// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Per-Deployment Pub/Sub
//
// Each deployment id owns three independent tokio broadcast channels:
// - remote: raw events from the long-poll stream (instance/attribute observers)
// - logs: log records from the log stream (log sinks)
// - lifecycle: local input symbols for the deployment's state machine
//
// The remote -> lifecycle mapping happens here so that state machine consumers
// only ever see LifecycleEvents. Everything is in-memory; events published
// before anyone subscribed are lost.

use crate::domain::deployment::DeploymentId;
use crate::domain::events::{LifecycleEvent, LogRecord, RemoteEvent, RemoteEventType};
use crate::domain::lifecycle::{event_for_remote_status, LifecycleEventKind};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct DeploymentChannels {
    remote: broadcast::Sender<RemoteEvent>,
    logs: broadcast::Sender<LogRecord>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl DeploymentChannels {
    fn new(capacity: usize) -> Self {
        let (remote, _) = broadcast::channel(capacity);
        let (logs, _) = broadcast::channel(capacity);
        let (lifecycle, _) = broadcast::channel(capacity);
        Self {
            remote,
            logs,
            lifecycle,
        }
    }
}

/// Event bus multiplexing remote events, logs and lifecycle events per
/// deployment id
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<DashMap<DeploymentId, DeploymentChannels>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus; `capacity` bounds each channel's buffer before
    /// slow receivers start lagging
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Register the channels of `id`. Idempotent; existing channels and their
    /// subscribers are kept.
    pub fn create_channels(&self, id: &DeploymentId) {
        self.channels
            .entry(id.clone())
            .or_insert_with(|| DeploymentChannels::new(self.capacity));
    }

    /// Drop the channels of `id`. Receivers drain what is buffered and then
    /// observe [`EventBusError::Closed`].
    pub fn remove_channels(&self, id: &DeploymentId) -> bool {
        self.channels.remove(id).is_some()
    }

    pub fn has_channels(&self, id: &DeploymentId) -> bool {
        self.channels.contains_key(id)
    }

    pub fn deployment_ids(&self) -> Vec<DeploymentId> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Publish a raw remote event and, for `type=deployment` events, the
    /// lifecycle event its status stands for.
    pub fn publish_remote_event(&self, event: RemoteEvent) -> Result<(), EventBusError> {
        let channels = self.lookup(&event.deployment_id, "remote event")?;

        let lifecycle = if event.event_type == RemoteEventType::Deployment {
            match event_for_remote_status(&event.status) {
                Ok(kind) => {
                    let mut lifecycle = LifecycleEvent::new(event.deployment_id.clone(), kind);
                    if let Some(task_id) = &event.task_id {
                        lifecycle = lifecycle.with_task_id(task_id.clone());
                    }
                    if kind == LifecycleEventKind::Failure {
                        lifecycle = lifecycle.with_cause(format!("remote status {}", event.status));
                    }
                    Some(lifecycle)
                }
                Err(e) => {
                    error!(
                        deployment_id = %event.deployment_id,
                        status = %event.status,
                        "Unknown remote deployment status, not mapped to a lifecycle event: {}",
                        e
                    );
                    metrics::counter!("yorc_bridge_unknown_remote_status_total").increment(1);
                    let _ = channels.remote.send(event.clone());
                    return Err(EventBusError::UnknownRemoteStatus {
                        deployment_id: event.deployment_id,
                        status: event.status,
                    });
                }
            }
        } else {
            None
        };

        let receivers = channels.remote.send(event).unwrap_or(0);
        if receivers == 0 {
            debug!("No subscribers listening to remote events");
        }

        if let Some(lifecycle) = lifecycle {
            Self::send_lifecycle(&channels, lifecycle);
        }
        Ok(())
    }

    pub fn publish_log(&self, record: LogRecord) -> Result<(), EventBusError> {
        let channels = self.lookup(&record.deployment_id, "log record")?;
        let _ = channels.logs.send(record);
        Ok(())
    }

    pub fn publish_lifecycle_event(&self, event: LifecycleEvent) -> Result<(), EventBusError> {
        let channels = self.lookup(&event.deployment_id, "lifecycle event")?;
        Self::send_lifecycle(&channels, event);
        Ok(())
    }

    pub fn subscribe_remote_events(
        &self,
        id: &DeploymentId,
    ) -> Result<BusReceiver<RemoteEvent>, EventBusError> {
        let channels = self.lookup(id, "remote event subscription")?;
        Ok(BusReceiver::new(channels.remote.subscribe()))
    }

    pub fn subscribe_logs(
        &self,
        id: &DeploymentId,
    ) -> Result<BusReceiver<LogRecord>, EventBusError> {
        let channels = self.lookup(id, "log subscription")?;
        Ok(BusReceiver::new(channels.logs.subscribe()))
    }

    pub fn subscribe_lifecycle(
        &self,
        id: &DeploymentId,
    ) -> Result<BusReceiver<LifecycleEvent>, EventBusError> {
        let channels = self.lookup(id, "lifecycle subscription")?;
        Ok(BusReceiver::new(channels.lifecycle.subscribe()))
    }

    fn lookup(
        &self,
        id: &DeploymentId,
        what: &'static str,
    ) -> Result<dashmap::mapref::one::Ref<'_, DeploymentId, DeploymentChannels>, EventBusError> {
        self.channels.get(id).ok_or_else(|| {
            // Evicted mid-flight or never registered
            error!(deployment_id = %id, "Dropping {}: no channels registered for deployment", what);
            EventBusError::UnknownDeployment(id.clone())
        })
    }

    fn send_lifecycle(channels: &DeploymentChannels, event: LifecycleEvent) {
        debug!(
            deployment_id = %event.deployment_id,
            event = %event.kind,
            "Publishing lifecycle event"
        );
        if channels.lifecycle.send(event).is_err() {
            warn!("No state machine subscribed to lifecycle channel");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for one channel of one deployment
pub struct BusReceiver<T> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> BusReceiver<T> {
    fn new(receiver: broadcast::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// Receive the next item (waits until one is available)
    pub async fn recv(&mut self) -> Result<T, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an item without waiting
    pub fn try_recv(&mut self) -> Result<T, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),

    #[error("No channels registered for deployment {0}")]
    UnknownDeployment(DeploymentId),

    #[error("Unknown remote deployment status '{status}' for {deployment_id}")]
    UnknownRemoteStatus {
        deployment_id: DeploymentId,
        status: String,
    },
}
