// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::domain::archive::DeploymentArchive;
use crate::domain::deployment::DeploymentId;
use crate::domain::lifecycle::{LifecycleError, LifecycleEventKind};

// ============================================================================
// Lifecycle Events (local input symbols)
// ============================================================================

/// Tagged message consumed by exactly one deployment's state machine.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub deployment_id: DeploymentId,
    pub kind: LifecycleEventKind,
    pub payload: EventPayload,
    pub emitted_at: DateTime<Utc>,
}

/// Operation context the action on the matching edge needs.
#[derive(Debug, Clone, Default)]
pub struct EventPayload {
    pub archive: Option<Arc<dyn DeploymentArchive>>,
    pub callback: Option<OperationCallback>,
    pub task_id: Option<String>,
    /// Originating cause for synthesized or remote-reported failures
    pub cause: Option<String>,
}

impl LifecycleEvent {
    pub fn new(deployment_id: DeploymentId, kind: LifecycleEventKind) -> Self {
        Self {
            deployment_id,
            kind,
            payload: EventPayload::default(),
            emitted_at: Utc::now(),
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn DeploymentArchive>) -> Self {
        self.payload.archive = Some(archive);
        self
    }

    pub fn with_callback(mut self, callback: OperationCallback) -> Self {
        self.payload.callback = Some(callback);
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.payload.task_id = Some(task_id.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.payload.cause = Some(cause.into());
        self
    }
}

// ============================================================================
// Operation Callbacks
// ============================================================================

pub type OperationResult = Result<(), LifecycleError>;

/// One-shot completion handle for an operator request (deploy, undeploy,
/// update). Cloneable so it can ride along on follow-up events; the first
/// completion wins and later ones are ignored.
#[derive(Clone)]
pub struct OperationCallback {
    sender: Arc<Mutex<Option<oneshot::Sender<OperationResult>>>>,
}

impl OperationCallback {
    pub fn new() -> (Self, oneshot::Receiver<OperationResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    pub fn succeed(&self) {
        self.complete(Ok(()));
    }

    pub fn fail(&self, error: LifecycleError) {
        self.complete(Err(error));
    }

    pub fn complete(&self, result: OperationResult) {
        if let Some(tx) = self.sender.lock().take() {
            // Receiver gone means the caller stopped waiting
            let _ = tx.send(result);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl fmt::Debug for OperationCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCallback")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Await a callback receiver, mapping a dropped sender to
/// [`LifecycleError::Abandoned`].
pub async fn wait_for(rx: oneshot::Receiver<OperationResult>) -> OperationResult {
    rx.await.unwrap_or(Err(LifecycleError::Abandoned))
}

// ============================================================================
// Remote Events (long-poll stream)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteEventType {
    Instance,
    Deployment,
    Scaling,
    Workflow,
    CustomCommand,
    #[serde(other)]
    Other,
}

/// Status change reported by the remote engine on `GET /events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    #[serde(default)]
    pub timestamp: String,
    pub deployment_id: DeploymentId,
    #[serde(rename = "type")]
    pub event_type: RemoteEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl RemoteEvent {
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Whether a task-scoped event reports the end of its task.
    pub fn is_terminal_task_status(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "done" | "failed" | "canceled" | "cancelled" | "error"
        )
    }
}

/// Log line reported by the remote engine on `GET /logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(default)]
    pub timestamp: String,
    pub deployment_id: DeploymentId,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsPage {
    #[serde(default)]
    pub events: Vec<RemoteEvent>,
    pub last_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogsPage {
    #[serde(default)]
    pub logs: Vec<LogRecord>,
    pub last_index: u64,
}
