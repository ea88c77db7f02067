// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Provisioning Engine Port
//!
//! Typed contract for the remote provisioning engine's HTTP control plane.
//! The lifecycle core only ever talks to the remote through this trait; the
//! reqwest adapter lives in `crate::infrastructure::yorc_client`.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Anti-corruption boundary for the remote control plane
//! - **Implementations:** `YorcClient` (HTTP), scripted fakes in tests

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::deployment::{DeploymentId, TaskHandle};
use crate::domain::events::{EventsPage, LogsPage};

/// Deployment record as reported by `GET /deployments[/{id}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDeployment {
    pub id: DeploymentId,
    pub status: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(default, rename = "type")]
    pub link_type: Option<String>,
}

/// Task record as reported by `GET /deployments/{id}/tasks/{taskId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub id: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default, rename = "type")]
    pub task_type: String,
    pub status: String,
}

/// Options for `DELETE /deployments/{id}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndeployOptions {
    pub purge: bool,
    pub stop_on_error: bool,
}

/// Body of `POST /deployments/{id}/custom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCommand {
    pub node: String,
    pub interface: String,
    pub name: String,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Error)]
pub enum ProvisioningError {
    /// The long-poll was held open for its whole duration with nothing to
    /// report. Pollers resume immediately.
    #[error("Long-poll request timed out")]
    PollTimeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Response for {0} did not carry a Location header")]
    MissingLocation(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Client configuration error: {0}")]
    Configuration(String),
}

impl ProvisioningError {
    /// Errors a poller retries after backoff rather than treating as fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            ProvisioningError::PollTimeout | ProvisioningError::Transport(_) => true,
            ProvisioningError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// `PUT /deployments/{id}` with the zipped topology. Returns the task
    /// handle from the `Location` header.
    async fn submit_topology(
        &self,
        id: &DeploymentId,
        archive: Bytes,
    ) -> Result<TaskHandle, ProvisioningError>;

    /// `PATCH /deployments/{id}`. Some engine versions apply the update
    /// synchronously and return no task.
    async fn update_topology(
        &self,
        id: &DeploymentId,
        archive: Bytes,
    ) -> Result<Option<TaskHandle>, ProvisioningError>;

    /// `GET /deployments/{id}`; `None` on 404.
    async fn get_deployment(
        &self,
        id: &DeploymentId,
    ) -> Result<Option<RemoteDeployment>, ProvisioningError>;

    /// `GET /deployments`
    async fn list_deployments(&self) -> Result<Vec<RemoteDeployment>, ProvisioningError>;

    /// `POST /deployments/{id}/scale/{node}?delta=N`
    async fn scale(
        &self,
        id: &DeploymentId,
        node: &str,
        delta: i32,
    ) -> Result<TaskHandle, ProvisioningError>;

    /// `DELETE /deployments/{id}[?purge][&stopOnError]`
    async fn undeploy(
        &self,
        id: &DeploymentId,
        options: UndeployOptions,
    ) -> Result<TaskHandle, ProvisioningError>;

    /// `POST /deployments/{id}/purge[?force]`, synchronous.
    async fn purge(&self, id: &DeploymentId, force: bool) -> Result<(), ProvisioningError>;

    /// `POST /deployments/{id}/workflows/{name}[?continueOnError]`
    async fn execute_workflow(
        &self,
        id: &DeploymentId,
        workflow: &str,
        inputs: HashMap<String, serde_json::Value>,
        continue_on_error: bool,
    ) -> Result<TaskHandle, ProvisioningError>;

    /// `POST /deployments/{id}/custom`
    async fn execute_custom_command(
        &self,
        id: &DeploymentId,
        command: &CustomCommand,
    ) -> Result<TaskHandle, ProvisioningError>;

    async fn get_task(&self, task: &TaskHandle) -> Result<RemoteTask, ProvisioningError>;

    async fn cancel_task(&self, task: &TaskHandle) -> Result<(), ProvisioningError>;

    async fn resume_task(&self, task: &TaskHandle) -> Result<(), ProvisioningError>;

    /// `GET /events?index=N`, held open by the server until something happens.
    async fn poll_events(&self, index: u64) -> Result<EventsPage, ProvisioningError>;

    /// `GET /logs?index=N`
    async fn poll_logs(&self, index: u64) -> Result<LogsPage, ProvisioningError>;

    /// `HEAD /events`, the current `X-Yorc-Index`.
    async fn latest_event_index(&self) -> Result<u64, ProvisioningError>;

    /// `HEAD /logs`, the current `X-Yorc-Index`.
    async fn latest_log_index(&self) -> Result<u64, ProvisioningError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ProvisioningError::PollTimeout.is_transient());
        assert!(ProvisioningError::Transport("connection refused".into()).is_transient());
        assert!(ProvisioningError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!ProvisioningError::Http { status: 400, body: String::new() }.is_transient());
        assert!(!ProvisioningError::Configuration("bad ca".into()).is_transient());
    }

    #[test]
    fn test_deployment_listing_wire_format() {
        let json = r#"{
            "id": "d1",
            "status": "DEPLOYED",
            "links": [{"rel": "self", "href": "/deployments/d1", "type": "application/json"}]
        }"#;
        let deployment: RemoteDeployment = serde_json::from_str(json).unwrap();
        assert_eq!(deployment.id.as_str(), "d1");
        assert_eq!(deployment.links[0].rel, "self");
    }
}
