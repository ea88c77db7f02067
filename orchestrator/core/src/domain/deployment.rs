// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment identity, externally visible status and remote task handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier shared by the bridge and the remote provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeploymentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Deployment status exposed to the management layer.
///
/// Several internal lifecycle states collapse onto the same status, see
/// [`LifecycleState::status`](crate::domain::lifecycle::LifecycleState::status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Undeployed,
    DeploymentInProgress,
    Deployed,
    UndeploymentInProgress,
    Failure,
    UpdateInProgress,
    UpdateFailure,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undeployed => "UNDEPLOYED",
            Self::DeploymentInProgress => "DEPLOYMENT_IN_PROGRESS",
            Self::Deployed => "DEPLOYED",
            Self::UndeploymentInProgress => "UNDEPLOYMENT_IN_PROGRESS",
            Self::Failure => "FAILURE",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateFailure => "UPDATE_FAILURE",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an asynchronous task running on the remote engine.
///
/// Only cached while the operation that created it is outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub deployment_id: DeploymentId,

    /// Task URL as returned in the `Location` header, usually
    /// `/deployments/{id}/tasks/{taskId}`
    pub task_url: String,
}

impl TaskHandle {
    pub fn new(deployment_id: DeploymentId, task_url: impl Into<String>) -> Self {
        Self {
            deployment_id,
            task_url: task_url.into(),
        }
    }

    /// Task identifier, the last path segment of the task URL.
    pub fn task_id(&self) -> &str {
        self.task_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.task_url)
    }
}
