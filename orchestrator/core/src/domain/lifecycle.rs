// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Lifecycle Model
//!
//! States, input symbols and the static transition table driving every
//! per-deployment state machine, plus the mapping from remote engine status
//! strings to lifecycle input symbols.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Single source of truth for legal lifecycle moves
//!
//! The table is immutable data. A `(state, event)` pair that is not listed has
//! no edge: the state machine logs it and leaves its state untouched. Duplicate
//! and out-of-order remote notifications land here routinely.

use crate::domain::deployment::{DeploymentId, DeploymentStatus};
use crate::domain::archive::ArchiveError;
use crate::domain::provisioning::ProvisioningError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use self::LifecycleEventKind as E;
use self::LifecycleState as S;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Initial state for new ids and resting state after undeploy/purge
    Undeployed,
    /// Archive submitted, remote engine may not know the deployment yet
    DeploymentInit,
    DeploymentInProgress,
    Deployed,
    /// Undeploy requested while a deployment task is still in flight
    CancellationRequested,
    /// Cancel request issued against the in-flight task
    TaskCancelling,
    UndeploymentInProgress,
    UndeploymentPurging,
    Failed,
    UpdateInProgress,
    Updated,
    UpdateFailed,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 12] = [
        S::Undeployed,
        S::DeploymentInit,
        S::DeploymentInProgress,
        S::Deployed,
        S::CancellationRequested,
        S::TaskCancelling,
        S::UndeploymentInProgress,
        S::UndeploymentPurging,
        S::Failed,
        S::UpdateInProgress,
        S::Updated,
        S::UpdateFailed,
    ];

    /// States in which the remote engine may legitimately have no record of
    /// the deployment. Reconciliation never evicts these.
    pub fn is_initial(self) -> bool {
        matches!(self, S::Undeployed | S::DeploymentInit)
    }

    /// External status derived from the internal state.
    pub fn status(self) -> DeploymentStatus {
        match self {
            S::Undeployed => DeploymentStatus::Undeployed,
            S::DeploymentInit | S::DeploymentInProgress => DeploymentStatus::DeploymentInProgress,
            S::Deployed | S::Updated => DeploymentStatus::Deployed,
            S::CancellationRequested
            | S::TaskCancelling
            | S::UndeploymentInProgress
            | S::UndeploymentPurging => DeploymentStatus::UndeploymentInProgress,
            S::Failed => DeploymentStatus::Failure,
            S::UpdateInProgress => DeploymentStatus::UpdateInProgress,
            S::UpdateFailed => DeploymentStatus::UpdateFailure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            S::Undeployed => "UNDEPLOYED",
            S::DeploymentInit => "DEPLOYMENT_INIT",
            S::DeploymentInProgress => "DEPLOYMENT_IN_PROGRESS",
            S::Deployed => "DEPLOYED",
            S::CancellationRequested => "CANCELLATION_REQUESTED",
            S::TaskCancelling => "TASK_CANCELLING",
            S::UndeploymentInProgress => "UNDEPLOYMENT_IN_PROGRESS",
            S::UndeploymentPurging => "UNDEPLOYMENT_PURGING",
            S::Failed => "FAILED",
            S::UpdateInProgress => "UPDATE_IN_PROGRESS",
            S::Updated => "UPDATED",
            S::UpdateFailed => "UPDATE_FAILED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Input Symbols
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEventKind {
    DeploymentStarted,
    DeploymentInProgress,
    DeploymentSuccess,
    UndeploymentStarted,
    UndeploymentSuccess,
    DeploymentNotExisting,
    DeploymentPurged,
    UpdateStarted,
    UpdateSuccess,
    Failure,
    Eviction,
}

impl LifecycleEventKind {
    pub const ALL: [LifecycleEventKind; 11] = [
        E::DeploymentStarted,
        E::DeploymentInProgress,
        E::DeploymentSuccess,
        E::UndeploymentStarted,
        E::UndeploymentSuccess,
        E::DeploymentNotExisting,
        E::DeploymentPurged,
        E::UpdateStarted,
        E::UpdateSuccess,
        E::Failure,
        E::Eviction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            E::DeploymentStarted => "DEPLOYMENT_STARTED",
            E::DeploymentInProgress => "DEPLOYMENT_IN_PROGRESS",
            E::DeploymentSuccess => "DEPLOYMENT_SUCCESS",
            E::UndeploymentStarted => "UNDEPLOYMENT_STARTED",
            E::UndeploymentSuccess => "UNDEPLOYMENT_SUCCESS",
            E::DeploymentNotExisting => "DEPLOYMENT_NOT_EXISTING",
            E::DeploymentPurged => "DEPLOYMENT_PURGED",
            E::UpdateStarted => "UPDATE_STARTED",
            E::UpdateSuccess => "UPDATE_SUCCESS",
            E::Failure => "FAILURE",
            E::Eviction => "EVICTION",
        }
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Actions & Transition Table
// ============================================================================

/// Side effect executed when an edge is taken, before the state is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    None,
    /// Package the archive and `PUT` it, caching the returned task handle
    SubmitDeployment,
    /// Package the archive and `PATCH` it
    SubmitUpdate,
    /// Republish `UNDEPLOYMENT_STARTED` so the cancel request runs as its own step
    RequestCancellation,
    /// Cancel the cached in-flight task
    CancelTask,
    Undeploy,
    Purge,
    /// Drop the cached task handle, the remote operation is over
    ReleaseTask,
    /// Silent cleanup after a purge, no notification is re-emitted
    Cleanup,
    /// Release every per-id resource, the coordination unit is destroyed
    Evict,
}

impl Action {
    /// Actions that talk to the remote engine and can therefore fail.
    pub fn is_fallible(self) -> bool {
        matches!(
            self,
            Action::SubmitDeployment
                | Action::SubmitUpdate
                | Action::CancelTask
                | Action::Undeploy
                | Action::Purge
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::None => "none",
            Action::SubmitDeployment => "submit_deployment",
            Action::SubmitUpdate => "submit_update",
            Action::RequestCancellation => "request_cancellation",
            Action::CancelTask => "cancel_task",
            Action::Undeploy => "undeploy",
            Action::Purge => "purge",
            Action::ReleaseTask => "release_task",
            Action::Cleanup => "cleanup",
            Action::Evict => "evict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LifecycleState,
    pub on: LifecycleEventKind,
    pub to: LifecycleState,
    pub action: Action,
}

const fn edge(
    from: LifecycleState,
    on: LifecycleEventKind,
    to: LifecycleState,
    action: Action,
) -> Transition {
    Transition { from, on, to, action }
}

/// Every legal lifecycle move. `UNDEPLOYED` and `DEPLOYMENT_INIT` carry no
/// `EVICTION` edge.
pub static TRANSITIONS: &[Transition] = &[
    edge(S::Undeployed, E::DeploymentStarted, S::DeploymentInit, Action::SubmitDeployment),
    edge(S::Undeployed, E::Failure, S::Failed, Action::ReleaseTask),

    edge(S::DeploymentInit, E::DeploymentInProgress, S::DeploymentInProgress, Action::None),
    edge(S::DeploymentInit, E::DeploymentSuccess, S::Deployed, Action::ReleaseTask),
    edge(
        S::DeploymentInit,
        E::UndeploymentStarted,
        S::CancellationRequested,
        Action::RequestCancellation,
    ),
    edge(S::DeploymentInit, E::Failure, S::Failed, Action::ReleaseTask),

    edge(S::DeploymentInProgress, E::DeploymentInProgress, S::DeploymentInProgress, Action::None),
    edge(S::DeploymentInProgress, E::DeploymentSuccess, S::Deployed, Action::ReleaseTask),
    edge(
        S::DeploymentInProgress,
        E::UndeploymentStarted,
        S::CancellationRequested,
        Action::RequestCancellation,
    ),
    edge(S::DeploymentInProgress, E::Failure, S::Failed, Action::ReleaseTask),
    edge(S::DeploymentInProgress, E::Eviction, S::Undeployed, Action::Evict),

    edge(S::Deployed, E::DeploymentInProgress, S::DeploymentInProgress, Action::None),
    edge(S::Deployed, E::UndeploymentStarted, S::UndeploymentInProgress, Action::Undeploy),
    edge(S::Deployed, E::UpdateStarted, S::UpdateInProgress, Action::SubmitUpdate),
    edge(S::Deployed, E::Failure, S::Failed, Action::ReleaseTask),
    edge(S::Deployed, E::Eviction, S::Undeployed, Action::Evict),

    edge(S::CancellationRequested, E::UndeploymentStarted, S::TaskCancelling, Action::CancelTask),
    edge(S::CancellationRequested, E::DeploymentInProgress, S::CancellationRequested, Action::None),
    edge(S::CancellationRequested, E::Failure, S::Failed, Action::ReleaseTask),
    edge(S::CancellationRequested, E::Eviction, S::Undeployed, Action::Evict),

    // FAILURE here is the remote acknowledging the aborted task
    edge(S::TaskCancelling, E::Failure, S::UndeploymentInProgress, Action::Undeploy),
    edge(S::TaskCancelling, E::DeploymentSuccess, S::UndeploymentInProgress, Action::Undeploy),
    edge(S::TaskCancelling, E::DeploymentInProgress, S::TaskCancelling, Action::None),
    edge(S::TaskCancelling, E::Eviction, S::Undeployed, Action::Evict),

    edge(S::UndeploymentInProgress, E::UndeploymentSuccess, S::UndeploymentPurging, Action::Purge),
    edge(S::UndeploymentInProgress, E::DeploymentNotExisting, S::Undeployed, Action::Cleanup),
    edge(S::UndeploymentInProgress, E::Failure, S::Failed, Action::ReleaseTask),
    edge(S::UndeploymentInProgress, E::Eviction, S::Undeployed, Action::Evict),

    edge(S::UndeploymentPurging, E::DeploymentPurged, S::Undeployed, Action::Cleanup),
    edge(S::UndeploymentPurging, E::DeploymentNotExisting, S::Undeployed, Action::Cleanup),
    edge(S::UndeploymentPurging, E::Failure, S::Failed, Action::ReleaseTask),
    edge(S::UndeploymentPurging, E::Eviction, S::Undeployed, Action::Evict),

    edge(S::Failed, E::DeploymentStarted, S::DeploymentInit, Action::SubmitDeployment),
    edge(S::Failed, E::DeploymentInProgress, S::DeploymentInProgress, Action::None),
    edge(S::Failed, E::UndeploymentStarted, S::UndeploymentInProgress, Action::Undeploy),
    edge(S::Failed, E::UndeploymentSuccess, S::UndeploymentPurging, Action::Purge),
    edge(S::Failed, E::DeploymentNotExisting, S::Undeployed, Action::Cleanup),
    edge(S::Failed, E::Failure, S::Failed, Action::ReleaseTask),
    edge(S::Failed, E::Eviction, S::Undeployed, Action::Evict),

    edge(S::UpdateInProgress, E::UpdateSuccess, S::Updated, Action::ReleaseTask),
    edge(S::UpdateInProgress, E::DeploymentSuccess, S::Updated, Action::ReleaseTask),
    edge(S::UpdateInProgress, E::DeploymentInProgress, S::UpdateInProgress, Action::None),
    edge(S::UpdateInProgress, E::Failure, S::UpdateFailed, Action::ReleaseTask),
    edge(S::UpdateInProgress, E::Eviction, S::Undeployed, Action::Evict),

    edge(S::Updated, E::DeploymentInProgress, S::DeploymentInProgress, Action::None),
    edge(S::Updated, E::UndeploymentStarted, S::UndeploymentInProgress, Action::Undeploy),
    edge(S::Updated, E::UpdateStarted, S::UpdateInProgress, Action::SubmitUpdate),
    edge(S::Updated, E::Failure, S::Failed, Action::ReleaseTask),
    edge(S::Updated, E::Eviction, S::Undeployed, Action::Evict),

    edge(S::UpdateFailed, E::UndeploymentStarted, S::UndeploymentInProgress, Action::Undeploy),
    edge(S::UpdateFailed, E::UpdateStarted, S::UpdateInProgress, Action::SubmitUpdate),
    edge(S::UpdateFailed, E::Failure, S::Failed, Action::ReleaseTask),
    edge(S::UpdateFailed, E::Eviction, S::Undeployed, Action::Evict),
];

/// Look up the edge leaving `from` on `on`, if any.
pub fn transition(from: LifecycleState, on: LifecycleEventKind) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.on == on)
}

// ============================================================================
// Remote Status Mapping
// ============================================================================

/// Map a remote deployment status (from a `type=deployment` event) to the
/// lifecycle input symbol it stands for.
///
/// Unrecognised statuses are an error, never a default.
pub fn event_for_remote_status(status: &str) -> Result<LifecycleEventKind, LifecycleError> {
    match status.trim().to_ascii_uppercase().as_str() {
        "DEPLOYED" => Ok(E::DeploymentSuccess),
        "UNDEPLOYED" => Ok(E::UndeploymentSuccess),
        "DEPLOYMENT_IN_PROGRESS" | "SCALING_IN_PROGRESS" => Ok(E::DeploymentInProgress),
        "UNDEPLOYMENT_IN_PROGRESS" => Ok(E::UndeploymentStarted),
        "DEPLOYMENT_FAILED" | "UNDEPLOYMENT_FAILED" => Ok(E::Failure),
        _ => Err(LifecycleError::UnknownRemoteStatus(status.to_string())),
    }
}

/// Lifecycle state to re-attach to when a deployment already known to the
/// remote engine is registered at process startup.
pub fn state_for_remote_status(status: &str) -> Result<LifecycleState, LifecycleError> {
    match status.trim().to_ascii_uppercase().as_str() {
        "INITIAL" => Ok(S::DeploymentInit),
        "DEPLOYED" => Ok(S::Deployed),
        "DEPLOYMENT_IN_PROGRESS" | "SCALING_IN_PROGRESS" => Ok(S::DeploymentInProgress),
        "UNDEPLOYMENT_IN_PROGRESS" => Ok(S::UndeploymentInProgress),
        "UNDEPLOYED" => Ok(S::UndeploymentPurging),
        "DEPLOYMENT_FAILED" | "UNDEPLOYMENT_FAILED" => Ok(S::Failed),
        "UPDATE_IN_PROGRESS" => Ok(S::UpdateInProgress),
        "UPDATED" => Ok(S::Updated),
        "UPDATE_FAILURE" => Ok(S::UpdateFailed),
        _ => Err(LifecycleError::UnknownRemoteStatus(status.to_string())),
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    #[error("No state machine registered for deployment {0}")]
    NotFound(DeploymentId),

    #[error("Unknown remote deployment status '{0}'")]
    UnknownRemoteStatus(String),

    #[error("Deployment {deployment_id} cannot handle {event} in state {state}")]
    InvalidTransition {
        deployment_id: DeploymentId,
        state: LifecycleState,
        event: LifecycleEventKind,
    },

    #[error("Operation '{operation}' not allowed for deployment {deployment_id} in state {state}")]
    InvalidState {
        deployment_id: DeploymentId,
        state: LifecycleState,
        operation: &'static str,
    },

    #[error("No remote task in flight for deployment {0}")]
    NoTaskInFlight(DeploymentId),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Remote call failed: {0}")]
    RemoteFailure(#[from] ProvisioningError),

    #[error("Remote engine reported failure: {0}")]
    RemoteReported(String),

    #[error("Operation was dropped before completing")]
    Abandoned,

    #[error("State machine registry is shut down")]
    RegistryClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_is_deterministic() {
        let mut seen = HashSet::new();
        for t in TRANSITIONS {
            assert!(seen.insert((t.from, t.on)), "duplicate edge {} --{}-->", t.from, t.on);
        }
    }

    #[test]
    fn test_no_eviction_edge_from_initial_states() {
        for state in LifecycleState::ALL.iter().filter(|s| s.is_initial()) {
            assert!(transition(*state, E::Eviction).is_none(), "{} must not be evictable", state);
        }
        for state in LifecycleState::ALL.iter().filter(|s| !s.is_initial()) {
            let t = transition(*state, E::Eviction).expect("non-initial states accept EVICTION");
            assert_eq!(t.to, S::Undeployed);
            assert_eq!(t.action, Action::Evict);
        }
    }

    #[test]
    fn test_no_edge_from_undeployed_on_purged() {
        assert!(transition(S::Undeployed, E::DeploymentPurged).is_none());
    }

    #[test]
    fn test_fallible_action_targets_handle_failure() {
        // A failed action resolves FAILURE against the attempted target state,
        // so every such target needs a FAILURE edge and the chain must end.
        for t in TRANSITIONS.iter().filter(|t| t.action.is_fallible()) {
            let mut state = t.to;
            let mut hops = 0;
            loop {
                let failure = transition(state, E::Failure)
                    .unwrap_or_else(|| panic!("{} has no FAILURE edge", state));
                hops += 1;
                assert!(hops <= 3, "failure chain from {} does not terminate", t.to);
                if !failure.action.is_fallible() {
                    break;
                }
                state = failure.to;
            }
        }
    }

    #[test]
    fn test_remote_status_mapping() {
        assert_eq!(event_for_remote_status("DEPLOYED").unwrap(), E::DeploymentSuccess);
        assert_eq!(event_for_remote_status("UNDEPLOYED").unwrap(), E::UndeploymentSuccess);
        let event = |status| event_for_remote_status(status).unwrap();
        assert_eq!(event("SCALING_IN_PROGRESS"), E::DeploymentInProgress);
        assert_eq!(event("deployment_in_progress"), E::DeploymentInProgress);
        assert_eq!(event("UNDEPLOYMENT_IN_PROGRESS"), E::UndeploymentStarted);
        assert_eq!(event_for_remote_status("UNDEPLOYMENT_FAILED").unwrap(), E::Failure);
    }

    #[test]
    fn test_unknown_remote_status_is_an_error() {
        match event_for_remote_status("PURGE_IN_PROGRESS") {
            Err(LifecycleError::UnknownRemoteStatus(status)) => {
                assert_eq!(status, "PURGE_IN_PROGRESS")
            }
            other => panic!("expected UnknownRemoteStatus, got {:?}", other),
        }
        assert!(state_for_remote_status("").is_err());
    }

    #[test]
    fn test_external_status_is_many_to_one() {
        assert_eq!(S::DeploymentInit.status(), DeploymentStatus::DeploymentInProgress);
        assert_eq!(S::DeploymentInProgress.status(), DeploymentStatus::DeploymentInProgress);
        assert_eq!(S::TaskCancelling.status(), DeploymentStatus::UndeploymentInProgress);
        assert_eq!(S::UndeploymentPurging.status(), DeploymentStatus::UndeploymentInProgress);
        assert_eq!(S::Updated.status(), DeploymentStatus::Deployed);
    }
}
