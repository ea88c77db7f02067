// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod state_machine;
pub mod registry;
pub mod deployment_service;
pub mod poller;
pub mod reconciliation;
pub mod repository_factory;

// Re-export services for convenience
pub use deployment_service::{bootstrap, BootstrapReport, DeploymentService};
pub use poller::{
    EventPoller, EventSource, LogPoller, LogSource, PollOutcome, PollSource, RemoteEventPoller,
};
pub use reconciliation::{ReconciliationChecker, ReconciliationReport};
pub use registry::{StateMachineRegistry, TaskHandleStore};
pub use state_machine::{HandleOutcome, LifecycleStateMachine, MachineExit};
