// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Yorc Bridge Core
//!
//! Keeps a local lifecycle view of every deployment hosted on a Yorc
//! provisioning engine consistent with the engine itself. One state machine
//! per deployment is fed by a per-deployment event bus, which in turn is fed
//! by long-polling the engine's event and log streams. A reconciliation
//! checker evicts local state the engine no longer knows about.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Deployment lifecycle coordination

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
