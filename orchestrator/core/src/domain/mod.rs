// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model
//!
//! Deployment identifiers, the lifecycle transition table, events, the
//! provisioning engine port and the configuration schema.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and traits, no I/O

pub mod deployment;
pub mod lifecycle;
pub mod archive;
pub mod events;
pub mod provisioning;
pub mod repository;
pub mod bridge_config;
