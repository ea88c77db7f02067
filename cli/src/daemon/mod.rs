// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination daemon
//!
//! Wires the HTTP client, event bus, registry, pollers and reconciliation
//! checker together on one worker pool and runs until a shutdown signal.

pub mod server;

pub use server::{serve, shutdown_signal};
