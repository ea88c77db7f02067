// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Yorc Bridge CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command handlers and daemon wiring for the `yorc-bridge` binary

pub mod commands;
pub mod daemon;
pub mod logging;
