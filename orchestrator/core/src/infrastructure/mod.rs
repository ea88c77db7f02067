// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod event_bus;
pub mod worker_pool;
pub mod yorc_client;

pub use event_bus::{BusReceiver, EventBus, EventBusError};
pub use worker_pool::WorkerPool;
pub use yorc_client::YorcClient;
