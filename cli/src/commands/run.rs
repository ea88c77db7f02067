// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `yorc-bridge run`

use anyhow::{Context, Result};
use std::path::PathBuf;

use yorc_bridge_core::domain::bridge_config::BridgeConfigManifest;

use crate::daemon;
use crate::logging::init_logging;

/// Load configuration, install logging and run the daemon on a runtime
/// sized by `spec.runtime.worker_threads`.
pub fn execute(config_path: Option<PathBuf>, log_level: Option<String>) -> Result<()> {
    let config = BridgeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let observability = &config.spec.observability;
    init_logging(
        log_level.as_deref().unwrap_or(&observability.log_level),
        observability.log_format,
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.spec.runtime.worker_threads)
        .thread_name("yorc-bridge-worker")
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(daemon::serve(config))
}
