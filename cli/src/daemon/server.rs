// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination daemon wiring
//!
//! Builds the lifecycle core from a validated configuration, re-attaches to
//! the deployments the remote engine already knows, starts the pollers and
//! the reconciliation checker and runs until a shutdown signal arrives.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use yorc_bridge_core::application::deployment_service::DeploymentService;
use yorc_bridge_core::application::poller::{EventSource, LogPoller, LogSource, RemoteEventPoller};
use yorc_bridge_core::application::reconciliation::ReconciliationChecker;
use yorc_bridge_core::application::registry::StateMachineRegistry;
use yorc_bridge_core::application::repository_factory::create_cursor_repository;
use yorc_bridge_core::domain::bridge_config::BridgeConfigManifest;
use yorc_bridge_core::domain::provisioning::ProvisioningClient;
use yorc_bridge_core::infrastructure::{EventBus, WorkerPool, YorcClient};

pub async fn serve(config: BridgeConfigManifest) -> Result<()> {
    let spec = &config.spec;
    info!(
        orchestrator_id = %spec.orchestrator.id,
        url = %spec.orchestrator.url,
        "yorc-bridge starting (PID: {})",
        std::process::id()
    );

    if let Some(addr) = spec.observability.metrics_listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("Failed to start metrics exporter on {}", addr))?;
        info!("Prometheus metrics exposed on http://{}/metrics", addr);
    }

    let cursors = create_cursor_repository(&spec.persistence)
        .await
        .context("Failed to initialize cursor persistence")?;

    let client: Arc<dyn ProvisioningClient> = Arc::new(
        YorcClient::new(&spec.orchestrator).context("Failed to build provisioning client")?,
    );
    let bus = EventBus::new(spec.event_bus.channel_capacity);
    let pool = WorkerPool::current();
    let registry = StateMachineRegistry::start(client.clone(), bus.clone(), &pool);
    let service =
        DeploymentService::new(client.clone(), registry.clone(), bus.clone(), pool.clone());

    // Re-attach in the background; the listing is retried until the remote
    // engine answers.
    service.start_bootstrap(spec.polling.retry_backoff);

    if spec.polling.events {
        RemoteEventPoller::new(
            EventSource::new(client.clone(), bus.clone()),
            cursors.clone(),
            spec.orchestrator.id.clone(),
            spec.polling.retry_backoff,
        )
        .start(&pool);
    }
    if spec.polling.logs {
        LogPoller::new(
            LogSource::new(client.clone(), bus.clone()),
            cursors.clone(),
            spec.orchestrator.id.clone(),
            spec.polling.retry_backoff,
        )
        .start(&pool);
    }
    if spec.reconciliation.enabled {
        ReconciliationChecker::new(client.clone(), registry.clone(), spec.reconciliation.interval)
            .start(&pool);
    }

    info!("yorc-bridge running");
    shutdown_signal().await;

    info!("yorc-bridge shutting down");
    if !pool.shutdown(spec.runtime.shutdown_grace).await {
        warn!("Some tasks did not stop within the shutdown grace period");
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that fails to install is logged
/// and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
