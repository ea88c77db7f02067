// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Read-only queries against the remote provisioning engine
//!
//! Commands: list, status, events, logs

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use yorc_bridge_core::domain::bridge_config::BridgeConfigManifest;
use yorc_bridge_core::domain::deployment::DeploymentId;
use yorc_bridge_core::domain::events::{LogRecord, RemoteEvent};
use yorc_bridge_core::domain::lifecycle::state_for_remote_status;
use yorc_bridge_core::domain::provisioning::{ProvisioningClient, ProvisioningError};
use yorc_bridge_core::infrastructure::YorcClient;

#[derive(Subcommand)]
pub enum RemoteCommand {
    /// List deployments known to the remote engine
    List,

    /// Show the remote status of one deployment
    Status {
        /// Deployment ID
        id: String,
    },

    /// Print the remote event stream
    Events {
        /// Start index (default: current head)
        #[arg(long)]
        from: Option<u64>,

        /// Keep long-polling for new events
        #[arg(short, long)]
        follow: bool,
    },

    /// Print the remote log stream
    Logs {
        /// Start index (default: current head)
        #[arg(long)]
        from: Option<u64>,

        /// Keep long-polling for new log records
        #[arg(short, long)]
        follow: bool,
    },
}

pub async fn handle_command(command: RemoteCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = BridgeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    let client = YorcClient::new(&config.spec.orchestrator)
        .context("Failed to build provisioning client")?;

    match command {
        RemoteCommand::List => list(&client).await,
        RemoteCommand::Status { id } => status(&client, DeploymentId::from(id.as_str())).await,
        RemoteCommand::Events { from, follow } => events(&client, from, follow).await,
        RemoteCommand::Logs { from, follow } => logs(&client, from, follow).await,
    }
}

async fn list(client: &dyn ProvisioningClient) -> Result<()> {
    let deployments = client.list_deployments().await.context("Failed to list deployments")?;

    if deployments.is_empty() {
        println!("{}", "No deployments found".yellow());
        return Ok(());
    }

    println!("{:<40} {:<28} {}", "ID".bold(), "STATUS".bold(), "LIFECYCLE".bold());
    for deployment in deployments {
        let lifecycle = state_for_remote_status(&deployment.status)
            .map(|state| format!("{:?}", state))
            .unwrap_or_else(|_| "-".to_string());
        println!(
            "{:<40} {:<28} {}",
            deployment.id.to_string(),
            colorize_status(&deployment.status),
            lifecycle.dimmed()
        );
    }
    Ok(())
}

async fn status(client: &dyn ProvisioningClient, id: DeploymentId) -> Result<()> {
    match client.get_deployment(&id).await? {
        Some(deployment) => {
            println!("{} {}", "Deployment:".bold(), deployment.id);
            println!("{} {}", "Status:".bold(), colorize_status(&deployment.status));
            for link in deployment.links {
                println!("  {} {}", link.rel.dimmed(), link.href);
            }
        }
        None => println!("{}", format!("Deployment {} not found", id).yellow()),
    }
    Ok(())
}

async fn events(client: &dyn ProvisioningClient, from: Option<u64>, follow: bool) -> Result<()> {
    let mut index = match from {
        Some(index) => index,
        None => client.latest_event_index().await?,
    };

    loop {
        match client.poll_events(index).await {
            Ok(page) => {
                page.events.iter().for_each(print_event);
                index = index.max(page.last_index);
            }
            Err(ProvisioningError::PollTimeout) => {}
            Err(e) => return Err(e.into()),
        }
        if !follow {
            return Ok(());
        }
    }
}

async fn logs(client: &dyn ProvisioningClient, from: Option<u64>, follow: bool) -> Result<()> {
    let mut index = match from {
        Some(index) => index,
        None => client.latest_log_index().await?,
    };

    loop {
        match client.poll_logs(index).await {
            Ok(page) => {
                page.logs.iter().for_each(print_log);
                index = index.max(page.last_index);
            }
            Err(ProvisioningError::PollTimeout) => {}
            Err(e) => return Err(e.into()),
        }
        if !follow {
            return Ok(());
        }
    }
}

fn print_event(event: &RemoteEvent) {
    let scope = match (&event.node, &event.instance) {
        (Some(node), Some(instance)) => format!("{}/{}", node, instance),
        (Some(node), None) => node.clone(),
        _ => String::new(),
    };
    println!(
        "{} {} {:?} {} {}",
        event.timestamp.dimmed(),
        event.deployment_id,
        event.event_type,
        scope,
        colorize_status(&event.status)
    );
}

fn print_log(record: &LogRecord) {
    let level = match record.level.as_str() {
        "ERROR" => record.level.red(),
        "WARN" | "WARNING" => record.level.yellow(),
        "DEBUG" => record.level.dimmed(),
        _ => record.level.normal(),
    };
    println!(
        "{} {} [{}] {}",
        record.timestamp.dimmed(),
        record.deployment_id,
        level,
        record.content
    );
}

fn colorize_status(status: &str) -> colored::ColoredString {
    let upper = status.to_uppercase();
    if upper.contains("FAIL") || upper.contains("ERROR") {
        status.red()
    } else if upper.contains("PROGRESS") || upper.contains("INITIAL") || upper.contains("RUNNING") {
        status.yellow()
    } else if upper == "DEPLOYED" || upper == "DONE" {
        status.green()
    } else {
        status.normal()
    }
}
