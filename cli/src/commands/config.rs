// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use yorc_bridge_core::domain::bridge_config::BridgeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./yorc-bridge.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = BridgeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. YORC_BRIDGE_CONFIG_PATH: {}",
            std::env::var("YORC_BRIDGE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./yorc-bridge.yaml");
        println!("  4. ~/.yorc-bridge/config.yaml");
        println!("  5. /etc/yorc-bridge/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let spec = &config.spec;
    println!("{}", "Orchestrator:".bold());
    println!("  ID: {}", spec.orchestrator.id);
    println!("  URL: {}", spec.orchestrator.url);
    if let Some(ca) = &spec.orchestrator.ca_certificate {
        println!("  CA certificate: {}", ca.display());
    }
    if spec.orchestrator.insecure_skip_verify {
        println!("  TLS verification: {}", "disabled".red());
    }
    println!("  Long-poll wait: {:?}", spec.orchestrator.long_poll_wait);
    println!();

    println!("{}", "Polling:".bold());
    println!("  Events: {}", enabled(spec.polling.events));
    println!("  Logs: {}", enabled(spec.polling.logs));
    println!("  Retry backoff: {:?}", spec.polling.retry_backoff);
    println!();

    println!("{}", "Reconciliation:".bold());
    println!("  {}", enabled(spec.reconciliation.enabled));
    println!("  Interval: {:?}", spec.reconciliation.interval);
    println!();

    println!("{}", "Runtime:".bold());
    println!("  Worker threads: {}", spec.runtime.worker_threads);
    println!("  Event bus capacity: {}", spec.event_bus.channel_capacity);
    println!("  Cursor persistence: {:?}", spec.persistence.backend);
    if let Some(addr) = spec.observability.metrics_listen {
        println!("  Metrics: http://{}/metrics", addr);
    }
    println!();

    Ok(())
}

fn enabled(flag: bool) -> colored::ColoredString {
    if flag {
        "enabled".green()
    } else {
        "disabled".yellow()
    }
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = BridgeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", output.display());
    }

    BridgeConfigManifest::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
