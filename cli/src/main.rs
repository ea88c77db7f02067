// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Yorc Bridge CLI
//!
//! The `yorc-bridge` binary runs the lifecycle coordination daemon in front
//! of a Yorc provisioning engine and offers a few inspection commands.
//!
//! ## Commands
//!
//! - `yorc-bridge run` - Run the coordination daemon until Ctrl-C / SIGTERM
//! - `yorc-bridge config show|validate|generate` - Configuration management
//! - `yorc-bridge remote list|status|events` - Read-only queries against the engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use yorc_bridge::commands::{self, ConfigCommand, RemoteCommand};
use yorc_bridge::logging::init_logging;
use yorc_bridge_core::domain::bridge_config::LogFormat;

/// Yorc Bridge - deployment lifecycle coordination for Yorc
#[derive(Parser)]
#[command(name = "yorc-bridge")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "YORC_BRIDGE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the
    /// configured level
    #[arg(long, global = true, env = "YORC_BRIDGE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination daemon
    #[command(name = "run")]
    Run,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Query the remote provisioning engine
    #[command(name = "remote")]
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => commands::run::execute(cli.config, cli.log_level),
        Commands::Config { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), LogFormat::Compact)?;
            block_on(commands::config::handle_command(command, cli.config))
        }
        Commands::Remote { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), LogFormat::Compact)?;
            block_on(commands::remote::handle_command(command, cli.config))
        }
    }
}

/// One-shot commands run on a current-thread runtime; only `run` builds the
/// configured multi-threaded one.
fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?
        .block_on(future)
}
