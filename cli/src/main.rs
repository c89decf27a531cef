// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # processctl
//!
//! Runs and inspects the checklist-driven process worker.
//!
//! ## Commands
//!
//! - `processctl run [--once]` - Poll the store and execute due process steps
//! - `processctl retrigger <PROCESS_ID> <STEP_TYPE>` - Resume a failed step
//! - `processctl checklist show <SUBJECT_ID>` - Inspect a subject's checklist
//! - `processctl config show|validate|generate` - Configuration management
//! - `processctl migrate [--dry-run]` - Apply the PostgreSQL schema

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use portal_process_cli::commands::{self, ChecklistCommand, ConfigCommand, MigrateCommand, RetriggerCommand, RunCommand};
use portal_process_core::domain::worker_config::ProcessWorkerConfigManifest;

/// Checklist-driven process worker
#[derive(Parser)]
#[command(name = "processctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "PORTAL_PROCESS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config file
    #[arg(long, global = true, env = "PORTAL_PROCESS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); defaults to the config file
    #[arg(long, global = true, env = "PORTAL_PROCESS_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the process step runner
    #[command(name = "run")]
    Run {
        #[command(flatten)]
        command: RunCommand,
    },

    /// Complete a retrigger step and reschedule the step it stands for
    #[command(name = "retrigger")]
    Retrigger {
        #[command(flatten)]
        command: RetriggerCommand,
    },

    /// Checklist inspection
    #[command(name = "checklist")]
    Checklist {
        #[command(subcommand)]
        command: ChecklistCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Apply database migrations
    #[command(name = "migrate")]
    Migrate {
        #[command(flatten)]
        command: MigrateCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // The config file only supplies defaults for logging; load errors surface
    // again once the command loads it.
    let file_logging = ProcessWorkerConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .map(|config| config.logging());
    let level = cli
        .log_level
        .clone()
        .or_else(|| file_logging.as_ref().map(|l| l.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .clone()
        .or_else(|| file_logging.map(|l| l.format))
        .unwrap_or_else(|| "text".to_string());
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Run { command }) => commands::run::execute(command, cli.config).await,
        Some(Commands::Retrigger { command }) => commands::retrigger::execute(command, cli.config).await,
        Some(Commands::Checklist { command }) => commands::checklist::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Migrate { command }) => commands::migrate::execute(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}
