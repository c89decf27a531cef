// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use portal_process_core::domain::worker_config::{DatabaseBackend, ProcessWorkerConfigManifest};

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

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./process-worker.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(&output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ProcessWorkerConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. PORTAL_PROCESS_CONFIG_PATH: {}",
            std::env::var("PORTAL_PROCESS_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./process-worker.yaml");
        println!("  4. ~/.portal-process/config.yaml");
        println!("  5. /etc/portal-process/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Worker:".bold());
    println!("  Name: {}", config.metadata.name);
    let worker = &config.spec.worker;
    println!("  Lock expiry: {}s", worker.lock_expiry_seconds);
    println!("  Poll interval: {}s", worker.poll_interval_seconds);
    println!("  Max processes per run: {}", worker.max_processes_per_run);
    println!("  Max parallel processes: {}", worker.max_parallel_processes);
    println!();

    println!("{}", "Database:".bold());
    match config.spec.database.backend {
        DatabaseBackend::InMemory => println!("  Backend: in-memory"),
        DatabaseBackend::Postgres => {
            println!("  Backend: postgres");
            // Only the reference is shown; resolved URLs may carry credentials.
            println!("  URL: {}", config.spec.database.url.as_deref().unwrap_or("(not set)"));
            println!("  Max connections: {}", config.spec.database.max_connections);
        }
    }
    println!();

    let logging = config.logging();
    println!("{}", "Logging:".bold());
    println!("  Level: {}", logging.level);
    println!("  Format: {}", logging.format);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ProcessWorkerConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path) -> Result<()> {
    ProcessWorkerConfigManifest::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
